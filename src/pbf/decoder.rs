//! Primitive block decoder
//!
//! Turns a serialized `PrimitiveBlock` into a buffer of entity items. All
//! string ids and array lengths are checked; a block that fails any check is
//! rejected as a whole.

use prost::Message;

use super::block::{DATE_GRANULARITY, LOCATION_GRANULARITY, LONLAT_RESOLUTION};
use super::delta::DeltaDecoder;
use super::proto;
use crate::error::{OsmError, Result};
use crate::memory::{padded_length, AutoGrow, Buffer, DEFAULT_CAPACITY};
use crate::osm::{
    EntityBits, EntityKind, Location, MemberType, ObjectBuilder, COORDINATE_PRECISION,
};

/// Coordinate and timestamp scaling of one block
#[derive(Debug, Clone, Copy)]
struct Scale {
    granularity: i64,
    lat_offset: i64,
    lon_offset: i64,
    date_granularity: i64,
}

impl Scale {
    fn of(block: &proto::PrimitiveBlock) -> Self {
        Scale {
            granularity: block
                .granularity
                .map_or(LOCATION_GRANULARITY, i64::from),
            lat_offset: block.lat_offset.unwrap_or(0),
            lon_offset: block.lon_offset.unwrap_or(0),
            date_granularity: block
                .date_granularity
                .map_or(i64::from(DATE_GRANULARITY), i64::from),
        }
    }

    fn coordinate(offset: i64, granularity: i64, value: i64) -> Result<i32> {
        let nanodegrees = offset.wrapping_add(granularity.wrapping_mul(value));
        let fixed = nanodegrees / (LONLAT_RESOLUTION / i64::from(COORDINATE_PRECISION));
        i32::try_from(fixed)
            .map_err(|_| OsmError::InvalidFrame(format!("coordinate {} out of range", fixed)))
    }

    fn location(&self, lon: i64, lat: i64) -> Result<Location> {
        Ok(Location::new(
            Self::coordinate(self.lon_offset, self.granularity, lon)?,
            Self::coordinate(self.lat_offset, self.granularity, lat)?,
        ))
    }

    /// Seconds since the epoch
    fn timestamp(&self, value: i64) -> i64 {
        value.wrapping_mul(self.date_granularity) / 1000
    }
}

/// String table with checked lookups
struct Strings<'a> {
    entries: Vec<&'a str>,
}

impl<'a> Strings<'a> {
    fn new(table: &'a proto::StringTable) -> Result<Self> {
        let entries = table
            .s
            .iter()
            .map(|s| std::str::from_utf8(s))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Strings { entries })
    }

    fn get(&self, id: i64) -> Result<&'a str> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.entries.get(index).copied())
            .ok_or(OsmError::InvalidStringId {
                id: id.max(0) as usize,
                len: self.entries.len(),
            })
    }

    fn check<T: Copy + Into<i64>>(&self, ids: &[T]) -> Result<()> {
        for &id in ids {
            self.get(id.into())?;
        }
        Ok(())
    }

    /// Lookup of an id already passed to [`check`](Self::check)
    fn resolve<T: Into<i64>>(&self, id: T) -> &'a str {
        self.get(id.into()).unwrap_or_default()
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(OsmError::SizeMismatch {
            what,
            declared: expected,
            actual,
        });
    }
    Ok(())
}

/// Decoded metadata of one entity
struct Meta<'a> {
    version: u32,
    timestamp: i64,
    changeset: i64,
    uid: i32,
    user: &'a str,
    visible: bool,
}

impl Meta<'_> {
    /// All-zero metadata is what the encoder writes for entities without any
    fn is_present(&self) -> bool {
        self.version != 0
            || self.timestamp != 0
            || self.changeset != 0
            || self.uid != 0
            || !self.user.is_empty()
    }
}

/// A version of -1 is the "unknown" default of the format; any other
/// negative value is corrupt
fn meta_version(id: i64, version: i32) -> Result<u32> {
    if version == -1 {
        return Ok(0);
    }
    u32::try_from(version).map_err(|_| OsmError::VersionOutOfRange {
        id,
        version: i64::from(version),
    })
}

fn info_meta<'a>(
    id: i64,
    info: &proto::Info,
    strings: &Strings<'a>,
    scale: &Scale,
) -> Result<Meta<'a>> {
    Ok(Meta {
        version: meta_version(id, info.version.unwrap_or(-1))?,
        timestamp: scale.timestamp(info.timestamp.unwrap_or(0)),
        changeset: info.changeset.unwrap_or(0),
        uid: info.uid.unwrap_or(0),
        user: strings.get(i64::from(info.user_sid.unwrap_or(0)))?,
        visible: info.visible.unwrap_or(true),
    })
}

fn start_object<'b, 'a>(
    buffer: &'b mut Buffer<'a>,
    kind: EntityKind,
    id: i64,
    meta: Option<&Meta<'_>>,
) -> Result<ObjectBuilder<'b, 'a>> {
    let meta = meta.filter(|m| m.is_present() || !m.visible);
    let user = meta.map_or("", |m| m.user);
    let mut builder = ObjectBuilder::new(buffer, kind, id, user)?;
    if let Some(m) = meta {
        if m.is_present() {
            builder
                .set_version(m.version)
                .set_timestamp(m.timestamp)
                .set_changeset(m.changeset)
                .set_uid(m.uid);
        }
        builder.set_visible(m.visible);
    }
    Ok(builder)
}

fn decode_nodes(
    nodes: &[proto::Node],
    strings: &Strings<'_>,
    scale: &Scale,
    buffer: &mut Buffer<'_>,
) -> Result<()> {
    for node in nodes {
        check_len("node keys/vals", node.keys.len(), node.vals.len())?;
        strings.check(&node.keys)?;
        strings.check(&node.vals)?;
        let meta = node
            .info
            .as_ref()
            .map(|info| info_meta(node.id, info, strings, scale))
            .transpose()?;
        let location = scale.location(node.lon, node.lat)?;

        let mut builder = start_object(buffer, EntityKind::Node, node.id, meta.as_ref())?;
        builder.set_location(location)?;
        if !node.keys.is_empty() {
            builder.add_tags(
                node.keys
                    .iter()
                    .zip(&node.vals)
                    .map(|(&k, &v)| (strings.resolve(k), strings.resolve(v))),
            )?;
        }
        builder.commit()?;
    }
    Ok(())
}

fn decode_dense(
    dense: &proto::DenseNodes,
    strings: &Strings<'_>,
    scale: &Scale,
    buffer: &mut Buffer<'_>,
) -> Result<()> {
    let count = dense.id.len();
    check_len("dense node lat", count, dense.lat.len())?;
    check_len("dense node lon", count, dense.lon.len())?;
    if let Some(info) = &dense.denseinfo {
        check_len("dense info version", count, info.version.len())?;
        check_len("dense info timestamp", count, info.timestamp.len())?;
        check_len("dense info changeset", count, info.changeset.len())?;
        check_len("dense info uid", count, info.uid.len())?;
        check_len("dense info user_sid", count, info.user_sid.len())?;
        if !info.visible.is_empty() {
            check_len("dense info visible", count, info.visible.len())?;
        }
    }
    strings.check(&dense.keys_vals)?;

    let mut id = DeltaDecoder::<i64>::new();
    let mut lat = DeltaDecoder::<i64>::new();
    let mut lon = DeltaDecoder::<i64>::new();
    let mut timestamp = DeltaDecoder::<i64>::new();
    let mut changeset = DeltaDecoder::<i64>::new();
    let mut uid = DeltaDecoder::<i32>::new();
    let mut user_sid = DeltaDecoder::<i32>::new();
    let mut tag_pos = 0;

    for i in 0..count {
        let node_id = id.update(dense.id[i]);
        let meta = match &dense.denseinfo {
            Some(info) => Some(Meta {
                version: meta_version(node_id, info.version[i])?,
                timestamp: scale.timestamp(timestamp.update(info.timestamp[i])),
                changeset: changeset.update(info.changeset[i]),
                uid: uid.update(info.uid[i]),
                user: strings.get(i64::from(user_sid.update(info.user_sid[i])))?,
                visible: info.visible.get(i).copied().unwrap_or(true),
            }),
            None => None,
        };
        let location = scale.location(lon.update(dense.lon[i]), lat.update(dense.lat[i]))?;

        // Tags of this node run up to the next 0; an empty array means no tags at all
        let tags_start = tag_pos;
        if !dense.keys_vals.is_empty() {
            loop {
                match dense.keys_vals.get(tag_pos) {
                    None => return Err(OsmError::Truncated("dense node keys_vals")),
                    Some(0) => break,
                    Some(_) if tag_pos + 1 >= dense.keys_vals.len() => {
                        return Err(OsmError::Truncated("dense node keys_vals"))
                    }
                    Some(_) => tag_pos += 2,
                }
            }
        }
        let tags = &dense.keys_vals[tags_start..tag_pos];
        if !dense.keys_vals.is_empty() {
            tag_pos += 1;
        }

        let mut builder = start_object(buffer, EntityKind::Node, node_id, meta.as_ref())?;
        builder.set_location(location)?;
        if !tags.is_empty() {
            builder.add_tags(
                tags.chunks_exact(2)
                    .map(|pair| (strings.resolve(pair[0]), strings.resolve(pair[1]))),
            )?;
        }
        builder.commit()?;
    }
    Ok(())
}

fn decode_ways(
    ways: &[proto::Way],
    strings: &Strings<'_>,
    scale: &Scale,
    buffer: &mut Buffer<'_>,
) -> Result<()> {
    for way in ways {
        check_len("way keys/vals", way.keys.len(), way.vals.len())?;
        strings.check(&way.keys)?;
        strings.check(&way.vals)?;
        let meta = way
            .info
            .as_ref()
            .map(|info| info_meta(way.id, info, strings, scale))
            .transpose()?;

        let mut builder = start_object(buffer, EntityKind::Way, way.id, meta.as_ref())?;
        if !way.keys.is_empty() {
            builder.add_tags(
                way.keys
                    .iter()
                    .zip(&way.vals)
                    .map(|(&k, &v)| (strings.resolve(k), strings.resolve(v))),
            )?;
        }
        let mut delta = DeltaDecoder::new();
        builder.add_way_nodes(way.refs.iter().map(|&r| delta.update(r)))?;
        builder.commit()?;
    }
    Ok(())
}

fn decode_relations(
    relations: &[proto::Relation],
    strings: &Strings<'_>,
    scale: &Scale,
    buffer: &mut Buffer<'_>,
) -> Result<()> {
    for relation in relations {
        check_len("relation keys/vals", relation.keys.len(), relation.vals.len())?;
        check_len("relation memids", relation.roles_sid.len(), relation.memids.len())?;
        check_len("relation types", relation.roles_sid.len(), relation.types.len())?;
        strings.check(&relation.keys)?;
        strings.check(&relation.vals)?;
        strings.check(&relation.roles_sid)?;
        let types = relation
            .types
            .iter()
            .map(|&t| MemberType::from_pbf(t))
            .collect::<Result<Vec<_>>>()?;
        let meta = relation
            .info
            .as_ref()
            .map(|info| info_meta(relation.id, info, strings, scale))
            .transpose()?;

        let mut builder = start_object(buffer, EntityKind::Relation, relation.id, meta.as_ref())?;
        if !relation.keys.is_empty() {
            builder.add_tags(
                relation
                    .keys
                    .iter()
                    .zip(&relation.vals)
                    .map(|(&k, &v)| (strings.resolve(k), strings.resolve(v))),
            )?;
        }
        let mut delta = DeltaDecoder::new();
        builder.add_members(
            types
                .iter()
                .zip(&relation.memids)
                .zip(&relation.roles_sid)
                .map(|((&member_type, &memid), &role)| {
                    (member_type, delta.update(memid), strings.resolve(role))
                }),
        )?;
        builder.commit()?;
    }
    Ok(())
}

/// Decode a serialized primitive block into a new buffer
///
/// Groups whose kind is not in `filter` are skipped without being decoded.
pub fn decode_primitive_block(data: &[u8], filter: EntityBits) -> Result<Buffer<'static>> {
    let block = proto::PrimitiveBlock::decode(data)?;
    let strings = Strings::new(&block.stringtable)?;
    let scale = Scale::of(&block);

    let capacity = padded_length(data.len() * 2).clamp(1024, DEFAULT_CAPACITY * 64);
    let mut buffer = Buffer::with_capacity(capacity, AutoGrow::Yes)?;

    for group in &block.primitivegroup {
        if filter.contains(EntityKind::Node) {
            decode_nodes(&group.nodes, &strings, &scale, &mut buffer)?;
            if let Some(dense) = &group.dense {
                decode_dense(dense, &strings, &scale, &mut buffer)?;
            }
        }
        if filter.contains(EntityKind::Way) {
            decode_ways(&group.ways, &strings, &scale, &mut buffer)?;
        }
        if filter.contains(EntityKind::Relation) {
            decode_relations(&group.relations, &strings, &scale, &mut buffer)?;
        }
    }

    Ok(buffer)
}
