//! Primitive block encoder
//!
//! Entities are collected into one group of a single kind together with the
//! block's string table. A block is finished when the next entity has a
//! different kind, when it holds [`MAX_ENTITIES_PER_BLOCK`] entities, or when
//! it reaches about 95% of the maximum blob size. The remaining 5% leave room
//! for the string table, which usually needs well under 1% of the block.

use std::mem;

use prost::Message;

use super::blob::MAX_UNCOMPRESSED_BLOB_SIZE;
use super::delta::DeltaEncoder;
use super::proto;
use super::string_table::StringTable;
use crate::config::PbfOptions;
use crate::error::{OsmError, Result};
use crate::osm::{Entity, NodeRef, ObjectRef, RelationRef, WayRef, COORDINATE_PRECISION};

/// Maximum number of entities in one block
pub const MAX_ENTITIES_PER_BLOCK: usize = 8000;

/// Fill level at which a block is finished
pub const MAX_USED_BLOCK_SIZE: usize = MAX_UNCOMPRESSED_BLOB_SIZE * 95 / 100;

/// Coordinate units per degree in the PBF format (nanodegrees)
pub const LONLAT_RESOLUTION: i64 = 1_000_000_000;

/// Granularity of written coordinates, in nanodegrees
pub const LOCATION_GRANULARITY: i64 = 100;

/// Granularity of written timestamps, in milliseconds
pub const DATE_GRANULARITY: i32 = 1000;

/// Degrees to the integer coordinate stored in a block
///
/// Rounds half away from zero.
pub fn lonlat_to_int(degrees: f64) -> i64 {
    (degrees * LONLAT_RESOLUTION as f64 / LOCATION_GRANULARITY as f64).round() as i64
}

/// Fixed-point coordinate to the integer stored in a block
fn fixed_to_int(value: i32) -> i64 {
    i64::from(value) * (LONLAT_RESOLUTION / i64::from(COORDINATE_PRECISION)) / LOCATION_GRANULARITY
}

/// Upper bound for the varint of one id in a packed list
const MAX_VARINT_SIZE: usize = 10;

/// Kind of group a block holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Nodes,
    DenseNodes,
    Ways,
    Relations,
}

impl GroupKind {
    fn of(entity: &Entity<'_>, options: &PbfOptions) -> Self {
        match entity {
            Entity::Node(_) if options.use_dense_nodes => GroupKind::DenseNodes,
            Entity::Node(_) => GroupKind::Nodes,
            Entity::Way(_) => GroupKind::Ways,
            Entity::Relation(_) => GroupKind::Relations,
        }
    }
}

/// Upper bound for the encoded size of an entity, string table included
pub fn estimate_size(entity: &Entity<'_>) -> usize {
    let object = entity.object();
    let mut size = 64 + object.user().len();
    for tag in object.tags() {
        size += tag.key.len() + tag.value.len() + 4 * MAX_VARINT_SIZE;
    }
    match entity {
        Entity::Node(_) => size += 2 * MAX_VARINT_SIZE,
        Entity::Way(way) => size += way.nodes().len() * MAX_VARINT_SIZE,
        Entity::Relation(relation) => {
            for member in relation.members() {
                size += member.role.len() + 4 * MAX_VARINT_SIZE;
            }
        }
    }
    size
}

/// Version as stored in a block
///
/// The format keeps versions in an `int32`; larger values are rejected
/// instead of wrapping.
fn pbf_version(entity: &Entity<'_>) -> Result<i32> {
    let version = entity.object().version();
    i32::try_from(version).map_err(|_| OsmError::VersionOutOfRange {
        id: entity.id(),
        version: i64::from(version),
    })
}

/// Upper bound for the column bytes one dense node adds, strings excluded
fn dense_column_size(node: &NodeRef<'_>) -> usize {
    // id, lat, lon, the six metadata columns and the tag terminator
    (10 + 2 * node.tags().count()) * MAX_VARINT_SIZE
}

/// Column store for a dense node group
#[derive(Debug, Default)]
struct DenseNodesBuilder {
    ids: Vec<i64>,
    versions: Vec<i32>,
    timestamps: Vec<i64>,
    changesets: Vec<i64>,
    uids: Vec<i32>,
    user_sids: Vec<i32>,
    visibles: Vec<bool>,
    lats: Vec<i64>,
    lons: Vec<i64>,
    keys_vals: Vec<i32>,

    delta_id: DeltaEncoder<i64>,
    delta_timestamp: DeltaEncoder<i64>,
    delta_changeset: DeltaEncoder<i64>,
    delta_uid: DeltaEncoder<i32>,
    delta_user_sid: DeltaEncoder<i32>,
    delta_lat: DeltaEncoder<i64>,
    delta_lon: DeltaEncoder<i64>,
}

impl DenseNodesBuilder {
    fn add_node(
        &mut self,
        node: &NodeRef<'_>,
        version: i32,
        strings: &mut StringTable,
        options: &PbfOptions,
    ) {
        self.ids.push(self.delta_id.update(node.id()));

        if options.add_metadata {
            self.versions.push(version);
            self.timestamps
                .push(self.delta_timestamp.update(node.timestamp()));
            self.changesets
                .push(self.delta_changeset.update(node.changeset()));
            self.uids.push(self.delta_uid.update(node.uid()));
            let user_sid = strings.add(node.user()) as i32;
            self.user_sids.push(self.delta_user_sid.update(user_sid));
            if options.has_multiple_object_versions {
                self.visibles.push(node.visible());
            }
        }

        let location = node.location();
        self.lats.push(self.delta_lat.update(fixed_to_int(location.y())));
        self.lons.push(self.delta_lon.update(fixed_to_int(location.x())));

        for tag in node.tags() {
            self.keys_vals.push(strings.add(tag.key) as i32);
            self.keys_vals.push(strings.add(tag.value) as i32);
        }
        self.keys_vals.push(0);
    }

    /// Move the columns into a message, leaving the builder empty
    fn take(&mut self, options: &PbfOptions) -> proto::DenseNodes {
        let taken = mem::take(self);
        let denseinfo = options.add_metadata.then(|| proto::DenseInfo {
            version: taken.versions,
            timestamp: taken.timestamps,
            changeset: taken.changesets,
            uid: taken.uids,
            user_sid: taken.user_sids,
            visible: taken.visibles,
        });
        proto::DenseNodes {
            id: taken.ids,
            denseinfo,
            lat: taken.lats,
            lon: taken.lons,
            keys_vals: taken.keys_vals,
        }
    }
}

/// One primitive block under construction
#[derive(Debug)]
pub struct PrimitiveBlockBuilder {
    options: PbfOptions,
    kind: Option<GroupKind>,
    strings: StringTable,
    nodes: Vec<proto::Node>,
    dense: DenseNodesBuilder,
    ways: Vec<proto::Way>,
    relations: Vec<proto::Relation>,
    count: usize,
    group_size: usize,
}

impl PrimitiveBlockBuilder {
    pub fn new(options: PbfOptions) -> Self {
        PrimitiveBlockBuilder {
            options,
            kind: None,
            strings: StringTable::new(),
            nodes: Vec::new(),
            dense: DenseNodesBuilder::default(),
            ways: Vec::new(),
            relations: Vec::new(),
            count: 0,
            group_size: 0,
        }
    }

    pub fn kind(&self) -> Option<GroupKind> {
        self.kind
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Approximate serialized size of the block so far
    pub fn size(&self) -> usize {
        self.group_size + self.strings.size()
    }

    /// Whether another entity of `kind` may go into this block
    pub fn can_add(&self, kind: GroupKind) -> bool {
        self.kind == Some(kind)
            && self.count < MAX_ENTITIES_PER_BLOCK
            && self.size() < MAX_USED_BLOCK_SIZE
    }

    /// Drop all content and start collecting `kind`
    pub fn reset(&mut self, kind: GroupKind) {
        self.kind = Some(kind);
        self.strings.clear();
        self.nodes.clear();
        self.dense = DenseNodesBuilder::default();
        self.ways.clear();
        self.relations.clear();
        self.count = 0;
        self.group_size = 0;
    }

    fn info(&mut self, object: &ObjectRef<'_>, version: i32) -> Option<proto::Info> {
        if !self.options.add_metadata {
            return None;
        }
        Some(proto::Info {
            version: Some(version),
            timestamp: Some(object.timestamp()),
            changeset: Some(object.changeset()),
            uid: Some(object.uid()),
            user_sid: Some(self.strings.add(object.user())),
            visible: self
                .options
                .has_multiple_object_versions
                .then(|| object.visible()),
        })
    }

    fn tags(&mut self, object: &ObjectRef<'_>) -> (Vec<u32>, Vec<u32>) {
        object
            .tags()
            .map(|tag| (self.strings.add(tag.key), self.strings.add(tag.value)))
            .unzip()
    }

    fn add_node(&mut self, node: &NodeRef<'_>, version: i32) {
        let (keys, vals) = self.tags(node);
        let location = node.location();
        let message = proto::Node {
            id: node.id(),
            keys,
            vals,
            info: self.info(node, version),
            lat: fixed_to_int(location.y()),
            lon: fixed_to_int(location.x()),
        };
        self.group_size += message.encoded_len() + MAX_VARINT_SIZE;
        self.nodes.push(message);
    }

    fn add_way(&mut self, way: &WayRef<'_>, version: i32) {
        let (keys, vals) = self.tags(way);
        let mut delta = DeltaEncoder::new();
        let message = proto::Way {
            id: way.id(),
            keys,
            vals,
            info: self.info(way, version),
            refs: way.nodes().map(|r| delta.update(r)).collect(),
        };
        self.group_size += message.encoded_len() + MAX_VARINT_SIZE;
        self.ways.push(message);
    }

    fn add_relation(&mut self, relation: &RelationRef<'_>, version: i32) {
        let (keys, vals) = self.tags(relation);
        let info = self.info(relation, version);
        let mut delta = DeltaEncoder::new();
        let mut message = proto::Relation {
            id: relation.id(),
            keys,
            vals,
            info,
            ..Default::default()
        };
        for member in relation.members() {
            message
                .roles_sid
                .push(self.strings.add(member.role) as i32);
            message.memids.push(delta.update(member.member_ref));
            message.types.push(member.member_type.to_pbf());
        }
        self.group_size += message.encoded_len() + MAX_VARINT_SIZE;
        self.relations.push(message);
    }

    /// Add an entity; the caller has checked [`can_add`](Self::can_add)
    ///
    /// # Errors
    /// [`OsmError::VersionOutOfRange`] if the version does not fit the
    /// format. The block is left untouched.
    pub fn add(&mut self, entity: &Entity<'_>) -> Result<()> {
        let version = if self.options.add_metadata {
            pbf_version(entity)?
        } else {
            0
        };
        match entity {
            Entity::Node(node) if self.kind == Some(GroupKind::DenseNodes) => {
                self.dense
                    .add_node(node, version, &mut self.strings, &self.options);
                self.group_size += dense_column_size(node);
            }
            Entity::Node(node) => self.add_node(node, version),
            Entity::Way(way) => self.add_way(way, version),
            Entity::Relation(relation) => self.add_relation(relation, version),
        }
        self.count += 1;
        Ok(())
    }

    /// Serialize the block and empty it
    ///
    /// Returns `None` if the block holds no entities.
    pub fn take(&mut self) -> Option<Vec<u8>> {
        if self.is_empty() {
            return None;
        }

        let mut group = proto::PrimitiveGroup::default();
        match self.kind {
            Some(GroupKind::DenseNodes) => group.dense = Some(self.dense.take(&self.options)),
            Some(GroupKind::Nodes) => group.nodes = mem::take(&mut self.nodes),
            Some(GroupKind::Ways) => group.ways = mem::take(&mut self.ways),
            Some(GroupKind::Relations) => group.relations = mem::take(&mut self.relations),
            None => {}
        }

        let block = proto::PrimitiveBlock {
            stringtable: proto::StringTable {
                s: self.strings.to_vec(),
            },
            primitivegroup: vec![group],
            granularity: Some(LOCATION_GRANULARITY as i32),
            date_granularity: Some(DATE_GRANULARITY),
            lat_offset: None,
            lon_offset: None,
        };

        tracing::trace!(
            "Finished block: {} entities, {} strings",
            self.count,
            self.strings.len()
        );
        if let Some(kind) = self.kind {
            self.reset(kind);
        }
        Some(block.encode_to_vec())
    }
}

/// Splits a stream of entities into serialized primitive blocks
#[derive(Debug)]
pub struct BlockEncoder {
    block: PrimitiveBlockBuilder,
}

impl BlockEncoder {
    pub fn new(options: PbfOptions) -> Self {
        BlockEncoder {
            block: PrimitiveBlockBuilder::new(options),
        }
    }

    pub fn options(&self) -> &PbfOptions {
        &self.block.options
    }

    /// Add one entity
    ///
    /// Returns the previous block, serialized, if the entity did not fit
    /// into it.
    ///
    /// # Errors
    /// [`OsmError::EntityTooLarge`] if the entity alone could exceed the
    /// maximum blob size, [`OsmError::VersionOutOfRange`] if its version
    /// does not fit the format. The current block is left untouched.
    pub fn push(&mut self, entity: &Entity<'_>) -> Result<Option<Vec<u8>>> {
        if self.block.options.add_metadata {
            pbf_version(entity)?;
        }
        let estimate = estimate_size(entity);
        if estimate > MAX_UNCOMPRESSED_BLOB_SIZE {
            return Err(OsmError::EntityTooLarge {
                id: entity.id(),
                size: estimate,
                max: MAX_UNCOMPRESSED_BLOB_SIZE,
            });
        }

        let kind = GroupKind::of(entity, &self.block.options);
        let overflows = self.block.size() + estimate > MAX_USED_BLOCK_SIZE;
        let mut finished = None;
        if !self.block.can_add(kind) || (overflows && !self.block.is_empty()) {
            finished = self.block.take();
            self.block.reset(kind);
        }

        self.block.add(entity)?;
        Ok(finished)
    }

    /// Serialize whatever is left
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.block.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Buffer;
    use crate::osm::{Location, MemberType, Metadata, NodeData, RelationData, WayData};

    fn decode(data: &[u8]) -> proto::PrimitiveBlock {
        proto::PrimitiveBlock::decode(data).unwrap()
    }

    #[test]
    fn test_lonlat_to_int() {
        assert_eq!(lonlat_to_int(1.0), 10_000_000);
        assert_eq!(lonlat_to_int(-179.999_999_9), -1_799_999_999);
        assert_eq!(fixed_to_int(123_456_789), 123_456_789);
        assert_eq!(fixed_to_int(-1), -1);
    }

    #[test]
    fn test_kind_change_finishes_block() {
        let mut buffer = Buffer::new();
        buffer.push_node(&NodeData::new(1, Location::new(0, 0))).unwrap();
        buffer.push_node(&NodeData::new(2, Location::new(1, 1))).unwrap();
        buffer.push_way(&WayData::new(10, vec![1, 2])).unwrap();

        let mut encoder = BlockEncoder::new(PbfOptions::default());
        let mut blocks = Vec::new();
        for entity in buffer.entities() {
            blocks.extend(encoder.push(&entity.unwrap()).unwrap());
        }
        blocks.extend(encoder.finish());

        assert_eq!(blocks.len(), 2);
        let nodes = decode(&blocks[0]);
        let dense = nodes.primitivegroup[0].dense.as_ref().unwrap();
        assert_eq!(dense.id, vec![1, 1]);
        assert_eq!(dense.lat, vec![0, 1]);
        assert_eq!(dense.keys_vals, vec![0, 0]);

        let ways = decode(&blocks[1]);
        assert_eq!(ways.primitivegroup[0].ways[0].refs, vec![1, 1]);
    }

    #[test]
    fn test_entity_limit_per_block() {
        let mut buffer = Buffer::new();
        for id in 1..=(MAX_ENTITIES_PER_BLOCK as i64 + 1) {
            buffer.push_node(&NodeData::new(id, Location::new(0, 0))).unwrap();
        }

        let mut encoder = BlockEncoder::new(PbfOptions::default());
        let mut blocks = Vec::new();
        for entity in buffer.entities() {
            blocks.extend(encoder.push(&entity.unwrap()).unwrap());
        }
        assert_eq!(blocks.len(), 1);
        blocks.extend(encoder.finish());
        assert_eq!(blocks.len(), 2);

        let first = decode(&blocks[0]);
        assert_eq!(
            first.primitivegroup[0].dense.as_ref().unwrap().id.len(),
            MAX_ENTITIES_PER_BLOCK
        );
        let second = decode(&blocks[1]);
        assert_eq!(second.primitivegroup[0].dense.as_ref().unwrap().id.len(), 1);
    }

    #[test]
    fn test_string_table_dedup_within_block() {
        let mut buffer = Buffer::new();
        for id in 1..=3 {
            let way = WayData {
                tags: vec![("highway".into(), "residential".into())],
                ..WayData::new(id, vec![])
            };
            buffer.push_way(&way).unwrap();
        }

        let options = PbfOptions {
            add_metadata: false,
            ..Default::default()
        };
        let mut encoder = BlockEncoder::new(options);
        for entity in buffer.entities() {
            assert!(encoder.push(&entity.unwrap()).unwrap().is_none());
        }
        let block = decode(&encoder.finish().unwrap());
        assert_eq!(
            block.stringtable.s,
            vec![b"".to_vec(), b"highway".to_vec(), b"residential".to_vec()]
        );
        for way in &block.primitivegroup[0].ways {
            assert_eq!(way.keys, vec![1]);
            assert_eq!(way.vals, vec![2]);
            assert!(way.info.is_none());
        }
    }

    #[test]
    fn test_relation_members_are_delta_coded() {
        let mut buffer = Buffer::new();
        buffer
            .push_relation(&RelationData::new(
                7,
                vec![
                    (MemberType::Way, 100, "outer".into()),
                    (MemberType::Way, 90, "inner".into()),
                    (MemberType::Node, 95, "outer".into()),
                ],
            ))
            .unwrap();

        let mut encoder = BlockEncoder::new(PbfOptions::default());
        let entity = buffer.entities().next().unwrap().unwrap();
        encoder.push(&entity).unwrap();
        let block = decode(&encoder.finish().unwrap());
        let relation = &block.primitivegroup[0].relations[0];

        assert_eq!(relation.memids, vec![100, -10, 5]);
        assert_eq!(relation.types, vec![1, 1, 0]);
        assert_eq!(relation.roles_sid[0], relation.roles_sid[2]);
        assert_ne!(relation.roles_sid[0], relation.roles_sid[1]);
    }

    #[test]
    fn test_visible_only_written_for_history() {
        let mut buffer = Buffer::new();
        buffer.push_node(&NodeData::new(1, Location::new(0, 0))).unwrap();
        let entity = buffer.entities().next().unwrap().unwrap();

        for (options, expected) in [(PbfOptions::default(), 0), (PbfOptions::history(), 1)] {
            let mut encoder = BlockEncoder::new(options);
            encoder.push(&entity).unwrap();
            let block = decode(&encoder.finish().unwrap());
            let dense = block.primitivegroup[0].dense.as_ref().unwrap();
            assert_eq!(dense.denseinfo.as_ref().unwrap().visible.len(), expected);
        }
    }

    #[test]
    fn test_oversized_entity_is_rejected() {
        let mut buffer = Buffer::new();
        buffer.push_node(&NodeData::new(1, Location::new(0, 0))).unwrap();
        let huge = NodeData {
            tags: vec![("note".into(), "x".repeat(MAX_UNCOMPRESSED_BLOB_SIZE))],
            ..NodeData::new(2, Location::new(0, 0))
        };
        buffer.push_node(&huge).unwrap();

        let mut encoder = BlockEncoder::new(PbfOptions::default());
        let mut entities = buffer.entities();
        encoder.push(&entities.next().unwrap().unwrap()).unwrap();
        let err = encoder.push(&entities.next().unwrap().unwrap()).unwrap_err();
        assert!(matches!(err, OsmError::EntityTooLarge { id: 2, .. }));

        // The block collected so far is intact
        let block = decode(&encoder.finish().unwrap());
        assert_eq!(block.primitivegroup[0].dense.as_ref().unwrap().id, vec![1]);
    }

    #[test]
    fn test_version_beyond_int32_is_rejected() {
        let mut buffer = Buffer::new();
        let mut node = NodeData::new(1, Location::new(0, 0));
        node.metadata = Some(Metadata {
            version: 3_000_000_000,
            timestamp: 1_600_000_000,
            changeset: 1,
            uid: 1,
            user: "a".into(),
        });
        buffer.push_node(&node).unwrap();

        let mut encoder = BlockEncoder::new(PbfOptions::default());
        let mut entities = buffer.entities();
        let err = encoder.push(&entities.next().unwrap().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            OsmError::VersionOutOfRange {
                id: 1,
                version: 3_000_000_000
            }
        ));
        assert!(encoder.finish().is_none());

        // Without metadata the version is never written
        let mut encoder = BlockEncoder::new(PbfOptions {
            add_metadata: false,
            ..PbfOptions::default()
        });
        let entity = buffer.entities().next().unwrap().unwrap();
        encoder.push(&entity).unwrap();
        assert!(encoder.finish().is_some());
    }

    #[test]
    fn test_size_limit_flushes_with_fresh_string_table() {
        const VALUE_LEN: usize = 512 * 1024;
        let mut buffer = Buffer::new();
        for id in 1..=80i64 {
            let way = WayData {
                tags: vec![("note".into(), format!("{:08}", id).repeat(VALUE_LEN / 8))],
                ..WayData::new(id, vec![id])
            };
            buffer.push_way(&way).unwrap();
        }

        let options = PbfOptions {
            add_metadata: false,
            ..PbfOptions::default()
        };
        let mut encoder = BlockEncoder::new(options);
        let mut blocks = Vec::new();
        for entity in buffer.entities() {
            blocks.extend(encoder.push(&entity.unwrap()).unwrap());
        }
        blocks.extend(encoder.finish());

        // Far below the entity limit, so only the size can split the blocks
        assert!(blocks.len() >= 2);
        let mut seen = std::collections::HashSet::new();
        let mut total = 0;
        for data in &blocks {
            assert!(data.len() < MAX_USED_BLOCK_SIZE, "block of {} bytes", data.len());
            let block = decode(data);
            let ways = &block.primitivegroup[0].ways;
            total += ways.len();

            // Ids restart with every block: "note" first, then the first value
            assert_eq!(block.stringtable.s[1], b"note".to_vec());
            assert_eq!(ways[0].keys, vec![1]);
            assert_eq!(ways[0].vals, vec![2]);
            assert_eq!(block.stringtable.s.len(), ways.len() + 2);

            for value in &block.stringtable.s[2..] {
                assert!(seen.insert(value.clone()), "string repeated across blocks");
            }
        }
        assert_eq!(total, 80);
    }

    #[test]
    fn test_dense_size_counts_tag_text_once() {
        let value = "x".repeat(100_000);
        let mut buffer = Buffer::new();
        let node = NodeData {
            tags: vec![("note".into(), value.clone())],
            ..NodeData::new(1, Location::new(0, 0))
        };
        buffer.push_node(&node).unwrap();
        let entity = buffer.entities().next().unwrap().unwrap();

        let mut dense = PrimitiveBlockBuilder::new(PbfOptions::default());
        dense.reset(GroupKind::DenseNodes);
        dense.add(&entity).unwrap();

        let mut plain = PrimitiveBlockBuilder::new(PbfOptions::default());
        plain.reset(GroupKind::Nodes);
        plain.add(&entity).unwrap();

        assert!(dense.size() >= value.len());
        assert!(dense.size() < value.len() + 1024, "dense size {}", dense.size());
        assert!(plain.size() < value.len() + 1024, "plain size {}", plain.size());
        assert!(dense.take().unwrap().len() <= value.len() + 1024);
    }
}
