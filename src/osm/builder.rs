//! Builds entity items in place
//!
//! A builder reserves the fixed part of the entity on creation and appends
//! sub-items as they are added. Nothing is visible to readers of the buffer
//! until [`ObjectBuilder::commit`]. Dropping a builder without committing
//! rolls the buffer back to its last commit.
//!
//! ```
//! use osmblock::{Buffer, EntityKind, Location, ObjectBuilder};
//!
//! # fn main() -> osmblock::Result<()> {
//! let mut buffer = Buffer::new();
//! let mut node = ObjectBuilder::new(&mut buffer, EntityKind::Node, 17, "alice")?;
//! node.set_version(3).set_timestamp(1_600_000_000);
//! node.set_location(Location::from_degrees(8.5, 47.4))?;
//! node.add_tags([("amenity", "cafe")])?;
//! let offset = node.commit()?;
//!
//! assert_eq!(buffer.entity(offset)?.id(), 17);
//! # Ok(())
//! # }
//! ```

use super::{
    fixed_size, EntityKind, Location, MemberType, CHANGESET_OFFSET, ID_OFFSET, LAT_OFFSET,
    LON_OFFSET, TIMESTAMP_OFFSET, UID_OFFSET, USER_LEN_OFFSET, VERSION_OFFSET,
};
use crate::error::{OsmError, Result};
use crate::memory::item::{
    FLAGS_OFFSET, FLAG_HAS_METADATA, FLAG_VISIBLE, SIZE_OFFSET, TYPE_OFFSET,
};
use crate::memory::{
    padded_length, read_i64, write_i32, write_i64, write_u32, Buffer, ItemType, ITEM_HEADER_SIZE,
};

const SUB_TAGS: u8 = 0b001;
const SUB_NODES: u8 = 0b010;
const SUB_MEMBERS: u8 = 0b100;

/// In-place builder for one node, way or relation
#[derive(Debug)]
pub struct ObjectBuilder<'b, 'a> {
    buffer: &'b mut Buffer<'a>,
    start: usize,
    kind: EntityKind,
    sub_items: u8,
    failed: bool,
    committed: bool,
}

impl<'b, 'a> ObjectBuilder<'b, 'a> {
    /// Start a new entity at the end of the buffer
    ///
    /// The entity is visible and has no metadata until one of the metadata
    /// setters is called. Nodes start with an undefined location.
    pub fn new(buffer: &'b mut Buffer<'a>, kind: EntityKind, id: i64, user: &str) -> Result<Self> {
        let user_len = u32::try_from(user.len())
            .map_err(|_| OsmError::InvalidOperation("user name too long"))?;
        let fixed = fixed_size(kind);
        let size = fixed + padded_length(user.len());

        let start = buffer.written();
        let window = buffer.reserve(size)?;
        write_u32(window, SIZE_OFFSET, size as u32);
        window[TYPE_OFFSET] = kind.item_type() as u8;
        window[FLAGS_OFFSET] = FLAG_VISIBLE;
        write_i64(window, ID_OFFSET, id);
        write_u32(window, USER_LEN_OFFSET, user_len);
        if kind == EntityKind::Node {
            let undefined = Location::undefined();
            write_i32(window, LON_OFFSET, undefined.x());
            write_i32(window, LAT_OFFSET, undefined.y());
        }
        window[fixed..fixed + user.len()].copy_from_slice(user.as_bytes());

        Ok(ObjectBuilder {
            buffer,
            start,
            kind,
            sub_items: 0,
            failed: false,
            committed: false,
        })
    }

    pub fn node(buffer: &'b mut Buffer<'a>, id: i64, user: &str) -> Result<Self> {
        Self::new(buffer, EntityKind::Node, id, user)
    }

    pub fn way(buffer: &'b mut Buffer<'a>, id: i64, user: &str) -> Result<Self> {
        Self::new(buffer, EntityKind::Way, id, user)
    }

    pub fn relation(buffer: &'b mut Buffer<'a>, id: i64, user: &str) -> Result<Self> {
        Self::new(buffer, EntityKind::Relation, id, user)
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    fn fixed_fields(&mut self) -> &mut [u8] {
        let start = self.start;
        &mut self.buffer.data_mut()[start..start + fixed_size(self.kind)]
    }

    fn mark_metadata(&mut self) {
        self.fixed_fields()[FLAGS_OFFSET] |= FLAG_HAS_METADATA;
    }

    pub fn set_version(&mut self, version: u32) -> &mut Self {
        write_u32(self.fixed_fields(), VERSION_OFFSET, version);
        self.mark_metadata();
        self
    }

    pub fn set_uid(&mut self, uid: i32) -> &mut Self {
        write_i32(self.fixed_fields(), UID_OFFSET, uid);
        self.mark_metadata();
        self
    }

    pub fn set_changeset(&mut self, changeset: i64) -> &mut Self {
        write_i64(self.fixed_fields(), CHANGESET_OFFSET, changeset);
        self.mark_metadata();
        self
    }

    /// Seconds since the epoch
    pub fn set_timestamp(&mut self, timestamp: i64) -> &mut Self {
        write_i64(self.fixed_fields(), TIMESTAMP_OFFSET, timestamp);
        self.mark_metadata();
        self
    }

    pub fn set_visible(&mut self, visible: bool) -> &mut Self {
        let flags = &mut self.fixed_fields()[FLAGS_OFFSET];
        if visible {
            *flags |= FLAG_VISIBLE;
        } else {
            *flags &= !FLAG_VISIBLE;
        }
        self
    }

    pub fn set_location(&mut self, location: Location) -> Result<&mut Self> {
        if self.kind != EntityKind::Node {
            return Err(OsmError::InvalidOperation("only nodes have a location"));
        }
        let fields = self.fixed_fields();
        write_i32(fields, LON_OFFSET, location.x());
        write_i32(fields, LAT_OFFSET, location.y());
        Ok(self)
    }

    fn claim(&mut self, bit: u8, name: &'static str) -> Result<()> {
        if self.sub_items & bit != 0 {
            return Err(OsmError::InvalidOperation(name));
        }
        self.sub_items |= bit;
        Ok(())
    }

    /// Reserve a sub-item header, returning its offset
    fn begin_sub_item(&mut self, item_type: ItemType) -> Result<usize> {
        let offset = self.buffer.written();
        let header = self.buffer.reserve(ITEM_HEADER_SIZE)?;
        header[TYPE_OFFSET] = item_type as u8;
        Ok(offset)
    }

    /// Pad the sub-item started at `offset` and store its size
    fn end_sub_item(&mut self, offset: usize) -> Result<()> {
        let length = self.buffer.written() - offset;
        let padding = padded_length(length) - length;
        self.buffer.reserve(padding)?;
        let size = u32::try_from(length + padding)
            .map_err(|_| OsmError::InvalidOperation("sub-item too large"))?;
        write_u32(self.buffer.data_mut(), offset + SIZE_OFFSET, size);
        Ok(())
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        let len = u32::try_from(value.len())
            .map_err(|_| OsmError::InvalidOperation("string too long"))?;
        let window = self.buffer.reserve(4 + value.len())?;
        write_u32(window, 0, len);
        window[4..].copy_from_slice(value.as_bytes());
        Ok(())
    }

    /// Add the tag list
    ///
    /// May be called once per entity.
    pub fn add_tags<I, K, V>(&mut self, tags: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.claim(SUB_TAGS, "tag list added twice")?;
        let written = self.write_tags(tags);
        self.check(written)
    }

    fn write_tags<I, K, V>(&mut self, tags: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let offset = self.begin_sub_item(ItemType::TagList)?;
        for (key, value) in tags {
            self.write_string(key.as_ref())?;
            self.write_string(value.as_ref())?;
        }
        self.end_sub_item(offset)
    }

    /// Add the node reference list of a way
    pub fn add_way_nodes<I>(&mut self, refs: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = i64>,
    {
        if self.kind != EntityKind::Way {
            return Err(OsmError::InvalidOperation("only ways have node references"));
        }
        self.claim(SUB_NODES, "way node list added twice")?;
        let written = self.write_way_nodes(refs);
        self.check(written)
    }

    fn write_way_nodes<I>(&mut self, refs: I) -> Result<()>
    where
        I: IntoIterator<Item = i64>,
    {
        let offset = self.begin_sub_item(ItemType::WayNodeList)?;
        for node_ref in refs {
            let window = self.buffer.reserve(8)?;
            write_i64(window, 0, node_ref);
        }
        self.end_sub_item(offset)
    }

    /// Add the member list of a relation
    pub fn add_members<I, S>(&mut self, members: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (MemberType, i64, S)>,
        S: AsRef<str>,
    {
        if self.kind != EntityKind::Relation {
            return Err(OsmError::InvalidOperation("only relations have members"));
        }
        self.claim(SUB_MEMBERS, "member list added twice")?;
        let written = self.write_members(members);
        self.check(written)
    }

    fn write_members<I, S>(&mut self, members: I) -> Result<()>
    where
        I: IntoIterator<Item = (MemberType, i64, S)>,
        S: AsRef<str>,
    {
        let offset = self.begin_sub_item(ItemType::RelationMemberList)?;
        for (member_type, member_ref, role) in members {
            let window = self.buffer.reserve(9)?;
            write_i64(window, 0, member_ref);
            window[8] = member_type.to_u8();
            self.write_string(role.as_ref())?;
        }
        self.end_sub_item(offset)
    }

    /// A sub-item that failed halfway poisons the builder; only a rollback
    /// can restore the buffer.
    fn check(&mut self, written: Result<()>) -> Result<&mut Self> {
        match written {
            Ok(()) => Ok(self),
            Err(err) => {
                self.failed = true;
                Err(err)
            }
        }
    }

    /// Finish the entity and commit the buffer
    ///
    /// Returns the offset of the entity. Fails and rolls back if an earlier
    /// `add_*` call returned an error.
    pub fn commit(mut self) -> Result<usize> {
        if self.failed {
            return Err(OsmError::InvalidOperation(
                "entity has an incomplete sub-item",
            ));
        }
        let size = self.buffer.written() - self.start;
        let size = u32::try_from(size).map_err(|_| OsmError::EntityTooLarge {
            id: read_i64(self.buffer.data_mut(), self.start + ID_OFFSET),
            size,
            max: u32::MAX as usize,
        })?;
        write_u32(self.fixed_fields(), SIZE_OFFSET, size);
        self.buffer.commit()?;
        self.committed = true;
        Ok(self.start)
    }
}

impl Drop for ObjectBuilder<'_, '_> {
    fn drop(&mut self) {
        if !self.committed {
            self.buffer.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::AutoGrow;
    use crate::osm::Entity;

    #[test]
    fn test_build_node() {
        let mut buffer = Buffer::with_capacity(1024, AutoGrow::No).unwrap();
        let mut node = ObjectBuilder::node(&mut buffer, 42, "mapper").unwrap();
        node.set_version(2)
            .set_uid(7)
            .set_changeset(99)
            .set_timestamp(1_500_000_000);
        node.set_location(Location::new(10, -20)).unwrap();
        node.add_tags([("name", "Somewhere"), ("ele", "")]).unwrap();
        let offset = node.commit().unwrap();

        assert_eq!(offset, 0);
        assert!(buffer.is_aligned());
        let Entity::Node(node) = buffer.entity(offset).unwrap() else {
            panic!("expected a node");
        };
        assert_eq!(node.id(), 42);
        assert_eq!(node.version(), 2);
        assert_eq!(node.uid(), 7);
        assert_eq!(node.changeset(), 99);
        assert_eq!(node.timestamp(), 1_500_000_000);
        assert_eq!(node.user(), "mapper");
        assert!(node.visible());
        assert!(node.has_metadata());
        assert_eq!(node.location(), Location::new(10, -20));
        let tags: Vec<_> = node.tags().map(|t| (t.key, t.value)).collect();
        assert_eq!(tags, vec![("name", "Somewhere"), ("ele", "")]);
    }

    #[test]
    fn test_build_way_and_relation() {
        let mut buffer = Buffer::new();

        let mut way = ObjectBuilder::way(&mut buffer, 5, "").unwrap();
        way.add_way_nodes([1, 2, -3]).unwrap();
        way.set_visible(false);
        let way_offset = way.commit().unwrap();

        let mut rel = ObjectBuilder::relation(&mut buffer, 9, "u").unwrap();
        rel.add_members([(MemberType::Way, 5, "outer"), (MemberType::Node, 1, "")])
            .unwrap();
        let rel_offset = rel.commit().unwrap();

        match buffer.entity(way_offset).unwrap() {
            Entity::Way(way) => {
                assert_eq!(way.nodes().collect::<Vec<_>>(), vec![1, 2, -3]);
                assert!(!way.visible());
                assert!(!way.has_metadata());
                assert_eq!(way.tags().count(), 0);
            }
            other => panic!("unexpected {:?}", other.kind()),
        }
        match buffer.entity(rel_offset).unwrap() {
            Entity::Relation(rel) => {
                let members: Vec<_> = rel
                    .members()
                    .map(|m| (m.member_type, m.member_ref, m.role))
                    .collect();
                assert_eq!(
                    members,
                    vec![(MemberType::Way, 5, "outer"), (MemberType::Node, 1, "")]
                );
            }
            other => panic!("unexpected {:?}", other.kind()),
        }
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let mut buffer = Buffer::new();
        ObjectBuilder::node(&mut buffer, 1, "a")
            .unwrap()
            .commit()
            .unwrap();
        let committed = buffer.committed();
        {
            let mut node = ObjectBuilder::node(&mut buffer, 2, "b").unwrap();
            node.add_tags([("k", "v")]).unwrap();
        }
        assert_eq!(buffer.written(), committed);
        assert_eq!(buffer.entities().count(), 1);
    }

    #[test]
    fn test_kind_specific_operations() {
        let mut buffer = Buffer::new();
        let mut way = ObjectBuilder::way(&mut buffer, 1, "").unwrap();
        assert!(matches!(
            way.set_location(Location::new(0, 0)),
            Err(OsmError::InvalidOperation(_))
        ));
        assert!(way.add_members([(MemberType::Node, 1, "")]).is_err());
        way.add_tags::<_, &str, &str>([]).unwrap();
        assert!(way.add_tags([("a", "b")]).is_err());
    }

    #[test]
    fn test_full_fixed_buffer_reports_error() {
        let mut buffer = Buffer::with_capacity(64, AutoGrow::No).unwrap();
        let mut node = ObjectBuilder::node(&mut buffer, 1, "").unwrap();
        let err = node
            .add_tags([("a-rather-long-key", "and-a-value-that-does-not-fit")])
            .unwrap_err();
        assert!(matches!(err, OsmError::BufferFull { .. }));
        drop(node);
        assert_eq!(buffer.written(), 0);
    }

    #[test]
    fn test_commit_after_failed_sub_item_is_rejected() {
        let mut buffer = Buffer::with_capacity(128, AutoGrow::No).unwrap();
        let mut way = ObjectBuilder::way(&mut buffer, 7, "").unwrap();
        assert!(matches!(
            way.add_way_nodes(1..=20),
            Err(OsmError::BufferFull { .. })
        ));
        assert!(matches!(
            way.commit(),
            Err(OsmError::InvalidOperation(_))
        ));

        assert_eq!(buffer.written(), 0);
        assert_eq!(buffer.committed(), 0);
        assert_eq!(buffer.entities().count(), 0);

        // The buffer is still usable afterwards
        let mut way = ObjectBuilder::way(&mut buffer, 8, "").unwrap();
        way.add_way_nodes([1, 2]).unwrap();
        let offset = way.commit().unwrap();
        assert_eq!(buffer.entity(offset).unwrap().id(), 8);
    }
}
