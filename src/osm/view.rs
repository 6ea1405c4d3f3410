//! Read-only views over entity items
//!
//! [`Entity::from_item`] validates the whole item once: fixed fields, user
//! name, sub-item headers and every string and member inside them. After
//! that the accessors are infallible.

use std::ops::Deref;

use super::{
    fixed_size, EntityKind, Location, MemberType, CHANGESET_OFFSET, ID_OFFSET, LAT_OFFSET,
    LON_OFFSET, MIN_MEMBER_SIZE, MIN_TAG_SIZE, TIMESTAMP_OFFSET, UID_OFFSET, USER_LEN_OFFSET,
    VERSION_OFFSET,
};
use crate::error::{OsmError, Result};
use crate::memory::item::{FLAG_HAS_METADATA, FLAG_VISIBLE};
use crate::memory::{
    padded_length, read_i32, read_i64, read_u32, ItemRef, ItemType, Items, ITEM_HEADER_SIZE,
};

/// A key/value tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag<'a> {
    pub key: &'a str,
    pub value: &'a str,
}

/// A relation member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member<'a> {
    pub member_type: MemberType,
    pub member_ref: i64,
    pub role: &'a str,
}

/// Fields shared by all entity kinds
#[derive(Debug, Clone, Copy)]
pub struct ObjectRef<'a> {
    item: ItemRef<'a>,
    kind: EntityKind,
    user: &'a str,
    tags: &'a [u8],
    nodes: &'a [u8],
    members: &'a [u8],
}

impl<'a> ObjectRef<'a> {
    fn parse(item: ItemRef<'a>) -> Result<Self> {
        let kind = EntityKind::from_item_type(item.item_type()).ok_or_else(|| {
            OsmError::corrupt(item.offset(), "sub-item found where an entity was expected")
        })?;
        let data = item.as_bytes();
        let fixed = fixed_size(kind);
        if data.len() < fixed {
            return Err(OsmError::corrupt(
                item.offset(),
                format!("{} item shorter than its fixed fields", kind),
            ));
        }

        let user_len = read_u32(data, USER_LEN_OFFSET) as usize;
        let sub_start = fixed + padded_length(user_len);
        if sub_start > data.len() {
            return Err(OsmError::corrupt(item.offset(), "user name runs past the item"));
        }
        let user = std::str::from_utf8(&data[fixed..fixed + user_len])?;

        let mut view = ObjectRef {
            item,
            kind,
            user,
            tags: &[],
            nodes: &[],
            members: &[],
        };

        for sub_item in Items::new(data, sub_start) {
            let sub_item = sub_item.map_err(|e| relocate(e, item.offset()))?;
            let payload = &sub_item.as_bytes()[ITEM_HEADER_SIZE..];
            let slot = match (sub_item.item_type(), kind) {
                (ItemType::TagList, _) => {
                    validate_tags(payload, item.offset())?;
                    &mut view.tags
                }
                (ItemType::WayNodeList, EntityKind::Way) => &mut view.nodes,
                (ItemType::RelationMemberList, EntityKind::Relation) => {
                    validate_members(payload, item.offset())?;
                    &mut view.members
                }
                (other, _) => {
                    return Err(OsmError::corrupt(
                        item.offset(),
                        format!("unexpected {:?} sub-item in a {}", other, kind),
                    ))
                }
            };
            if !slot.is_empty() {
                return Err(OsmError::corrupt(item.offset(), "duplicate sub-item"));
            }
            *slot = payload;
        }

        Ok(view)
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn item(&self) -> ItemRef<'a> {
        self.item
    }

    /// Offset of the entity in its buffer
    pub fn offset(&self) -> usize {
        self.item.offset()
    }

    pub fn padded_size(&self) -> usize {
        self.item.padded_size()
    }

    fn data(&self) -> &'a [u8] {
        self.item.as_bytes()
    }

    pub fn id(&self) -> i64 {
        read_i64(self.data(), ID_OFFSET)
    }

    pub fn version(&self) -> u32 {
        read_u32(self.data(), VERSION_OFFSET)
    }

    pub fn uid(&self) -> i32 {
        read_i32(self.data(), UID_OFFSET)
    }

    pub fn changeset(&self) -> i64 {
        read_i64(self.data(), CHANGESET_OFFSET)
    }

    /// Seconds since the epoch
    pub fn timestamp(&self) -> i64 {
        read_i64(self.data(), TIMESTAMP_OFFSET)
    }

    pub fn user(&self) -> &'a str {
        self.user
    }

    pub fn visible(&self) -> bool {
        self.item.flags() & FLAG_VISIBLE != 0
    }

    pub fn has_metadata(&self) -> bool {
        self.item.flags() & FLAG_HAS_METADATA != 0
    }

    pub fn removed(&self) -> bool {
        self.item.removed()
    }

    pub fn tags(&self) -> Tags<'a> {
        Tags {
            payload: self.tags,
            pos: 0,
        }
    }
}

/// Sub-item errors are reported at the offset of the owning entity
fn relocate(err: OsmError, entity_offset: usize) -> OsmError {
    match err {
        OsmError::CorruptItem { offset, reason } => OsmError::CorruptItem {
            offset: entity_offset,
            reason: format!("sub-item at +{}: {}", offset, reason),
        },
        other => other,
    }
}

/// Check a length-prefixed string at `pos`, returning the position after it
fn check_string(payload: &[u8], pos: usize, entity_offset: usize) -> Result<usize> {
    if pos + 4 > payload.len() {
        return Err(OsmError::corrupt(entity_offset, "string length runs past the list"));
    }
    let len = read_u32(payload, pos) as usize;
    let end = pos + 4 + len;
    if end > payload.len() {
        return Err(OsmError::corrupt(entity_offset, "string runs past the list"));
    }
    std::str::from_utf8(&payload[pos + 4..end])?;
    Ok(end)
}

fn validate_tags(payload: &[u8], entity_offset: usize) -> Result<()> {
    let mut pos = 0;
    while payload.len() - pos >= MIN_TAG_SIZE {
        pos = check_string(payload, pos, entity_offset)?;
        pos = check_string(payload, pos, entity_offset)?;
    }
    Ok(())
}

fn validate_members(payload: &[u8], entity_offset: usize) -> Result<()> {
    let mut pos = 0;
    while payload.len() - pos >= MIN_MEMBER_SIZE {
        MemberType::from_u8(payload[pos + 8])?;
        pos = check_string(payload, pos + 9, entity_offset)?;
    }
    Ok(())
}

/// Read a string already checked during validation
fn read_string(payload: &[u8], pos: usize) -> (&str, usize) {
    let len = read_u32(payload, pos) as usize;
    let end = pos + 4 + len;
    let value = std::str::from_utf8(&payload[pos + 4..end]).unwrap_or_default();
    (value, end)
}

/// Iterator over the tags of an entity
#[derive(Debug, Clone)]
pub struct Tags<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> Tags<'a> {
    /// Value of the first tag with the given key
    pub fn get(self, key: &str) -> Option<&'a str> {
        self.into_iter()
            .find(|tag| tag.key == key)
            .map(|tag| tag.value)
    }
}

impl<'a> Iterator for Tags<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Tag<'a>> {
        if self.payload.len() - self.pos < MIN_TAG_SIZE {
            return None;
        }
        let (key, pos) = read_string(self.payload, self.pos);
        let (value, pos) = read_string(self.payload, pos);
        self.pos = pos;
        Some(Tag { key, value })
    }
}

/// Iterator over the node references of a way
#[derive(Debug, Clone)]
pub struct WayNodes<'a> {
    payload: &'a [u8],
}

impl Iterator for WayNodes<'_> {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        if self.payload.len() < 8 {
            return None;
        }
        let value = read_i64(self.payload, 0);
        self.payload = &self.payload[8..];
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.payload.len() / 8;
        (len, Some(len))
    }
}

impl ExactSizeIterator for WayNodes<'_> {}

/// Iterator over the members of a relation
#[derive(Debug, Clone)]
pub struct Members<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Members<'a> {
    type Item = Member<'a>;

    fn next(&mut self) -> Option<Member<'a>> {
        if self.payload.len() - self.pos < MIN_MEMBER_SIZE {
            return None;
        }
        let member_ref = read_i64(self.payload, self.pos);
        let member_type = MemberType::from_u8(self.payload[self.pos + 8]).ok()?;
        let (role, pos) = read_string(self.payload, self.pos + 9);
        self.pos = pos;
        Some(Member {
            member_type,
            member_ref,
            role,
        })
    }
}

/// View of a node
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a>(ObjectRef<'a>);

impl NodeRef<'_> {
    pub fn location(&self) -> Location {
        let data = self.0.data();
        Location::new(read_i32(data, LON_OFFSET), read_i32(data, LAT_OFFSET))
    }
}

impl<'a> Deref for NodeRef<'a> {
    type Target = ObjectRef<'a>;

    fn deref(&self) -> &ObjectRef<'a> {
        &self.0
    }
}

/// View of a way
#[derive(Debug, Clone, Copy)]
pub struct WayRef<'a>(ObjectRef<'a>);

impl<'a> WayRef<'a> {
    pub fn nodes(&self) -> WayNodes<'a> {
        WayNodes {
            payload: self.0.nodes,
        }
    }
}

impl<'a> Deref for WayRef<'a> {
    type Target = ObjectRef<'a>;

    fn deref(&self) -> &ObjectRef<'a> {
        &self.0
    }
}

/// View of a relation
#[derive(Debug, Clone, Copy)]
pub struct RelationRef<'a>(ObjectRef<'a>);

impl<'a> RelationRef<'a> {
    pub fn members(&self) -> Members<'a> {
        Members {
            payload: self.0.members,
            pos: 0,
        }
    }
}

impl<'a> Deref for RelationRef<'a> {
    type Target = ObjectRef<'a>;

    fn deref(&self) -> &ObjectRef<'a> {
        &self.0
    }
}

/// Any entity
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Node(NodeRef<'a>),
    Way(WayRef<'a>),
    Relation(RelationRef<'a>),
}

impl<'a> Entity<'a> {
    /// Validate an item and wrap it in the matching view
    pub fn from_item(item: ItemRef<'a>) -> Result<Self> {
        let object = ObjectRef::parse(item)?;
        Ok(match object.kind {
            EntityKind::Node => Entity::Node(NodeRef(object)),
            EntityKind::Way => Entity::Way(WayRef(object)),
            EntityKind::Relation => Entity::Relation(RelationRef(object)),
        })
    }

    pub fn object(&self) -> &ObjectRef<'a> {
        match self {
            Entity::Node(node) => &node.0,
            Entity::Way(way) => &way.0,
            Entity::Relation(relation) => &relation.0,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.object().kind()
    }

    pub fn id(&self) -> i64 {
        self.object().id()
    }
}

/// Iterator over the entities of a buffer
///
/// Stops after the first item that fails validation.
#[derive(Debug, Clone)]
pub struct Entities<'a> {
    items: Items<'a>,
}

impl<'a> Entities<'a> {
    pub(crate) fn new(items: Items<'a>) -> Self {
        Entities { items }
    }
}

impl<'a> Iterator for Entities<'a> {
    type Item = Result<Entity<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = match self.items.next()? {
            Ok(item) => item,
            Err(e) => return Some(Err(e)),
        };
        let entity = Entity::from_item(item);
        if entity.is_err() {
            // Exhaust the underlying iterator
            self.items = Items::new(&[], 0);
        }
        Some(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::item::TYPE_OFFSET;
    use crate::memory::{write_u32, Buffer};
    use crate::osm::ObjectBuilder;

    fn way_buffer() -> Buffer<'static> {
        let mut buffer = Buffer::new();
        let mut way = ObjectBuilder::way(&mut buffer, 10, "user").unwrap();
        way.add_tags([("highway", "residential"), ("name", "Main Street")])
            .unwrap();
        way.add_way_nodes([4, 5, 6]).unwrap();
        way.commit().unwrap();
        buffer
    }

    #[test]
    fn test_tags_lookup() {
        let buffer = way_buffer();
        let entity = buffer.entity(0).unwrap();
        let tags = entity.object().tags();
        assert_eq!(tags.clone().get("name"), Some("Main Street"));
        assert_eq!(tags.get("oneway"), None);
    }

    #[test]
    fn test_way_nodes_exact_size() {
        let buffer = way_buffer();
        let Entity::Way(way) = buffer.entity(0).unwrap() else {
            panic!("expected a way");
        };
        assert_eq!(way.nodes().len(), 3);
    }

    #[test]
    fn test_corrupt_sub_item_is_rejected() {
        let buffer = way_buffer();
        let mut bytes = buffer.as_bytes().to_vec();
        // First sub-item starts after the 48 fixed bytes and the padded user name
        let sub_start = 48 + 8;
        bytes[sub_start + TYPE_OFFSET] = ItemType::RelationMemberList as u8;

        let corrupt = Buffer::from_slice(&mut bytes).unwrap();
        let err = corrupt.entity(0).unwrap_err();
        assert!(matches!(err, OsmError::CorruptItem { offset: 0, .. }));
    }

    #[test]
    fn test_string_past_list_end_is_rejected() {
        let buffer = way_buffer();
        let mut bytes = buffer.as_bytes().to_vec();
        let first_key_len = 48 + 8 + ITEM_HEADER_SIZE;
        write_u32(&mut bytes, first_key_len, 1000);

        let corrupt = Buffer::from_slice(&mut bytes).unwrap();
        assert!(corrupt.entity(0).is_err());
        let results: Vec<_> = corrupt.entities().collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_sub_item_is_not_an_entity() {
        let mut bytes = vec![0u8; 8];
        write_u32(&mut bytes, 0, 8);
        bytes[TYPE_OFFSET] = ItemType::TagList as u8;
        let buffer = Buffer::from_slice(&mut bytes).unwrap();
        assert!(buffer.entity(0).is_err());
    }
}
