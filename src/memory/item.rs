//! Item header and validated item iteration
//!
//! Layout of the 8-byte header every item starts with:
//!
//! ```text
//! [size: u32][type: u8][flags: u8][reserved: u16]
//! ```
//!
//! `size` is the padded size of the item including all nested sub-items.

use super::{is_aligned, read_u32};
use crate::error::{OsmError, Result};

/// Size of the header in front of every item
pub const ITEM_HEADER_SIZE: usize = 8;

pub(crate) const SIZE_OFFSET: usize = 0;
pub(crate) const TYPE_OFFSET: usize = 4;
pub(crate) const FLAGS_OFFSET: usize = 5;

/// Item flag: the item has been marked for removal by `purge_removed`
pub(crate) const FLAG_REMOVED: u8 = 0b0000_0001;
/// Item flag: the object is visible (not deleted in a history file)
pub(crate) const FLAG_VISIBLE: u8 = 0b0000_0010;
/// Item flag: the object carries version/timestamp/changeset/user
pub(crate) const FLAG_HAS_METADATA: u8 = 0b0000_0100;

/// Types of items stored in a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ItemType {
    Node = 0x01,
    Way = 0x02,
    Relation = 0x03,
    TagList = 0x11,
    WayNodeList = 0x12,
    RelationMemberList = 0x13,
}

impl ItemType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(ItemType::Node),
            0x02 => Ok(ItemType::Way),
            0x03 => Ok(ItemType::Relation),
            0x11 => Ok(ItemType::TagList),
            0x12 => Ok(ItemType::WayNodeList),
            0x13 => Ok(ItemType::RelationMemberList),
            _ => Err(OsmError::InvalidItemType(value)),
        }
    }

    /// Whether items of this type may appear at the top level of a buffer
    pub fn is_entity(self) -> bool {
        matches!(self, ItemType::Node | ItemType::Way | ItemType::Relation)
    }
}

/// A validated view of one item
///
/// The slice covers exactly the item's padded size. Constructing an `ItemRef`
/// checks that the declared size is sane and lies within the readable range.
#[derive(Debug, Clone, Copy)]
pub struct ItemRef<'a> {
    offset: usize,
    data: &'a [u8],
    item_type: ItemType,
}

impl<'a> ItemRef<'a> {
    /// Parse the item starting at `offset` inside `region`
    ///
    /// `region` must end at the last readable byte (the committed end for a
    /// buffer, the parent's end for a sub-item).
    pub fn parse(region: &'a [u8], offset: usize) -> Result<Self> {
        match offset.checked_add(ITEM_HEADER_SIZE) {
            Some(end) if end <= region.len() => {}
            _ => return Err(OsmError::corrupt(offset, "item header runs past the end")),
        }

        let size = read_u32(region, offset + SIZE_OFFSET) as usize;
        if size < ITEM_HEADER_SIZE {
            return Err(OsmError::corrupt(
                offset,
                format!("declared size {} is smaller than the header", size),
            ));
        }
        if !is_aligned(size) {
            return Err(OsmError::corrupt(
                offset,
                format!("declared size {} is not aligned", size),
            ));
        }
        let end = match offset.checked_add(size) {
            Some(end) if end <= region.len() => end,
            _ => {
                return Err(OsmError::corrupt(
                    offset,
                    format!(
                        "declared size {} exceeds the {} readable bytes",
                        size,
                        region.len() - offset
                    ),
                ))
            }
        };

        let item_type = ItemType::from_u8(region[offset + TYPE_OFFSET])?;

        Ok(ItemRef {
            offset,
            data: &region[offset..end],
            item_type,
        })
    }

    /// Offset of this item inside the region it was parsed from
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn item_type(&self) -> ItemType {
        self.item_type
    }

    /// Padded size of the item, header and sub-items included
    pub fn padded_size(&self) -> usize {
        self.data.len()
    }

    pub fn flags(&self) -> u8 {
        self.data[FLAGS_OFFSET]
    }

    pub fn removed(&self) -> bool {
        self.flags() & FLAG_REMOVED != 0
    }

    /// Raw bytes of the item
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }
}

/// Iterator over consecutive items in `[pos, end)` of a region
///
/// Yields an error and stops as soon as an item fails validation; nothing
/// past a corrupt item can be located.
#[derive(Debug, Clone)]
pub struct Items<'a> {
    region: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> Items<'a> {
    pub(crate) fn new(region: &'a [u8], start: usize) -> Self {
        Items {
            region,
            pos: start,
            failed: false,
        }
    }

    /// Offset of the next item to be returned
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for Items<'a> {
    type Item = Result<ItemRef<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.region.len() {
            return None;
        }

        match ItemRef::parse(self.region, self.pos) {
            Ok(item) => {
                self.pos += item.padded_size();
                Some(Ok(item))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for Items<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::write_u32;

    fn raw_item(size: u32, item_type: u8) -> Vec<u8> {
        let mut bytes = vec![0u8; size.max(8) as usize];
        write_u32(&mut bytes, 0, size);
        bytes[TYPE_OFFSET] = item_type;
        bytes
    }

    #[test]
    fn test_item_type_conversion() {
        assert_eq!(ItemType::from_u8(1).unwrap(), ItemType::Node);
        assert_eq!(ItemType::from_u8(0x13).unwrap(), ItemType::RelationMemberList);
        assert!(matches!(
            ItemType::from_u8(99),
            Err(OsmError::InvalidItemType(99))
        ));
        assert!(ItemType::Way.is_entity());
        assert!(!ItemType::TagList.is_entity());
    }

    #[test]
    fn test_parse_valid_item() {
        let bytes = raw_item(16, 0x01);
        let item = ItemRef::parse(&bytes, 0).unwrap();
        assert_eq!(item.padded_size(), 16);
        assert_eq!(item.item_type(), ItemType::Node);
        assert!(!item.removed());
    }

    #[test]
    fn test_parse_rejects_bad_sizes() {
        // smaller than a header
        let bytes = raw_item(4, 0x01);
        assert!(matches!(
            ItemRef::parse(&bytes, 0),
            Err(OsmError::CorruptItem { .. })
        ));

        // unaligned
        let mut bytes = raw_item(16, 0x01);
        write_u32(&mut bytes, 0, 12);
        assert!(ItemRef::parse(&bytes, 0).is_err());

        // past the end
        let mut bytes = raw_item(16, 0x01);
        write_u32(&mut bytes, 0, 24);
        assert!(ItemRef::parse(&bytes, 0).is_err());
    }

    #[test]
    fn test_iteration_stops_at_corruption() {
        let mut region = raw_item(8, 0x01);
        region.extend(raw_item(16, 0x02));
        region.extend(raw_item(8, 0x77));
        region.extend(raw_item(8, 0x01));

        let results: Vec<_> = Items::new(&region, 0).collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().unwrap().offset(), 8);
        assert!(results[2].is_err());
    }

    #[test]
    fn test_empty_region_yields_nothing() {
        assert_eq!(Items::new(&[], 0).count(), 0);
    }

    #[test]
    fn test_parse_rejects_offsets_near_usize_max() {
        let bytes = raw_item(16, 0x01);
        for offset in [usize::MAX, usize::MAX - 7, usize::MAX - ITEM_HEADER_SIZE + 1] {
            assert!(matches!(
                ItemRef::parse(&bytes, offset),
                Err(OsmError::CorruptItem { .. })
            ));
        }
    }
}
