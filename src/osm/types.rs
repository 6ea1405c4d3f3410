//! Entity kinds, relation member types and the entity filter

use std::fmt;
use std::ops::{BitAnd, BitOr};

use serde::{Deserialize, Serialize};

use crate::error::{OsmError, Result};
use crate::memory::ItemType;

/// The three kinds of OSM entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Node,
    Way,
    Relation,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Node => "node",
            EntityKind::Way => "way",
            EntityKind::Relation => "relation",
        }
    }

    pub fn item_type(self) -> ItemType {
        match self {
            EntityKind::Node => ItemType::Node,
            EntityKind::Way => ItemType::Way,
            EntityKind::Relation => ItemType::Relation,
        }
    }

    pub fn from_item_type(item_type: ItemType) -> Option<Self> {
        match item_type {
            ItemType::Node => Some(EntityKind::Node),
            ItemType::Way => Some(EntityKind::Way),
            ItemType::Relation => Some(EntityKind::Relation),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entity a relation member refers to
///
/// Stored in buffers as the item type code of the referenced kind and in PBF
/// files as `0 = node, 1 = way, 2 = relation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberType {
    Node,
    Way,
    Relation,
}

impl MemberType {
    pub(crate) fn to_u8(self) -> u8 {
        self.kind().item_type() as u8
    }

    pub(crate) fn from_u8(value: u8) -> Result<Self> {
        let item_type = ItemType::from_u8(value)?;
        EntityKind::from_item_type(item_type)
            .map(MemberType::from)
            .ok_or(OsmError::InvalidMemberType(i32::from(value)))
    }

    pub fn from_pbf(value: i32) -> Result<Self> {
        match value {
            0 => Ok(MemberType::Node),
            1 => Ok(MemberType::Way),
            2 => Ok(MemberType::Relation),
            _ => Err(OsmError::InvalidMemberType(value)),
        }
    }

    pub fn to_pbf(self) -> i32 {
        match self {
            MemberType::Node => 0,
            MemberType::Way => 1,
            MemberType::Relation => 2,
        }
    }

    pub fn kind(self) -> EntityKind {
        match self {
            MemberType::Node => EntityKind::Node,
            MemberType::Way => EntityKind::Way,
            MemberType::Relation => EntityKind::Relation,
        }
    }
}

impl From<EntityKind> for MemberType {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Node => MemberType::Node,
            EntityKind::Way => MemberType::Way,
            EntityKind::Relation => MemberType::Relation,
        }
    }
}

/// Set of entity kinds, used to skip unwanted groups while decoding
///
/// Deserializes from strings such as `"nwr"`, `"nodes"`, `"all"` or
/// `"nothing"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct EntityBits(u8);

impl EntityBits {
    pub const NOTHING: EntityBits = EntityBits(0);
    pub const NODE: EntityBits = EntityBits(0b001);
    pub const WAY: EntityBits = EntityBits(0b010);
    pub const RELATION: EntityBits = EntityBits(0b100);
    pub const ALL: EntityBits = EntityBits(0b111);

    pub fn contains(self, kind: EntityKind) -> bool {
        self & EntityBits::from(kind) != EntityBits::NOTHING
    }

    pub fn is_empty(self) -> bool {
        self == EntityBits::NOTHING
    }
}

impl Default for EntityBits {
    fn default() -> Self {
        EntityBits::ALL
    }
}

impl From<EntityKind> for EntityBits {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Node => EntityBits::NODE,
            EntityKind::Way => EntityBits::WAY,
            EntityKind::Relation => EntityBits::RELATION,
        }
    }
}

impl BitOr for EntityBits {
    type Output = EntityBits;

    fn bitor(self, rhs: Self) -> Self {
        EntityBits(self.0 | rhs.0)
    }
}

impl BitAnd for EntityBits {
    type Output = EntityBits;

    fn bitand(self, rhs: Self) -> Self {
        EntityBits(self.0 & rhs.0)
    }
}

impl TryFrom<String> for EntityBits {
    type Error = OsmError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl std::str::FromStr for EntityBits {
    type Err = OsmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => return Ok(EntityBits::ALL),
            "nothing" | "none" | "" => return Ok(EntityBits::NOTHING),
            "nodes" => return Ok(EntityBits::NODE),
            "ways" => return Ok(EntityBits::WAY),
            "relations" => return Ok(EntityBits::RELATION),
            _ => {}
        }

        s.trim().chars().try_fold(EntityBits::NOTHING, |bits, c| {
            match c.to_ascii_lowercase() {
                'n' => Ok(bits | EntityBits::NODE),
                'w' => Ok(bits | EntityBits::WAY),
                'r' => Ok(bits | EntityBits::RELATION),
                _ => Err(OsmError::InvalidFilter(s.to_string())),
            }
        })
    }
}
