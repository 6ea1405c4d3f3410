//! OSM entities stored as buffer items
//!
//! - [`builder`] - writes nodes, ways and relations straight into a [`Buffer`](crate::Buffer)
//! - [`view`] - validated read-only views over committed entity items
//! - [`data`] - owned entity values for producing entities from other sources
//! - [`location`] - fixed-point coordinates
//! - [`types`] - entity kinds, member types and the entity filter
//!
//! ## Entity layout
//!
//! ```text
//! offset  size  field
//!      0     8  item header (size, type, flags)
//!      8     8  id            i64
//!     16     4  version       u32
//!     20     4  uid           i32
//!     24     8  changeset     i64
//!     32     8  timestamp     i64, seconds since the epoch
//!     40     4  user length   u32
//!     44     4  reserved
//!     48     8  lon, lat      i32 each (nodes only)
//!   48/56     -  user name, padded to 8
//!      -     -  sub-items: tag list, way node list, member list
//! ```

pub mod builder;
pub mod data;
pub mod location;
pub mod types;
pub mod view;

pub use builder::ObjectBuilder;
pub use data::{EntityData, Metadata, NodeData, RelationData, WayData};
pub use location::{Location, COORDINATE_PRECISION};
pub use types::{EntityBits, EntityKind, MemberType};
pub use view::{
    Entities, Entity, Member, Members, NodeRef, ObjectRef, RelationRef, Tag, Tags, WayNodes,
    WayRef,
};

pub(crate) const ID_OFFSET: usize = 8;
pub(crate) const VERSION_OFFSET: usize = 16;
pub(crate) const UID_OFFSET: usize = 20;
pub(crate) const CHANGESET_OFFSET: usize = 24;
pub(crate) const TIMESTAMP_OFFSET: usize = 32;
pub(crate) const USER_LEN_OFFSET: usize = 40;
pub(crate) const LON_OFFSET: usize = 48;
pub(crate) const LAT_OFFSET: usize = 52;

/// Fixed part of ways and relations
pub(crate) const OBJECT_FIXED_SIZE: usize = 48;
/// Fixed part of nodes
pub(crate) const NODE_FIXED_SIZE: usize = 56;

/// Smallest encoding of one tag: two empty length-prefixed strings
pub(crate) const MIN_TAG_SIZE: usize = 8;
/// Smallest encoding of one member: ref, type and an empty role
pub(crate) const MIN_MEMBER_SIZE: usize = 13;

pub(crate) const fn fixed_size(kind: EntityKind) -> usize {
    match kind {
        EntityKind::Node => NODE_FIXED_SIZE,
        EntityKind::Way | EntityKind::Relation => OBJECT_FIXED_SIZE,
    }
}
