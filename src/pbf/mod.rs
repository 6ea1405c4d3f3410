//! OSM PBF block codec
//!
//! Read path: [`blob::read_frame`] → [`blob::decode_blob`] →
//! [`decoder::decode_primitive_block`] (or [`header::decode_header_block`]
//! for the first frame). The write path mirrors it with
//! [`block::BlockEncoder`], [`header::encode_header_block`] and
//! [`blob::encode_frame`].

pub mod blob;
pub mod block;
pub mod decoder;
pub mod delta;
pub mod header;
pub mod proto;
pub mod string_table;

pub use blob::{
    decode_blob, encode_frame, read_frame, BlobType, Frame, MAX_BLOB_HEADER_SIZE,
    MAX_UNCOMPRESSED_BLOB_SIZE,
};
pub use block::{
    lonlat_to_int, BlockEncoder, GroupKind, PrimitiveBlockBuilder, MAX_ENTITIES_PER_BLOCK,
    MAX_USED_BLOCK_SIZE,
};
pub use decoder::decode_primitive_block;
pub use header::{decode_header_block, encode_header_block, BoundingBox, FileHeader};
pub use string_table::StringTable;
