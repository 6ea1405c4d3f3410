//! Error types for buffer, codec and pipeline operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OsmError {
    // Capacity
    #[error("Buffer is full: {requested} bytes requested, {available} available")]
    BufferFull { requested: usize, available: usize },

    #[error("Buffer cannot grow: memory is not owned by the buffer")]
    CannotGrow,

    // Alignment and shape
    #[error("Value {0} is not a multiple of the buffer alignment")]
    Misaligned(usize),

    #[error("Operation on an invalid buffer")]
    InvalidBuffer,

    #[error("Corrupt item at offset {offset}: {reason}")]
    CorruptItem { offset: usize, reason: String },

    #[error("Invalid item type: {0}")]
    InvalidItemType(u8),

    #[error("Invalid member type: {0}")]
    InvalidMemberType(i32),

    #[error("Invalid builder operation: {0}")]
    InvalidOperation(&'static str),

    #[error("Invalid entity filter: {0:?}")]
    InvalidFilter(String),

    // Wire format
    #[error("Unknown blob type: {0}")]
    UnknownBlobType(String),

    #[error("Unexpected blob type: expected {expected}, got {actual}")]
    UnexpectedBlobType {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Unsupported required feature in file header: {0}")]
    UnsupportedFeature(String),

    #[error("Frame too large: {what} is {size} bytes (max: {max})")]
    FrameTooLarge {
        what: &'static str,
        size: usize,
        max: usize,
    },

    #[error("Size mismatch in {what}: declared {declared}, actual {actual}")]
    SizeMismatch {
        what: &'static str,
        declared: usize,
        actual: usize,
    },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Truncated input: {0}")]
    Truncated(&'static str),

    #[error("Protobuf decode error: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("String id {id} out of range (string table has {len} entries)")]
    InvalidStringId { id: usize, len: usize },

    #[error("String is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Unsupported blob compression: {0}")]
    UnsupportedCompression(&'static str),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Entity {id} is too large for a block: {size} bytes (max: {max})")]
    EntityTooLarge { id: i64, size: usize, max: usize },

    #[error("Entity {id} has version {version}, outside the range a block can hold")]
    VersionOutOfRange { id: i64, version: i64 },

    #[error("Invalid file header: {0}")]
    InvalidHeader(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    // Pipeline
    #[error("Worker task panicked: {0}")]
    WorkerPanicked(String),

    #[error("Pipeline channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Input stream failed: {0}")]
    Stream(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, OsmError>;

impl OsmError {
    pub(crate) fn corrupt(offset: usize, reason: impl Into<String>) -> Self {
        OsmError::CorruptItem {
            offset,
            reason: reason.into(),
        }
    }
}
