//! Reader and writer options
//!
//! Both option structs have sensible defaults and can be loaded from TOML:
//!
//! ```toml
//! use_dense_nodes = true
//! compression = "zstd"
//! add_metadata = false
//! ```

use serde::Deserialize;

use crate::compression::CompressionMethod;
use crate::error::Result;
use crate::osm::EntityBits;

/// Default capacity of the ordered handle queues
pub const DEFAULT_QUEUE_SIZE: usize = 20;

/// Options for encoding PBF files
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PbfOptions {
    /// Store nodes as dense node groups
    pub use_dense_nodes: bool,

    /// Compression method for data and header blobs
    pub compression: CompressionMethod,

    /// Write version, timestamp, changeset, uid and user
    pub add_metadata: bool,

    /// The file may contain several versions of the same object; also
    /// enables the visible flag
    pub has_multiple_object_versions: bool,
}

impl Default for PbfOptions {
    fn default() -> Self {
        PbfOptions {
            use_dense_nodes: true,
            compression: CompressionMethod::Zlib,
            add_metadata: true,
            has_multiple_object_versions: false,
        }
    }
}

impl PbfOptions {
    /// Options writing uncompressed blobs
    pub fn uncompressed() -> Self {
        PbfOptions {
            compression: CompressionMethod::None,
            ..Default::default()
        }
    }

    /// Options for history files
    pub fn history() -> Self {
        PbfOptions {
            has_multiple_object_versions: true,
            ..Default::default()
        }
    }

    /// Switch between the default compression and none
    pub fn use_compression(mut self, enabled: bool) -> Self {
        self.compression = if enabled {
            CompressionMethod::Zlib
        } else {
            CompressionMethod::None
        };
        self
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }
}

/// Options for reading PBF files
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Entity kinds to decode; groups of other kinds are skipped
    pub entities: EntityBits,

    /// Maximum number of blocks decoded ahead of the consumer
    pub queue_size: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            entities: EntityBits::ALL,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

impl ReaderOptions {
    pub fn with_entities(entities: EntityBits) -> Self {
        ReaderOptions {
            entities,
            ..Default::default()
        }
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }
}
