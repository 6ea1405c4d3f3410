//! File header block
//!
//! The first block of every file. It lists the features a reader must
//! support, an optional bounding box, the writing program and replication
//! state. Everything except the bounding box and the history flag is exposed
//! as string properties:
//!
//! | property | header field |
//! |---|---|
//! | `generator` | `writingprogram` |
//! | `source` | `source` |
//! | `osmosis_replication_timestamp` | replication timestamp, ISO 8601 |
//! | `osmosis_replication_sequence_number` | replication sequence number |
//! | `osmosis_replication_base_url` | replication base url |
//! | `pbf_dense_nodes` | `"true"` if the file uses dense nodes |
//! | `pbf_optional_feature_N` | N-th optional feature |

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use prost::Message;

use super::block::LONLAT_RESOLUTION;
use super::proto;
use crate::config::PbfOptions;
use crate::error::{OsmError, Result};
use crate::osm::{Location, COORDINATE_PRECISION};

pub const FEATURE_SCHEMA: &str = "OsmSchema-V0.6";
pub const FEATURE_DENSE_NODES: &str = "DenseNodes";
pub const FEATURE_HISTORICAL_INFORMATION: &str = "HistoricalInformation";

const NANO_PER_FIXED: i64 = LONLAT_RESOLUTION / COORDINATE_PRECISION as i64;

/// Default `writingprogram`
pub const GENERATOR: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub bottom_left: Location,
    pub top_right: Location,
}

impl BoundingBox {
    pub fn new(bottom_left: Location, top_right: Location) -> Self {
        BoundingBox {
            bottom_left,
            top_right,
        }
    }

    /// Smallest box containing both boxes
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            bottom_left: Location::new(
                self.bottom_left.x().min(other.bottom_left.x()),
                self.bottom_left.y().min(other.bottom_left.y()),
            ),
            top_right: Location::new(
                self.top_right.x().max(other.top_right.x()),
                self.top_right.y().max(other.top_right.y()),
            ),
        }
    }
}

/// Decoded file header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub boxes: Vec<BoundingBox>,
    pub multiple_object_versions: bool,
    properties: BTreeMap<String, String>,
}

impl FileHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// All boxes joined into one
    pub fn joined_boxes(&self) -> Option<BoundingBox> {
        let (first, rest) = self.boxes.split_first()?;
        Some(rest.iter().fold(*first, |acc, b| acc.union(b)))
    }
}

/// Seconds since the epoch to `YYYY-MM-DDThh:mm:ssZ`
pub fn format_timestamp(seconds: i64) -> Result<String> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or_else(|| OsmError::InvalidTimestamp(seconds.to_string()))
}

/// ISO 8601 timestamp to seconds since the epoch
pub fn parse_timestamp(s: &str) -> Result<i64> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.timestamp())
        .map_err(|e| OsmError::InvalidTimestamp(format!("{:?}: {}", s, e)))
}

/// Serialize the header block for a file written with `options`
pub fn encode_header_block(header: &FileHeader, options: &PbfOptions) -> Result<Vec<u8>> {
    let mut block = proto::HeaderBlock {
        bbox: header.joined_boxes().map(|b| proto::HeaderBBox {
            left: i64::from(b.bottom_left.x()) * NANO_PER_FIXED,
            right: i64::from(b.top_right.x()) * NANO_PER_FIXED,
            top: i64::from(b.top_right.y()) * NANO_PER_FIXED,
            bottom: i64::from(b.bottom_left.y()) * NANO_PER_FIXED,
        }),
        ..Default::default()
    };

    block.required_features.push(FEATURE_SCHEMA.to_string());
    if options.use_dense_nodes {
        block.required_features.push(FEATURE_DENSE_NODES.to_string());
    }
    if options.has_multiple_object_versions {
        block
            .required_features
            .push(FEATURE_HISTORICAL_INFORMATION.to_string());
    }

    let mut n = 0;
    while let Some(feature) = header.get(&format!("pbf_optional_feature_{}", n)) {
        block.optional_features.push(feature.to_string());
        n += 1;
    }

    block.writingprogram = Some(header.get("generator").unwrap_or(GENERATOR).to_string());
    block.source = header.get("source").map(str::to_string);

    if let Some(timestamp) = header.get("osmosis_replication_timestamp") {
        block.osmosis_replication_timestamp = Some(parse_timestamp(timestamp)?);
    }
    if let Some(sequence) = header.get("osmosis_replication_sequence_number") {
        let sequence = sequence.trim().parse::<i64>().map_err(|e| {
            OsmError::InvalidHeader(format!("replication sequence number {:?}: {}", sequence, e))
        })?;
        block.osmosis_replication_sequence_number = Some(sequence);
    }
    block.osmosis_replication_base_url = header
        .get("osmosis_replication_base_url")
        .map(str::to_string);

    Ok(block.encode_to_vec())
}

/// Parse a serialized header block
///
/// # Errors
/// [`OsmError::UnsupportedFeature`] if the file requires a feature this
/// decoder does not implement.
pub fn decode_header_block(data: &[u8]) -> Result<FileHeader> {
    let block = proto::HeaderBlock::decode(data)?;
    let mut header = FileHeader::new();

    for feature in &block.required_features {
        match feature.as_str() {
            FEATURE_SCHEMA => {}
            FEATURE_DENSE_NODES => {
                header.set("pbf_dense_nodes", "true");
            }
            FEATURE_HISTORICAL_INFORMATION => header.multiple_object_versions = true,
            other => return Err(OsmError::UnsupportedFeature(other.to_string())),
        }
    }

    for (n, feature) in block.optional_features.iter().enumerate() {
        header.set(format!("pbf_optional_feature_{}", n), feature.as_str());
    }

    if let Some(bbox) = &block.bbox {
        let fixed = |nano: i64| -> Result<i32> {
            i32::try_from(nano / NANO_PER_FIXED)
                .map_err(|_| OsmError::InvalidHeader(format!("bounding box value {}", nano)))
        };
        header.boxes.push(BoundingBox::new(
            Location::new(fixed(bbox.left)?, fixed(bbox.bottom)?),
            Location::new(fixed(bbox.right)?, fixed(bbox.top)?),
        ));
    }

    if let Some(program) = &block.writingprogram {
        header.set("generator", program.as_str());
    }
    if let Some(source) = &block.source {
        header.set("source", source.as_str());
    }
    if let Some(timestamp) = block.osmosis_replication_timestamp {
        header.set("osmosis_replication_timestamp", format_timestamp(timestamp)?);
    }
    if let Some(sequence) = block.osmosis_replication_sequence_number {
        header.set("osmosis_replication_sequence_number", sequence.to_string());
    }
    if let Some(url) = &block.osmosis_replication_base_url {
        header.set("osmosis_replication_base_url", url.as_str());
    }

    Ok(header)
}
