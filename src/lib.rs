//! # osmblock - OSM entity buffers and the PBF block codec
//!
//! `osmblock` stores OpenStreetMap nodes, ways and relations in flat,
//! 8-byte aligned arenas instead of one heap allocation per object, and
//! reads and writes them as OSM PBF files:
//!
//! - **[`Buffer`]**: growable or borrowed arena of packed items
//! - **[`osm`]**: item layouts, [`ObjectBuilder`] and zero-copy views
//! - **[`pbf`]**: blob framing, compression, string tables and delta coding
//! - **[`io`]**: [`PbfInput`] / [`PbfOutput`] pipelines running block
//!   decoding and encoding on a shared [`WorkerPool`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use osmblock::{Buffer, Location, NodeData, PbfInput, PbfOptions, PbfOutput, ReaderOptions, WorkerPool};
//!
//! # fn main() -> osmblock::Result<()> {
//! let pool = Arc::new(WorkerPool::with_default_size()?);
//!
//! let mut buffer = Buffer::new();
//! buffer.push_node(&NodeData::new(1, Location::from_degrees(13.4, 52.5)))?;
//!
//! let mut output = PbfOutput::create("points.osm.pbf", Arc::clone(&pool), PbfOptions::default())?;
//! output.write_buffer(&buffer)?;
//! output.close()?;
//!
//! let mut input = PbfInput::from_path("points.osm.pbf", pool, ReaderOptions::default())?;
//! println!("written by {:?}", input.header()?.get("generator"));
//! for block in input {
//!     for entity in block?.entities() {
//!         let entity = entity?;
//!         println!("{} {}", entity.kind(), entity.id());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod config;
pub mod error;
pub mod io;
pub mod memory;
pub mod osm;
pub mod pbf;
pub mod thread;

pub use compression::CompressionMethod;
pub use config::{PbfOptions, ReaderOptions};
pub use error::{OsmError, Result};
pub use io::{PbfInput, PbfOutput};
pub use memory::{AutoGrow, Buffer, ItemRef, ItemType};
pub use osm::{
    Entity, EntityBits, EntityData, EntityKind, Location, MemberType, Metadata, NodeData,
    NodeRef, ObjectBuilder, RelationData, RelationRef, WayData, WayRef,
};
pub use pbf::{BoundingBox, FileHeader};
pub use thread::{Deferred, WorkerPool};
