//! Blob framing
//!
//! Every block of a PBF file is stored as
//!
//! ```text
//! [header length: u32 big-endian][BlobHeader][Blob]
//! ```
//!
//! The `BlobHeader` names the block type and the size of the `Blob`, which in
//! turn carries the (possibly compressed) serialized block.

use std::io::{ErrorKind, Read};

use prost::Message;

use super::proto;
use crate::compression::{compress, decompress, CompressionMethod};
use crate::error::{OsmError, Result};

/// Maximum size of a serialized `BlobHeader`
pub const MAX_BLOB_HEADER_SIZE: usize = 64 * 1024;

/// Maximum size of a block, before compression
pub const MAX_UNCOMPRESSED_BLOB_SIZE: usize = 32 * 1024 * 1024;

/// Block types named in the blob header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobType {
    Header,
    Data,
}

impl BlobType {
    pub fn as_str(self) -> &'static str {
        match self {
            BlobType::Header => "OSMHeader",
            BlobType::Data => "OSMData",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "OSMHeader" => Ok(BlobType::Header),
            "OSMData" => Ok(BlobType::Data),
            other => Err(OsmError::UnknownBlobType(other.to_string())),
        }
    }
}

/// One frame read from a file: the block type and the serialized `Blob`
#[derive(Debug, Clone)]
pub struct Frame {
    pub blob_type: BlobType,
    pub blob: Vec<u8>,
}

impl Frame {
    /// Fail unless this frame has the expected type
    pub fn expect(&self, expected: BlobType) -> Result<()> {
        if self.blob_type != expected {
            return Err(OsmError::UnexpectedBlobType {
                expected: expected.as_str(),
                actual: self.blob_type.as_str(),
            });
        }
        Ok(())
    }
}

/// Wrap a serialized block into a complete frame
pub fn encode_frame(
    payload: &[u8],
    blob_type: BlobType,
    method: CompressionMethod,
) -> Result<Vec<u8>> {
    if payload.len() > MAX_UNCOMPRESSED_BLOB_SIZE {
        return Err(OsmError::FrameTooLarge {
            what: "block",
            size: payload.len(),
            max: MAX_UNCOMPRESSED_BLOB_SIZE,
        });
    }

    let mut blob = proto::Blob::default();
    match method {
        CompressionMethod::None => blob.raw = Some(payload.to_vec()),
        CompressionMethod::Zlib => blob.zlib_data = Some(compress(payload, method)?),
        CompressionMethod::Lz4 => blob.lz4_data = Some(compress(payload, method)?),
        CompressionMethod::Zstd => blob.zstd_data = Some(compress(payload, method)?),
    }
    if method != CompressionMethod::None {
        blob.raw_size = Some(payload.len() as i32);
    }
    let blob_data = blob.encode_to_vec();

    let header = proto::BlobHeader {
        r#type: blob_type.as_str().to_string(),
        indexdata: None,
        datasize: i32::try_from(blob_data.len()).map_err(|_| OsmError::FrameTooLarge {
            what: "blob",
            size: blob_data.len(),
            max: i32::MAX as usize,
        })?,
    };
    let header_data = header.encode_to_vec();

    let mut output = Vec::with_capacity(4 + header_data.len() + blob_data.len());
    output.extend_from_slice(&(header_data.len() as u32).to_be_bytes());
    output.extend_from_slice(&header_data);
    output.extend_from_slice(&blob_data);
    Ok(output)
}

/// Read into `buf` until it is full or the reader is exhausted
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn read_exact_or_truncated<R: Read>(
    reader: &mut R,
    len: usize,
    what: &'static str,
) -> Result<Vec<u8>> {
    let mut data = vec![0u8; len];
    if read_full(reader, &mut data)? != len {
        return Err(OsmError::Truncated(what));
    }
    Ok(data)
}

/// Read the next frame
///
/// Returns `Ok(None)` at a clean end of input (no bytes left before a
/// frame). Input ending inside a frame is [`OsmError::Truncated`].
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Frame>> {
    let mut size_bytes = [0u8; 4];
    match read_full(reader, &mut size_bytes)? {
        0 => return Ok(None),
        4 => {}
        _ => return Err(OsmError::Truncated("blob header length")),
    }

    let header_size = u32::from_be_bytes(size_bytes) as usize;
    if header_size > MAX_BLOB_HEADER_SIZE {
        return Err(OsmError::FrameTooLarge {
            what: "blob header",
            size: header_size,
            max: MAX_BLOB_HEADER_SIZE,
        });
    }

    let header_data = read_exact_or_truncated(reader, header_size, "blob header")?;
    let header = proto::BlobHeader::decode(header_data.as_slice())?;

    let datasize = usize::try_from(header.datasize)
        .map_err(|_| OsmError::InvalidFrame(format!("negative datasize {}", header.datasize)))?;
    if datasize > MAX_UNCOMPRESSED_BLOB_SIZE {
        return Err(OsmError::FrameTooLarge {
            what: "blob",
            size: datasize,
            max: MAX_UNCOMPRESSED_BLOB_SIZE,
        });
    }
    let blob_type = BlobType::parse(&header.r#type)?;

    let blob = read_exact_or_truncated(reader, datasize, "blob")?;
    Ok(Some(Frame { blob_type, blob }))
}

/// Unwrap a serialized `Blob` into the serialized block it carries
pub fn decode_blob(data: &[u8]) -> Result<Vec<u8>> {
    let blob = proto::Blob::decode(data)?;

    if let Some(raw) = blob.raw {
        if raw.len() > MAX_UNCOMPRESSED_BLOB_SIZE {
            return Err(OsmError::FrameTooLarge {
                what: "raw blob",
                size: raw.len(),
                max: MAX_UNCOMPRESSED_BLOB_SIZE,
            });
        }
        return Ok(raw);
    }

    let (method, compressed) = if let Some(data) = blob.zlib_data {
        (CompressionMethod::Zlib, data)
    } else if let Some(data) = blob.lz4_data {
        (CompressionMethod::Lz4, data)
    } else if let Some(data) = blob.zstd_data {
        (CompressionMethod::Zstd, data)
    } else if blob.lzma_data.is_some() {
        return Err(OsmError::UnsupportedCompression("lzma"));
    } else if blob.obsolete_bzip2_data.is_some() {
        return Err(OsmError::UnsupportedCompression("bzip2"));
    } else {
        return Err(OsmError::UnsupportedCompression("blob without data"));
    };

    let raw_size = blob.raw_size.ok_or_else(|| {
        OsmError::InvalidFrame(format!("{} blob without raw_size", method.as_str()))
    })?;
    let raw_size = usize::try_from(raw_size)
        .map_err(|_| OsmError::InvalidFrame(format!("negative raw_size {}", raw_size)))?;
    if raw_size > MAX_UNCOMPRESSED_BLOB_SIZE {
        return Err(OsmError::FrameTooLarge {
            what: "uncompressed blob",
            size: raw_size,
            max: MAX_UNCOMPRESSED_BLOB_SIZE,
        });
    }

    decompress(&compressed, method, raw_size)
}
