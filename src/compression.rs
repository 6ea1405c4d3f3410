//! Blob payload compression
//!
//! A PBF blob stores its payload either raw or compressed with one of the
//! methods below, together with the uncompressed size. Decompression is
//! bounded by that size.
//!
//! **Design**:
//! - Zlib: the format default, understood by every PBF reader
//! - LZ4: raw LZ4 block without a size prefix (the blob carries `raw_size`)
//! - Zstd: single zstd frame

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::Deserialize;

use crate::error::{OsmError, Result};

/// Compression method for blob payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    /// Payload stored in the `raw` field
    None,
    /// zlib stream in `zlib_data` (default)
    #[default]
    Zlib,
    /// LZ4 block in `lz4_data`
    Lz4,
    /// Zstandard frame in `zstd_data`
    Zstd,
}

impl CompressionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionMethod::None => "none",
            CompressionMethod::Zlib => "zlib",
            CompressionMethod::Lz4 => "lz4",
            CompressionMethod::Zstd => "zstd",
        }
    }
}

const ZSTD_LEVEL: i32 = 3;

/// Compress `data` with `method`
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Zlib => {
            let mut encoder = ZlibEncoder::new(
                Vec::with_capacity(data.len() / 2),
                flate2::Compression::default(),
            );
            encoder
                .write_all(data)
                .map_err(|e| OsmError::Compression(format!("zlib compression failed: {}", e)))?;
            encoder
                .finish()
                .map_err(|e| OsmError::Compression(format!("zlib compression failed: {}", e)))
        }
        CompressionMethod::Lz4 => Ok(lz4_flex::block::compress(data)),
        CompressionMethod::Zstd => zstd::bulk::compress(data, ZSTD_LEVEL)
            .map_err(|e| OsmError::Compression(format!("zstd compression failed: {}", e))),
    }
}

/// Decompress `data` that is expected to expand to exactly `raw_size` bytes
///
/// # Errors
/// [`OsmError::Decompression`] for corrupt input, [`OsmError::SizeMismatch`]
/// if the output length differs from `raw_size`.
pub fn decompress(data: &[u8], method: CompressionMethod, raw_size: usize) -> Result<Vec<u8>> {
    let output = match method {
        CompressionMethod::None => data.to_vec(),
        CompressionMethod::Zlib => {
            let mut output = Vec::with_capacity(raw_size);
            // One byte past the declared size is enough to detect overlong data
            ZlibDecoder::new(data)
                .take(raw_size as u64 + 1)
                .read_to_end(&mut output)
                .map_err(|e| OsmError::Decompression(format!("zlib: {}", e)))?;
            output
        }
        CompressionMethod::Lz4 => lz4_flex::block::decompress(data, raw_size)
            .map_err(|e| OsmError::Decompression(format!("lz4: {}", e)))?,
        CompressionMethod::Zstd => zstd::bulk::decompress(data, raw_size)
            .map_err(|e| OsmError::Decompression(format!("zstd: {}", e)))?,
    };

    if output.len() != raw_size {
        return Err(OsmError::SizeMismatch {
            what: "decompressed blob",
            declared: raw_size,
            actual: output.len(),
        });
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_methods_restore_input() {
        let data = b"highway=residential name=Main Street ".repeat(200);
        for method in [
            CompressionMethod::None,
            CompressionMethod::Zlib,
            CompressionMethod::Lz4,
            CompressionMethod::Zstd,
        ] {
            let compressed = compress(&data, method).unwrap();
            if method != CompressionMethod::None {
                assert!(compressed.len() < data.len(), "{} did not shrink", method.as_str());
            }
            let restored = decompress(&compressed, method, data.len()).unwrap();
            assert_eq!(restored, data);
        }
    }

    #[test]
    fn test_wrong_raw_size_is_rejected() {
        let data = vec![7u8; 4096];
        let compressed = compress(&data, CompressionMethod::Zlib).unwrap();

        assert!(matches!(
            decompress(&compressed, CompressionMethod::Zlib, 4000),
            Err(OsmError::SizeMismatch { declared: 4000, .. })
        ));
        assert!(matches!(
            decompress(&compressed, CompressionMethod::Zlib, 5000),
            Err(OsmError::SizeMismatch { actual: 4096, .. })
        ));
    }

    #[test]
    fn test_corrupt_zlib_stream() {
        let garbage = b"definitely not a zlib stream";
        assert!(matches!(
            decompress(garbage, CompressionMethod::Zlib, 100),
            Err(OsmError::Decompression(_))
        ));
    }

    #[test]
    fn test_default_method_is_zlib() {
        assert_eq!(CompressionMethod::default(), CompressionMethod::Zlib);
    }
}
