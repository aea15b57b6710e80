//! Stateless compression codec used by the cache and artifact uploads.

use std::io::Write;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
}

/// Compression codec
pub trait Compressor: Send + Sync {
    /// Short name, used as a file extension for stored blobs
    fn name(&self) -> &str;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressError>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressError>;
}

/// zstd codec
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        // zstd default level
        Self { level: 3 }
    }
}

impl ZstdCompressor {
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Compressor for ZstdCompressor {
    fn name(&self) -> &str {
        "zst"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressError> {
        let mut encoder =
            zstd::stream::Encoder::new(Vec::new(), self.level).map_err(CompressError::Compress)?;
        encoder.write_all(data).map_err(CompressError::Compress)?;
        encoder.finish().map_err(CompressError::Compress)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressError> {
        zstd::stream::decode_all(data).map_err(CompressError::Decompress)
    }
}
