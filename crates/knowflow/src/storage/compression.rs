//! Byte-level compression for blob payloads.
//!
//! Zstd is the only algorithm the pipeline writes; the trait keeps the
//! transformer testable and leaves room for alternatives.

use crate::core::error::{Error, Result};

/// Maximum decompressed size accepted on the read path: 100 MB.
pub const DEFAULT_MAX_DECOMPRESSED_SIZE: usize = 100 * 1024 * 1024;

/// A compression algorithm.
pub trait Compression: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress, rejecting outputs larger than `max_size`.
    fn decompress_with_limit(&self, data: &[u8], max_size: usize) -> Result<Vec<u8>> {
        let result = self.decompress(data)?;
        if result.len() > max_size {
            return Err(Error::compression(format!(
                "decompressed size {} exceeds maximum allowed {max_size} bytes",
                result.len()
            )));
        }
        Ok(result)
    }

    fn name(&self) -> &'static str;
}

/// Zstd with a configurable level.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompression {
    level: i32,
}

impl ZstdCompression {
    #[must_use]
    pub fn new(level: i32) -> Self {
        Self { level }
    }

    #[must_use]
    pub fn level(&self) -> i32 {
        self.level
    }
}

impl Compression for ZstdCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.level)
            .map_err(|e| Error::compression(format!("zstd compression failed: {e}")))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data)
            .map_err(|e| Error::compression(format!("zstd decompression failed: {e}")))
    }

    fn name(&self) -> &'static str {
        "zstd"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let compressor = ZstdCompression::new(10);
        let data = b"the same sentence repeated makes zstd happy. ".repeat(64);
        let compressed = compressor.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(compressor.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn limit_is_enforced() {
        let compressor = ZstdCompression::new(3);
        let data = vec![0u8; 4096];
        let compressed = compressor.compress(&data).unwrap();
        let err = compressor.decompress_with_limit(&compressed, 1024).unwrap_err();
        assert!(matches!(err, Error::Compression(_)));
    }

    #[test]
    fn garbage_input_fails_cleanly() {
        let compressor = ZstdCompression::new(3);
        assert!(compressor.decompress(b"definitely not zstd").is_err());
    }
}
