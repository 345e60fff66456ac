//! In-memory compression for snapshot payloads.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzipCompression;
use std::io::{Read, Write};

/// Compression algorithm type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    /// No compression.
    None,
    /// Gzip compression (the snapshot format).
    #[default]
    Gzip,
}

impl CompressionType {
    /// Algorithm named by an envelope's `compressed` flag.
    pub fn from_flag(compressed: bool) -> Self {
        if compressed {
            Self::Gzip
        } else {
            Self::None
        }
    }
}

/// Gzip level, 1 (fast) to 9 (small). Snapshots use 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u8);

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(6)
    }
}

impl CompressionLevel {
    pub fn new(level: u8) -> Self {
        Self(level.clamp(1, 9))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

/// Compress data in memory.
pub fn compress(data: &[u8], compression: CompressionType, level: CompressionLevel) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), GzipCompression::new(level.value() as u32));
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
    }
}

/// Decompress data in memory.
pub fn decompress(data: &[u8], compression: CompressionType) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Gzip => {
            let mut output = Vec::new();
            GzDecoder::new(data)
                .read_to_end(&mut output)
                .context("Invalid gzip stream")?;
            Ok(output)
        }
    }
}
