//! Compression Support
//!
//! Block compressors and a self-describing frame format used by the
//! compressed value serializer. Every frame starts with a one-byte algorithm
//! tag so payloads below the size threshold, or payloads that do not shrink,
//! are stored raw and still decode.

use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Compression algorithm identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    None,
    #[default]
    Lz4,
    Zstd,
    Snappy,
}

impl CompressionAlgorithm {
    /// Frame header byte
    fn tag(self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Lz4 => 1,
            CompressionAlgorithm::Zstd => 2,
            CompressionAlgorithm::Snappy => 3,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(CompressionAlgorithm::None),
            1 => Ok(CompressionAlgorithm::Lz4),
            2 => Ok(CompressionAlgorithm::Zstd),
            3 => Ok(CompressionAlgorithm::Snappy),
            other => Err(Error::Compression(format!("unknown frame tag {}", other))),
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionAlgorithm::None => write!(f, "none"),
            CompressionAlgorithm::Lz4 => write!(f, "lz4"),
            CompressionAlgorithm::Zstd => write!(f, "zstd"),
            CompressionAlgorithm::Snappy => write!(f, "snappy"),
        }
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for compression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Algorithm to use
    pub algorithm: CompressionAlgorithm,
    /// Minimum size to compress (smaller payloads are stored raw)
    pub min_size_bytes: usize,
    /// Compression level (algorithm-specific)
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Lz4,
            min_size_bytes: 1024,
            level: 3,
        }
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Get the algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// LZ4 compressor (fast compression)
pub struct Lz4Compressor {
    level: i32,
}

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::Compression(format!("LZ4 compression failed: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None)
            .map_err(|e| Error::Compression(format!("LZ4 decompression failed: {}", e)))
    }
}

/// Zstd compressor (balanced compression)
pub struct ZstdCompressor {
    level: i32,
}

impl Compressor for ZstdCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Zstd
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.level)
            .map_err(|e| Error::Compression(format!("Zstd compression failed: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data)
            .map_err(|e| Error::Compression(format!("Zstd decompression failed: {}", e)))
    }
}

/// Snappy compressor (very fast, lower ratio)
pub struct SnappyCompressor;

impl Compressor for SnappyCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Snappy
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| Error::Compression(format!("Snappy compression failed: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| Error::Compression(format!("Snappy decompression failed: {}", e)))
    }
}

/// Build the compressor for an algorithm; `None` has no compressor
pub fn compressor_for(algorithm: CompressionAlgorithm, level: i32) -> Option<Box<dyn Compressor>> {
    match algorithm {
        CompressionAlgorithm::None => None,
        CompressionAlgorithm::Lz4 => Some(Box::new(Lz4Compressor { level })),
        CompressionAlgorithm::Zstd => Some(Box::new(ZstdCompressor { level })),
        CompressionAlgorithm::Snappy => Some(Box::new(SnappyCompressor)),
    }
}

// =============================================================================
// Frame Codec
// =============================================================================

/// Tagged-frame compressor with raw fallback
pub struct FrameCodec {
    config: CompressionConfig,
    compressor: Option<Box<dyn Compressor>>,
}

impl FrameCodec {
    /// Create a codec
    pub fn new(config: CompressionConfig) -> Self {
        let compressor = compressor_for(config.algorithm, config.level);
        Self { config, compressor }
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Encode a payload into a frame
    ///
    /// Falls back to a raw frame when the payload is below the threshold,
    /// when compression fails, or when it does not shrink the payload.
    pub fn encode(&self, data: &[u8]) -> Bytes {
        let compressed = match &self.compressor {
            Some(c) if data.len() >= self.config.min_size_bytes => match c.compress(data) {
                Ok(out) if out.len() < data.len() => Some((c.algorithm(), out)),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(algorithm = %c.algorithm(), error = %e, "Compression failed, storing raw");
                    None
                }
            },
            _ => None,
        };

        let (algorithm, body) = match &compressed {
            Some((algorithm, out)) => (*algorithm, out.as_slice()),
            None => (CompressionAlgorithm::None, data),
        };

        let mut frame = BytesMut::with_capacity(body.len() + 1);
        frame.put_u8(algorithm.tag());
        frame.put_slice(body);
        frame.freeze()
    }

    /// Decode a frame produced by [`FrameCodec::encode`]
    pub fn decode(&self, frame: &[u8]) -> Result<Bytes> {
        let (&tag, body) = frame
            .split_first()
            .ok_or_else(|| Error::Compression("empty frame".to_string()))?;
        let algorithm = CompressionAlgorithm::from_tag(tag)?;
        match compressor_for(algorithm, self.config.level) {
            None => Ok(Bytes::copy_from_slice(body)),
            Some(c) => c.decompress(body).map(Bytes::from),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}
