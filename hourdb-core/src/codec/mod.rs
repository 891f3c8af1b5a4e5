//! Vector codec
//!
//! Serializes a typed vector as a little-endian fixed-width element dump.
//! Series whose total falls below the compression threshold are stored
//! zlib-compressed; the choice is recorded next to the blob so reads never
//! depend on the threshold in force at write time.

mod decoder;
mod encoder;

pub use decoder::{decompress, deserialize};
pub use encoder::{compress, serialize};

use crate::config::{COMPRESSION_LEVEL, COMPRESSION_THRESHOLD};
use crate::{DType, HourError, Result, SeriesData};

/// An encoded vector ready to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    /// Element type
    pub dtype: DType,
    /// Sum of absolute values
    pub total: f64,
    /// Whether `blob` is zlib-compressed
    pub compressed: bool,
    /// Stored bytes
    pub blob: Vec<u8>,
}

impl Encoded {
    /// Ratio of raw size to stored size
    pub fn compression_ratio(&self, len: usize) -> f64 {
        (len * self.dtype.width()) as f64 / self.blob.len().max(1) as f64
    }
}

/// Codec configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodecConfig {
    /// Compress when `total < threshold`
    pub threshold: f64,
    /// zlib level (0-9)
    pub level: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            threshold: COMPRESSION_THRESHOLD,
            level: COMPRESSION_LEVEL,
        }
    }
}

/// Encoder/decoder for stored vectors
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    config: CodecConfig,
}

impl Codec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Encode a vector, compressing it when its total is small
    pub fn encode(&self, data: &SeriesData) -> Result<Encoded> {
        let total = data.total();
        let raw = serialize(data);
        let compressed = total < self.config.threshold;
        let blob = if compressed {
            compress(&raw, self.config.level)?
        } else {
            raw
        };

        Ok(Encoded {
            dtype: data.dtype(),
            total,
            compressed,
            blob,
        })
    }

    /// Decode a stored row
    ///
    /// `name` is only used to label errors. Any failure, including a length
    /// other than `expected_len`, is reported as `CorruptBlob`.
    pub fn decode(
        &self,
        name: &str,
        dtype_code: &str,
        compressed: bool,
        blob: &[u8],
        expected_len: usize,
    ) -> Result<SeriesData> {
        let dtype = parse_dtype(name, dtype_code)?;

        let data = if compressed {
            let limit = expected_len * dtype.width();
            let raw = decompress(blob, limit).map_err(|e| HourError::corrupt(name, e.to_string()))?;
            deserialize(&raw, dtype)
        } else {
            deserialize(blob, dtype)
        }
        .map_err(|reason| HourError::corrupt(name, reason))?;

        if data.len() != expected_len {
            return Err(HourError::corrupt(
                name,
                format!("expected {} elements, found {}", expected_len, data.len()),
            ));
        }

        Ok(data)
    }
}

/// Parse the one-character type code of a stored row
pub fn parse_dtype(name: &str, code: &str) -> Result<DType> {
    let mut chars = code.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => DType::from_code(c)
            .ok_or_else(|| HourError::corrupt(name, format!("unknown dtype code {:?}", code))),
        _ => Err(HourError::corrupt(name, format!("malformed dtype {:?}", code))),
    }
}
