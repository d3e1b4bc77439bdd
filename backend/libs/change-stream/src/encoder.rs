//! Byte-level transforms applied to serialized events before fan-out.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::EncodeError;

/// Transform applied to a serialized envelope before it is pushed to an
/// outbox list.
pub trait EventEncoder: Send + Sync {
    fn encode(&self, raw: &[u8]) -> Result<Vec<u8>, EncodeError>;
}

/// Inverse of [`EventEncoder`], used by readers of the outbox list.
pub trait EventDecoder: Send + Sync {
    fn decode(&self, raw: &[u8]) -> Result<Vec<u8>, EncodeError>;
}

/// Gzip compression for outbox payloads.
#[derive(Debug, Clone, Copy)]
pub struct GzipCodec {
    level: Compression,
}

impl GzipCodec {
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }

    /// `level` ranges from 0 (store) to 9 (best compression).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEncoder for GzipCodec {
    fn encode(&self, raw: &[u8]) -> Result<Vec<u8>, EncodeError> {
        let mut encoder = GzEncoder::new(Vec::new(), self.level);
        encoder.write_all(raw)?;
        Ok(encoder.finish()?)
    }
}

impl EventDecoder for GzipCodec {
    fn decode(&self, raw: &[u8]) -> Result<Vec<u8>, EncodeError> {
        let mut decoder = GzDecoder::new(raw);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_output_is_decodable() {
        let codec = GzipCodec::new();
        let payload = br#"{"_id":{"_data":"8263A1"},"operationType":"insert"}"#.repeat(20);

        let encoded = codec.encode(&payload).unwrap();
        assert_eq!(&encoded[..2], &[0x1f, 0x8b]); // gzip magic
        assert!(encoded.len() < payload.len());

        assert_eq!(codec.decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let codec = GzipCodec::with_level(9);
        let err = codec.decode(b"not gzip").unwrap_err();
        assert!(matches!(err, EncodeError::Io(_)));
    }
}
