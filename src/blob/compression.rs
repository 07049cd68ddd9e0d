//! Per-blob compression (`spec.md` §4.1 "Compression").

use crate::error::CoreError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::model::CompressionKind;

/// Something that can compress and uncompress a byte buffer.
///
/// The only required implementation is "zlib with an 8-byte prepended
/// uncompressed size"; `Compressor::none()` is the identity. Compression is
/// selected per write by the ingestion pipeline, not by the blob store.
pub trait Compressor: Send + Sync {
    fn kind(&self) -> CompressionKind;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CoreError>;
    fn uncompress(&self, data: &[u8]) -> Result<Vec<u8>, CoreError>;
}

/// The identity compressor.
pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn kind(&self) -> CompressionKind {
        CompressionKind::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CoreError> {
        Ok(data.to_vec())
    }

    fn uncompress(&self, data: &[u8]) -> Result<Vec<u8>, CoreError> {
        Ok(data.to_vec())
    }
}

/// Zlib deflate with the uncompressed size prepended as an 8-byte
/// little-endian header, so truncated reads can be detected cheaply.
pub struct ZlibWithSizeCompressor;

impl Compressor for ZlibWithSizeCompressor {
    fn kind(&self) -> CompressionKind {
        CompressionKind::ZlibWithSize
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CoreError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        let deflated = encoder.finish()?;
        let mut out = Vec::with_capacity(8 + deflated.len());
        out.extend_from_slice(&(data.len() as u64).to_le_bytes());
        out.extend_from_slice(&deflated);
        Ok(out)
    }

    fn uncompress(&self, data: &[u8]) -> Result<Vec<u8>, CoreError> {
        if data.len() < 8 {
            return Err(CoreError::BadFileFormat(
                "truncated compressed blob: missing size header".to_string(),
            ));
        }
        let (header, body) = data.split_at(8);
        let expected_size = u64::from_le_bytes(header.try_into().unwrap()) as usize;
        let mut decoder = ZlibDecoder::new(body);
        let mut out = Vec::with_capacity(expected_size);
        decoder.read_to_end(&mut out)?;
        if out.len() != expected_size {
            return Err(CoreError::BadFileFormat(format!(
                "compressed blob header declared {expected_size} bytes, got {}",
                out.len()
            )));
        }
        Ok(out)
    }
}

/// Look up the compressor for a stored `CompressionKind`.
pub fn compressor_for(kind: CompressionKind) -> Box<dyn Compressor> {
    match kind {
        CompressionKind::None => Box::new(NoneCompressor),
        CompressionKind::ZlibWithSize => Box::new(ZlibWithSizeCompressor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zlib_round_trips() {
        let c = ZlibWithSizeCompressor;
        let data = b"the quick brown fox jumps over the lazy dog".repeat(10);
        let compressed = c.compress(&data).unwrap();
        let restored = c.uncompress(&compressed).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn zlib_empty_input_round_trips() {
        let c = ZlibWithSizeCompressor;
        let compressed = c.compress(&[]).unwrap();
        let restored = c.uncompress(&compressed).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn none_is_identity() {
        let c = NoneCompressor;
        let data = b"hello".to_vec();
        assert_eq!(c.compress(&data).unwrap(), data);
        assert_eq!(c.uncompress(&data).unwrap(), data);
    }

    #[test]
    fn truncated_zlib_header_is_bad_file_format() {
        let c = ZlibWithSizeCompressor;
        let err = c.uncompress(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, CoreError::BadFileFormat(_)));
    }
}
