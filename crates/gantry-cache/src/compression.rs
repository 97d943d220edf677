//! Compression utilities for cache entries.
//!
//! Stored blobs are framed as `MAGIC, codec tag, payload` so a restore can
//! decode an entry regardless of the codec the manager is configured with now.

use crate::types::CompressionType;
use gantry_core::{CacheError, Result};
use std::io::{Read, Write};

const MAGIC: u8 = 0x47;

/// Compress data using the specified algorithm.
pub fn compress(data: &[u8], algorithm: CompressionType) -> Result<Vec<u8>> {
    match algorithm {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Zstd => compress_zstd(data),
        CompressionType::Gzip => compress_gzip(data),
        CompressionType::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
    }
}

/// Decompress data using the specified algorithm.
pub fn decompress(data: &[u8], algorithm: CompressionType) -> Result<Vec<u8>> {
    match algorithm {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Zstd => decompress_zstd(data),
        CompressionType::Gzip => decompress_gzip(data),
        CompressionType::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| corrupt(format!("LZ4 decompression failed: {e}"))),
    }
}

/// Compress and prepend the codec header.
pub fn encode(data: &[u8], algorithm: CompressionType) -> Result<Vec<u8>> {
    let payload = compress(data, algorithm)?;
    let mut framed = Vec::with_capacity(payload.len() + 2);
    framed.push(MAGIC);
    framed.push(algorithm.tag());
    framed.extend_from_slice(&payload);
    Ok(framed)
}

/// Read the codec header and decompress the payload.
pub fn decode(blob: &[u8]) -> Result<Vec<u8>> {
    match blob {
        [MAGIC, tag, payload @ ..] => {
            let algorithm = CompressionType::from_tag(*tag)
                .ok_or_else(|| corrupt(format!("unknown codec tag {tag}")))?;
            decompress(payload, algorithm)
        }
        _ => Err(corrupt("missing codec header".to_string())),
    }
}

fn corrupt(message: String) -> gantry_core::Error {
    CacheError::Corrupt(message).into()
}

fn compress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)
        .map_err(|e| gantry_core::Error::Internal(format!("Zstd compression failed: {e}")))?;
    encoder
        .write_all(data)
        .map_err(|e| gantry_core::Error::Internal(format!("Zstd write failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| gantry_core::Error::Internal(format!("Zstd finish failed: {e}")))
}

fn decompress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder =
        zstd::Decoder::new(data).map_err(|e| corrupt(format!("Zstd decompression failed: {e}")))?;
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|e| corrupt(format!("Zstd read failed: {e}")))?;
    Ok(output)
}

fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| gantry_core::Error::Internal(format!("Gzip write failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| gantry_core::Error::Internal(format!("Gzip finish failed: {e}")))
}

fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|e| corrupt(format!("Gzip read failed: {e}")))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA: &[u8] = b"node_modules/left-pad/index.js: module.exports = leftPad;";

    #[test]
    fn test_every_codec_decodes_to_original_bytes() {
        for algorithm in [
            CompressionType::None,
            CompressionType::Zstd,
            CompressionType::Gzip,
            CompressionType::Lz4,
        ] {
            let framed = encode(DATA, algorithm).unwrap();
            assert_eq!(framed[1], algorithm.tag());
            assert_eq!(decode(&framed).unwrap(), DATA, "{algorithm:?}");
        }
    }

    #[test]
    fn test_decode_rejects_unframed_blob() {
        let err = decode(b"plain bytes").unwrap_err();
        assert!(matches!(
            err,
            gantry_core::Error::Cache(CacheError::Corrupt(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_codec() {
        assert!(decode(&[MAGIC, 9, 1, 2, 3]).is_err());
    }
}
