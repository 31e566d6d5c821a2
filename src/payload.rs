// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bus payload framing: optional zstd compression and a content hash.
//!
//! Payloads at or above the configured threshold are zstd-compressed before
//! they are written to the bus. The reader detects compression by the zstd
//! magic header, so compressed and uncompressed entries can share a stream.
//! The SHA-256 of the *uncompressed* payload travels next to it and is
//! checked after decompression.

use crate::error::{ReplicationError, Result};
use std::io::Read;

/// zstd frame magic number.
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

const ZSTD_LEVEL: i32 = 3;

/// Compress `raw` when it reaches `threshold` bytes.
///
/// Compression is skipped (raw bytes returned) when the threshold is `None`,
/// when zstd fails, or when the result would not be smaller. Raw bytes that
/// already start with the zstd magic are always framed, otherwise the reader
/// would mistake them for a compressed entry.
pub fn encode(raw: &[u8], threshold: Option<usize>) -> Vec<u8> {
    let ambiguous = raw.starts_with(&ZSTD_MAGIC);
    let wanted = matches!(threshold, Some(min) if raw.len() >= min);
    if !ambiguous && !wanted {
        return raw.to_vec();
    }

    match zstd::encode_all(raw, ZSTD_LEVEL) {
        Ok(compressed) if ambiguous || compressed.len() < raw.len() => {
            crate::metrics::record_compression(raw.len(), compressed.len());
            compressed
        }
        _ => raw.to_vec(),
    }
}

/// Decompress zstd data if it has the magic header, otherwise return as-is.
pub fn maybe_decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() >= 4 && data[..4] == ZSTD_MAGIC {
        let mut decoder = zstd::Decoder::new(data)
            .map_err(|e| ReplicationError::Decompression(format!("zstd init: {}", e)))?;
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| ReplicationError::Decompression(format!("zstd decode: {}", e)))?;
        Ok(decompressed)
    } else {
        Ok(data.to_vec())
    }
}

/// SHA-256 content hash as lowercase hex.
pub fn compute_content_hash(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}

/// Decompress `data` and check it against `expected_hash`, if one was sent.
pub fn decode(data: &[u8], expected_hash: Option<&str>) -> Result<Vec<u8>> {
    let payload = maybe_decompress(data)?;
    if let Some(expected) = expected_hash {
        let computed = compute_content_hash(&payload);
        if computed != expected {
            return Err(ReplicationError::MalformedInput(format!(
                "content hash mismatch: expected {}, got {}",
                expected, computed
            )));
        }
    }
    Ok(payload)
}
