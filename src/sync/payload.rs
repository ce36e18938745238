//! Request body encoding: JSON, then gzip, then the size ceiling.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::error::{Result, SyncError};

/// Largest compressed body the server accepts.
pub const MAX_PAYLOAD_BYTES: usize = 3_000_000;

/// A gzip-compressed JSON body ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedBody {
    pub bytes: Vec<u8>,
    /// Size of the JSON before compression.
    pub raw_len: usize,
}

impl CompressedBody {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub fn compress_json<T: Serialize + ?Sized>(body: &T) -> Result<CompressedBody> {
    let json = serde_json::to_vec(body)
        .map_err(|e| SyncError::Protocol(format!("failed to encode request body: {e}")))?;
    let raw_len = json.len();

    let mut encoder = GzEncoder::new(Vec::with_capacity(raw_len / 4), Compression::default());
    encoder
        .write_all(&json)
        .and_then(|_| encoder.finish())
        .map(|bytes| CompressedBody { bytes, raw_len })
        .map_err(|e| SyncError::Protocol(format!("failed to compress request body: {e}")))
}

pub fn decompress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

/// Rejects bodies strictly larger than `limit`.
pub fn check_payload_size(size: usize, limit: usize) -> Result<()> {
    if size > limit {
        return Err(SyncError::PayloadTooLarge { size, limit });
    }
    Ok(())
}
