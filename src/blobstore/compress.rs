//! Transparent zstd compression with a versioned envelope (spec §4.A).
//!
//! The extension/marker format is an implementation detail: we prefix every
//! stored payload with one version byte so a future format change is
//! detected as [`crate::error::BlobError::Corrupt`] instead of silently
//! misparsed.

use crate::error::BlobError;

const ENVELOPE_V1: u8 = 1;

/// Compress `bytes` and prefix them with the envelope version byte.
pub fn encode(bytes: &[u8]) -> Result<Vec<u8>, BlobError> {
    let compressed = zstd::encode_all(bytes, 0).map_err(BlobError::Io)?;
    let mut out = Vec::with_capacity(compressed.len() + 1);
    out.push(ENVELOPE_V1);
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Reverse of [`encode`]. Returns `Corrupt` for an unknown envelope version
/// or a payload that fails to decompress/checksum.
pub fn decode(key: &str, bytes: &[u8]) -> Result<Vec<u8>, BlobError> {
    let Some((&version, payload)) = bytes.split_first() else {
        return Err(BlobError::Corrupt {
            key: key.to_owned(),
            reason: "empty payload".into(),
        });
    };
    if version != ENVELOPE_V1 {
        return Err(BlobError::Corrupt {
            key: key.to_owned(),
            reason: format!("unknown envelope version {version}"),
        });
    }
    zstd::decode_all(payload).map_err(|e| BlobError::Corrupt {
        key: key.to_owned(),
        reason: e.to_string(),
    })
}
