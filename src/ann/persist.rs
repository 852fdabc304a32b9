//! Checksummed index files.
//!
//! Index files are bincode with a 4-byte magic and a CRC32 footer:
//! `[bincode payload][magic "MSA1"][CRC32 BE]`. Writes go to a temp file and
//! rename into place so a crash never leaves a partial file behind.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EngineError, Result};

const INDEX_MAGIC: &[u8; 4] = b"MSA1";

/// Serialize `value` to `path` with the magic + CRC32 footer, atomically.
pub fn save_index<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let bytes =
        bincode::serialize(value).map_err(|e| EngineError::Internal(format!("serialize index: {e}")))?;
    let crc = crc32fast::hash(&bytes);

    let mut out = Vec::with_capacity(bytes.len() + 8);
    out.extend_from_slice(&bytes);
    out.extend_from_slice(INDEX_MAGIC);
    out.extend_from_slice(&crc.to_be_bytes());

    let tmp = path.with_extension("ann.tmp");
    fs::write(&tmp, &out).map_err(|e| EngineError::io_op(tmp.display().to_string(), "write", e))?;
    fs::rename(&tmp, path)
        .map_err(|e| EngineError::io_op(path.display().to_string(), "rename", e))?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), crc = format_args!("{crc:#010x}"), "saved index file");
    Ok(())
}

/// Read an index file, verifying the footer before deserializing.
pub fn load_index<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path).map_err(|e| EngineError::io_op(path.display().to_string(), "read", e))?;
    if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != INDEX_MAGIC {
        return Err(EngineError::Internal(format!(
            "index file {} has no integrity footer",
            path.display()
        )));
    }
    let payload = &raw[..raw.len() - 8];
    let stored = u32::from_be_bytes([
        raw[raw.len() - 4],
        raw[raw.len() - 3],
        raw[raw.len() - 2],
        raw[raw.len() - 1],
    ]);
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return Err(EngineError::Internal(format!(
            "index file {} failed CRC check (stored {stored:#010x}, computed {computed:#010x})",
            path.display()
        )));
    }
    bincode::deserialize(payload)
        .map_err(|e| EngineError::Internal(format!("deserialize index {}: {e}", path.display())))
}

/// Whether a file carries a valid footer, without deserializing. Used by
/// snapshot validation.
pub fn verify_footer(path: &Path) -> Result<bool> {
    let raw = fs::read(path).map_err(|e| EngineError::io_op(path.display().to_string(), "read", e))?;
    if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != INDEX_MAGIC {
        return Ok(false);
    }
    let payload = &raw[..raw.len() - 8];
    let stored = u32::from_be_bytes([
        raw[raw.len() - 4],
        raw[raw.len() - 3],
        raw[raw.len() - 2],
        raw[raw.len() - 1],
    ]);
    Ok(stored == crc32fast::hash(payload))
}
