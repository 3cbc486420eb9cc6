//! The API-key store: a companion file `<vault>.keys` that reuses the
//! vault's derived key.
//!
//! Layout: `payload_len (i32 LE) ∥ payload`, where
//! `payload = nonce ∥ tag ∥ AES-GCM(JSON array of ApiKeyEntry)`. There is no
//! magic header. A missing or corrupt file yields an empty set defensively,
//! so opening a freshly-created vault never fails just because it has no
//! keys file yet.

use crate::crypto::{Aead, AesGcmAead};
use crate::error::CoreResult;
use crate::model::ApiKeyEntry;
use std::io::Write;
use std::path::Path;

/// Loads the API-key set, returning an empty vector if the file is absent,
/// truncated, or fails to decrypt/parse.
pub fn load(path: &Path, key: &[u8; 32]) -> Vec<ApiKeyEntry> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(_) => return Vec::new(),
    };
    try_decode(&bytes, key).unwrap_or_default()
}

fn try_decode(bytes: &[u8], key: &[u8; 32]) -> Option<Vec<ApiKeyEntry>> {
    if bytes.len() < 4 {
        return None;
    }
    let payload_len = i32::from_le_bytes(bytes[0..4].try_into().ok()?);
    if payload_len < 0 {
        return None;
    }
    let payload = bytes.get(4..4 + payload_len as usize)?;

    let plaintext = AesGcmAead.open(key, payload).ok()?;
    serde_json::from_slice(&plaintext).ok()
}

/// Rewrites the API-key store in full, atomically.
pub fn save(path: &Path, key: &[u8; 32], entries: &[ApiKeyEntry]) -> CoreResult<()> {
    let plaintext = serde_json::to_vec(entries)
        .map_err(|e| crate::error::CoreError::Corrupt(format!("api keys JSON encode: {e}")))?;
    let payload = AesGcmAead.seal(key, &plaintext)?;

    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as i32).to_le_bytes());
    out.extend_from_slice(&payload);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("keys.tmp");
    {
        let mut f = std::fs::File::create(&tmp_path)?;
        f.write_all(&out)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
