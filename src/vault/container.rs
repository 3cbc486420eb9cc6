//! The vault's on-disk binary container format:
//!
//! ```text
//! magic      : "ARCA"            (4 bytes, ASCII)
//! version    : u32 little-endian
//! salt       : 16 bytes
//! created_at : i64 little-endian (nanoseconds since the Unix epoch, UTC)
//! payload_len: i32 little-endian
//! payload    : payload_len bytes   // nonce ∥ tag ∥ AES-GCM(JSON array of SecretEntry)
//! ```
//!
//! Writes are atomic at the file level: the container is rewritten in full
//! on each save via a write-to-temp-file-then-rename, so a crash mid-write
//! never leaves a half-written file at the real path.

use crate::crypto::{Aead, AesGcmAead, KeyDerivation, SALT_LEN};
use crate::error::{CoreError, CoreResult};
use crate::model::SecretEntry;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use std::io::Write;
use std::path::Path;

const MAGIC: &[u8; 4] = b"ARCA";
const CURRENT_VERSION: u32 = 1;
const MAX_SUPPORTED_VERSION: u32 = 1;

pub struct LoadedVault {
    pub secrets: Vec<SecretEntry>,
    pub salt: [u8; SALT_LEN],
    pub key: [u8; 32],
    pub created_at: DateTime<Utc>,
}

fn encode_created_at(ts: DateTime<Utc>) -> CoreResult<i64> {
    ts.timestamp_nanos_opt()
        .ok_or_else(|| CoreError::UnsupportedVersion(CURRENT_VERSION))
}

fn decode_created_at(nanos: i64) -> CoreResult<DateTime<Utc>> {
    let secs = nanos.div_euclid(1_000_000_000);
    let subsec_nanos = nanos.rem_euclid(1_000_000_000) as u32;
    DateTime::from_timestamp(secs, subsec_nanos)
        .ok_or(CoreError::UnsupportedVersion(CURRENT_VERSION))
}

/// Creates a new vault file at `path` containing an empty secrets array.
/// Fails if a file already exists at `path`.
pub fn create(path: &Path, password: &str) -> CoreResult<LoadedVault> {
    if path.exists() {
        return Err(CoreError::IoError(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "vault already exists",
        )));
    }

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let key = crate::crypto::Argon2idKdf.derive(password, &salt)?;
    let created_at = Utc::now();

    write_container(path, &salt, created_at, &key, &[])?;

    Ok(LoadedVault {
        secrets: Vec::new(),
        salt,
        key,
        created_at,
    })
}

/// Reads and decrypts the vault at `path` under `password`.
///
/// A magic mismatch yields `NotAVault`; an AEAD tag mismatch yields
/// `InvalidPassword` (the signal the session uses to judge password
/// correctness, not `Corrupt`); a JSON parse failure *after* a successful
/// tag check yields `Corrupt`.
pub fn load(path: &Path, password: &str) -> CoreResult<LoadedVault> {
    let bytes = std::fs::read(path)?;
    let header = Header::parse(&bytes)?;

    let key = crate::crypto::Argon2idKdf.derive(password, &header.salt)?;
    let plaintext = AesGcmAead
        .open(&key, header.payload)
        .map_err(|_| CoreError::InvalidPassword)?;

    let secrets: Vec<SecretEntry> = serde_json::from_slice(&plaintext)
        .map_err(|e| CoreError::Corrupt(format!("secrets JSON: {e}")))?;

    let created_at = decode_created_at(header.created_at_nanos)?;

    Ok(LoadedVault {
        secrets,
        salt: header.salt,
        key,
        created_at,
    })
}

/// Rewrites the vault file in full with the given secrets, reusing the
/// existing salt, key, and creation timestamp (metadata is immutable once
/// written).
pub fn save(
    path: &Path,
    secrets: &[SecretEntry],
    salt: &[u8; SALT_LEN],
    key: &[u8; 32],
    created_at: DateTime<Utc>,
) -> CoreResult<()> {
    write_container(path, salt, created_at, key, secrets)
}

fn write_container(
    path: &Path,
    salt: &[u8; SALT_LEN],
    created_at: DateTime<Utc>,
    key: &[u8; 32],
    secrets: &[SecretEntry],
) -> CoreResult<()> {
    let plaintext = serde_json::to_vec(secrets)
        .map_err(|e| CoreError::Corrupt(format!("secrets JSON encode: {e}")))?;
    let payload = AesGcmAead.seal(key, &plaintext)?;

    let mut out = Vec::with_capacity(4 + 4 + SALT_LEN + 8 + 4 + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&CURRENT_VERSION.to_le_bytes());
    out.extend_from_slice(salt);
    out.extend_from_slice(&encode_created_at(created_at)?.to_le_bytes());
    out.extend_from_slice(&(payload.len() as i32).to_le_bytes());
    out.extend_from_slice(&payload);

    atomic_write(path, &out)?;
    Ok(())
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut f = std::fs::File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)
}

struct Header<'a> {
    salt: [u8; SALT_LEN],
    created_at_nanos: i64,
    payload: &'a [u8],
}

impl<'a> Header<'a> {
    fn parse(bytes: &'a [u8]) -> CoreResult<Self> {
        const FIXED_LEN: usize = 4 + 4 + SALT_LEN + 8 + 4;
        if bytes.len() < FIXED_LEN || &bytes[0..4] != MAGIC {
            return Err(CoreError::NotAVault);
        }

        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if version > MAX_SUPPORTED_VERSION {
            return Err(CoreError::UnsupportedVersion(version));
        }

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&bytes[8..8 + SALT_LEN]);

        let created_at_offset = 8 + SALT_LEN;
        let created_at_nanos =
            i64::from_le_bytes(bytes[created_at_offset..created_at_offset + 8].try_into().unwrap());

        let payload_len_offset = created_at_offset + 8;
        let payload_len =
            i32::from_le_bytes(bytes[payload_len_offset..payload_len_offset + 4].try_into().unwrap());
        if payload_len < 0 {
            return Err(CoreError::Corrupt("negative payload length".into()));
        }
        let payload_start = payload_len_offset + 4;
        let payload_end = payload_start
            .checked_add(payload_len as usize)
            .ok_or_else(|| CoreError::Corrupt("payload length overflow".into()))?;
        let payload = bytes
            .get(payload_start..payload_end)
            .ok_or_else(|| CoreError::Corrupt("payload shorter than declared length".into()))?;

        Ok(Header {
            salt,
            created_at_nanos,
            payload,
        })
    }
}
