//! The encrypted backup (export/import) codec: a
//! self-contained archive, password-protected independently of the vault.
//!
//! ```text
//! magic       : "ARCAEXPORT"    (10 bytes ASCII)
//! version     : i32 LE          (v2 current)
//! salt        : 16 bytes
//! nonce       : 12 bytes
//! tag         : 16 bytes
//! cipher_len  : i32 LE
//! cipher      : cipher_len bytes   // AES-GCM over gzip(JSON payload)
//! ```
//!
//! v2 derives the key with Argon2id (same parameters as the vault). v1 is
//! read-only legacy: PBKDF2-HMAC-SHA256, 100,000 iterations, 32-byte output.
//! New exports always use v2.

use crate::crypto::{Aead, AesGcmAead, Argon2idKdf, KeyDerivation, Pbkdf2Kdf, NONCE_LEN, SALT_LEN, TAG_LEN};
use crate::error::{CoreError, CoreResult};
use crate::model::{AccessLevel, ApiKeyEntry, ApiKeyPermissions};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::Path;

const MAGIC: &[u8; 10] = b"ARCAEXPORT";
const VERSION_V1_LEGACY: i32 = 1;
const VERSION_V2: i32 = 2;

#[derive(Serialize, Deserialize)]
struct ExportedSecret {
    key: String,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct ExportedApiKey {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    created_at: DateTime<Utc>,
    access_level: String,
    allowed_secrets: HashSet<String>,
    can_list: bool,
}

#[derive(Serialize, Deserialize)]
struct ExportPayload {
    version: i32,
    exported_at: DateTime<Utc>,
    exported_from: String,
    secrets: Vec<ExportedSecret>,
    api_keys: Vec<ExportedApiKey>,
}

#[derive(Default, Debug, Clone)]
pub struct ImportOptions {
    pub overwrite_existing: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportResult {
    pub secrets_imported: usize,
    pub secrets_overwritten: usize,
    pub secrets_skipped: usize,
    pub api_keys_imported: usize,
    pub api_keys_skipped: usize,
}

fn exported_from_host() -> String {
    whoami::fallible::hostname().unwrap_or_else(|_| "unknown-host".to_string())
}

/// Writes an encrypted backup of `secrets` and `api_keys` to `path` under
/// `export_password`. Always produces a v2 (Argon2id) archive.
pub fn export(
    path: &Path,
    export_password: &str,
    secrets: &[crate::model::SecretEntry],
    api_keys: &[ApiKeyEntry],
) -> CoreResult<()> {
    let payload = ExportPayload {
        version: VERSION_V2,
        exported_at: Utc::now(),
        exported_from: exported_from_host(),
        secrets: secrets
            .iter()
            .map(|s| ExportedSecret {
                key: s.key.clone(),
                value: s.value.clone(),
                description: s.description.clone(),
                created_at: s.created_at,
            })
            .collect(),
        api_keys: api_keys
            .iter()
            .map(|k| ExportedApiKey {
                name: k.name.clone(),
                description: k.description.clone(),
                created_at: k.created_at,
                access_level: k.permissions.level.to_string(),
                allowed_secrets: k.permissions.allowed_secrets.clone(),
                can_list: k.permissions.can_list,
            })
            .collect(),
    };

    let json = serde_json::to_vec(&payload)
        .map_err(|e| CoreError::Corrupt(format!("export JSON encode: {e}")))?;
    let gzipped = gzip_compress(&json)?;

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let key = Argon2idKdf.derive(export_password, &salt)?;
    let blob = AesGcmAead.seal(&key, &gzipped)?;
    let (nonce, tag, cipher) = split_blob(&blob)?;

    let mut out = Vec::with_capacity(10 + 4 + SALT_LEN + NONCE_LEN + TAG_LEN + 4 + cipher.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION_V2.to_le_bytes());
    out.extend_from_slice(&salt);
    out.extend_from_slice(nonce);
    out.extend_from_slice(tag);
    out.extend_from_slice(&(cipher.len() as i32).to_le_bytes());
    out.extend_from_slice(cipher);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, out)?;
    Ok(())
}

struct ParsedArchive<'a> {
    version: i32,
    salt: [u8; SALT_LEN],
    nonce: &'a [u8],
    tag: &'a [u8],
    cipher: &'a [u8],
}

fn parse_archive(bytes: &[u8]) -> CoreResult<ParsedArchive<'_>> {
    const FIXED_LEN: usize = 10 + 4 + SALT_LEN + NONCE_LEN + TAG_LEN + 4;
    if bytes.len() < FIXED_LEN || &bytes[0..10] != MAGIC {
        return Err(CoreError::NotAVault);
    }

    let version = i32::from_le_bytes(bytes[10..14].try_into().unwrap());
    if version != VERSION_V1_LEGACY && version != VERSION_V2 {
        return Err(CoreError::UnsupportedVersion(version as u32));
    }

    let mut offset = 14;
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&bytes[offset..offset + SALT_LEN]);
    offset += SALT_LEN;

    let nonce = &bytes[offset..offset + NONCE_LEN];
    offset += NONCE_LEN;

    let tag = &bytes[offset..offset + TAG_LEN];
    offset += TAG_LEN;

    let cipher_len = i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
    offset += 4;
    if cipher_len < 0 {
        return Err(CoreError::Corrupt("negative cipher length".into()));
    }
    let cipher = bytes
        .get(offset..offset + cipher_len as usize)
        .ok_or_else(|| CoreError::Corrupt("cipher shorter than declared length".into()))?;

    Ok(ParsedArchive {
        version,
        salt,
        nonce,
        tag,
        cipher,
    })
}

/// Decrypts and parses the archive at `path` under `export_password`,
/// deriving the key with Argon2id (v2) or PBKDF2-HMAC-SHA256 (v1, legacy)
/// depending on the archive's declared version.
fn load_payload(path: &Path, export_password: &str) -> CoreResult<ExportPayload> {
    let bytes = std::fs::read(path)?;
    let archive = parse_archive(&bytes)?;

    let key = match archive.version {
        v if v == VERSION_V2 => Argon2idKdf.derive(export_password, &archive.salt)?,
        v if v == VERSION_V1_LEGACY => Pbkdf2Kdf.derive(export_password, &archive.salt)?,
        other => return Err(CoreError::UnsupportedVersion(other as u32)),
    };

    let mut blob = Vec::with_capacity(NONCE_LEN + TAG_LEN + archive.cipher.len());
    blob.extend_from_slice(archive.nonce);
    blob.extend_from_slice(archive.tag);
    blob.extend_from_slice(archive.cipher);

    let gzipped = AesGcmAead.open(&key, &blob).map_err(|_| CoreError::InvalidPassword)?;
    let json = gzip_decompress(&gzipped)?;

    serde_json::from_slice(&json).map_err(|e| CoreError::Corrupt(format!("export JSON decode: {e}")))
}

/// Imports secrets and API keys from the archive at `path` into the given
/// mutable collections, applying the following merge semantics:
/// colliding secret keys are overwritten or skipped per `options`; imported
/// API keys are inserted inactive with an empty hash, skipping
/// case-insensitive name collisions.
pub fn import(
    path: &Path,
    export_password: &str,
    existing_secrets: &mut Vec<crate::model::SecretEntry>,
    existing_api_keys: &mut Vec<ApiKeyEntry>,
    options: &ImportOptions,
) -> CoreResult<ImportResult> {
    let payload = load_payload(path, export_password)?;
    let mut result = ImportResult::default();

    for imported in payload.secrets {
        let lower = imported.key.to_ascii_lowercase();
        if let Some(existing) = existing_secrets
            .iter_mut()
            .find(|s| s.key.to_ascii_lowercase() == lower)
        {
            if options.overwrite_existing {
                existing.value = imported.value;
                existing.description = imported.description;
                existing.touch();
                result.secrets_overwritten += 1;
            } else {
                result.secrets_skipped += 1;
            }
            continue;
        }

        existing_secrets.push(crate::model::SecretEntry::new(
            imported.key,
            imported.value,
            imported.description,
        ));
        result.secrets_imported += 1;
    }

    for imported in payload.api_keys {
        let lower_name = imported.name.to_ascii_lowercase();
        if existing_api_keys
            .iter()
            .any(|k| k.name.to_ascii_lowercase() == lower_name)
        {
            result.api_keys_skipped += 1;
            continue;
        }

        let level: AccessLevel = imported.access_level.parse().unwrap_or(AccessLevel::Restricted);
        existing_api_keys.push(ApiKeyEntry {
            id: uuid::Uuid::new_v4(),
            name: imported.name,
            key_hash: String::new(),
            description: imported.description,
            created_at: imported.created_at,
            last_used_at: None,
            is_active: false,
            permissions: ApiKeyPermissions {
                level,
                allowed_secrets: imported.allowed_secrets,
                allowed_prefixes: HashSet::new(),
                can_list: imported.can_list,
            },
        });
        result.api_keys_imported += 1;
    }

    Ok(result)
}

fn split_blob(blob: &[u8]) -> CoreResult<(&[u8], &[u8], &[u8])> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(CoreError::Corrupt("sealed blob too short".into()));
    }
    let (nonce, rest) = blob.split_at(NONCE_LEN);
    let (tag, cipher) = rest.split_at(TAG_LEN);
    Ok((nonce, tag, cipher))
}

fn gzip_compress(data: &[u8]) -> CoreResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CoreError::Corrupt(format!("gzip compress: {e}")))?;
    encoder
        .finish()
        .map_err(|e| CoreError::Corrupt(format!("gzip compress: {e}")))
}

fn gzip_decompress(data: &[u8]) -> CoreResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CoreError::Corrupt(format!("gzip decompress: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SecretEntry;
    use tempfile::tempdir;

    fn sample_secrets() -> Vec<SecretEntry> {
        vec![
            SecretEntry::new("db".into(), "s3cret".into(), Some("prod DB".into())),
            SecretEntry::new("cache".into(), "c4che".into(), None),
        ]
    }

    #[test]
    fn export_then_import_round_trips_secrets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup.arcavault");
        let secrets = sample_secrets();

        export(&path, "export-pw", &secrets, &[]).unwrap();

        let mut imported_secrets = Vec::new();
        let mut imported_keys = Vec::new();
        let result = import(
            &path,
            "export-pw",
            &mut imported_secrets,
            &mut imported_keys,
            &ImportOptions::default(),
        )
        .unwrap();

        assert_eq!(result.secrets_imported, secrets.len());
        assert_eq!(imported_secrets.len(), secrets.len());
        assert!(imported_secrets.iter().any(|s| s.key == "db" && s.value == "s3cret"));
    }

    #[test]
    fn imported_api_keys_are_inactive_with_empty_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup.arcavault");
        let api_keys = vec![ApiKeyEntry {
            id: uuid::Uuid::new_v4(),
            name: "ci".into(),
            key_hash: "f".repeat(64),
            description: None,
            created_at: Utc::now(),
            last_used_at: None,
            is_active: true,
            permissions: ApiKeyPermissions::full(),
        }];
        export(&path, "pw", &[], &api_keys).unwrap();

        let mut secrets = Vec::new();
        let mut keys = Vec::new();
        let result = import(&path, "pw", &mut secrets, &mut keys, &ImportOptions::default()).unwrap();

        assert_eq!(result.api_keys_imported, 1);
        assert_eq!(keys.len(), 1);
        assert!(!keys[0].is_active);
        assert!(keys[0].key_hash.is_empty());
    }

    #[test]
    fn wrong_export_password_yields_invalid_password() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup.arcavault");
        export(&path, "right", &sample_secrets(), &[]).unwrap();

        let mut secrets = Vec::new();
        let mut keys = Vec::new();
        let err = import(&path, "wrong", &mut secrets, &mut keys, &ImportOptions::default()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPassword));
    }

    #[test]
    fn colliding_secret_is_skipped_without_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup.arcavault");
        export(&path, "pw", &sample_secrets(), &[]).unwrap();

        let mut existing = vec![SecretEntry::new("DB".into(), "old-value".into(), None)];
        let mut keys = Vec::new();
        let result = import(
            &path,
            "pw",
            &mut existing,
            &mut keys,
            &ImportOptions { overwrite_existing: false },
        )
        .unwrap();

        assert_eq!(result.secrets_skipped, 1);
        assert_eq!(result.secrets_imported, 1); // "cache" is new
        let db = existing.iter().find(|s| s.key.eq_ignore_ascii_case("db")).unwrap();
        assert_eq!(db.value, "old-value");
    }

    #[test]
    fn colliding_secret_is_overwritten_when_requested() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup.arcavault");
        export(&path, "pw", &sample_secrets(), &[]).unwrap();

        let mut existing = vec![SecretEntry::new("DB".into(), "old-value".into(), None)];
        let mut keys = Vec::new();
        let result = import(
            &path,
            "pw",
            &mut existing,
            &mut keys,
            &ImportOptions { overwrite_existing: true },
        )
        .unwrap();

        assert_eq!(result.secrets_overwritten, 1);
        let db = existing.iter().find(|s| s.key.eq_ignore_ascii_case("db")).unwrap();
        assert_eq!(db.value, "s3cret");
    }

    #[test]
    fn legacy_v1_archive_uses_pbkdf2_and_round_trips() {
        // Hand-roll a v1 archive the way a legacy exporter would have:
        // same outer layout, key derived with PBKDF2-HMAC-SHA256.
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.arcavault");

        let payload = ExportPayload {
            version: VERSION_V1_LEGACY,
            exported_at: Utc::now(),
            exported_from: "legacy-host".into(),
            secrets: vec![ExportedSecret {
                key: "db".into(),
                value: "s3cret".into(),
                description: None,
                created_at: Utc::now(),
            }],
            api_keys: vec![],
        };
        let json = serde_json::to_vec(&payload).unwrap();
        let gzipped = gzip_compress(&json).unwrap();

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let key = Pbkdf2Kdf.derive("legacy-pw", &salt).unwrap();
        let blob = AesGcmAead.seal(&key, &gzipped).unwrap();
        let (nonce, tag, cipher) = split_blob(&blob).unwrap();

        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION_V1_LEGACY.to_le_bytes());
        out.extend_from_slice(&salt);
        out.extend_from_slice(nonce);
        out.extend_from_slice(tag);
        out.extend_from_slice(&(cipher.len() as i32).to_le_bytes());
        out.extend_from_slice(cipher);
        std::fs::write(&path, out).unwrap();

        let mut secrets = Vec::new();
        let mut keys = Vec::new();
        let result = import(
            &path,
            "legacy-pw",
            &mut secrets,
            &mut keys,
            &ImportOptions::default(),
        )
        .unwrap();
        assert_eq!(result.secrets_imported, 1);

        let err = import(
            &path,
            "wrong-pw",
            &mut Vec::new(),
            &mut Vec::new(),
            &ImportOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPassword));
    }
}
