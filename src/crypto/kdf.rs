//! Password-based key derivation.
//!
//! v2 (current) vaults and backups use Argon2id with the fixed parameters
//! below; these are frozen for backward compatibility and must never change
//! without a container version bump. v1 backups (legacy, read-only) used
//! PBKDF2-HMAC-SHA256.

use crate::crypto::{KEY_LEN, SALT_LEN};
use crate::error::{CoreError, CoreResult};
use argon2::{Algorithm, Argon2, Params, Version};
use hmac::Hmac;
use pbkdf2::pbkdf2;
use sha2::Sha256;

/// Argon2id parallelism, fixed in v1 of the container format.
pub const ARGON2_PARALLELISM: u32 = 4;
/// Argon2id memory cost in KiB (64 MiB), fixed in v1 of the container format.
pub const ARGON2_MEMORY_KIB: u32 = 64 * 1024;
/// Argon2id iteration count, fixed in v1 of the container format.
pub const ARGON2_ITERATIONS: u32 = 3;

/// PBKDF2-HMAC-SHA256 iteration count used only by legacy (v1) backups.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

pub trait KeyDerivation {
    fn derive(&self, password: &str, salt: &[u8]) -> CoreResult<[u8; KEY_LEN]>;
}

/// The vault's and v2 backups' key derivation function.
#[derive(Default, Clone, Copy)]
pub struct Argon2idKdf;

impl KeyDerivation for Argon2idKdf {
    fn derive(&self, password: &str, salt: &[u8]) -> CoreResult<[u8; KEY_LEN]> {
        if salt.len() != SALT_LEN {
            return Err(CoreError::Kdf(format!(
                "expected {}-byte salt, got {}",
                SALT_LEN,
                salt.len()
            )));
        }
        let params = Params::new(
            ARGON2_MEMORY_KIB,
            ARGON2_ITERATIONS,
            ARGON2_PARALLELISM,
            Some(KEY_LEN),
        )
        .map_err(|e| CoreError::Kdf(format!("argon2 params: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; KEY_LEN];
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut key)
            .map_err(|e| CoreError::Kdf(format!("argon2: {e}")))?;
        Ok(key)
    }
}

/// The legacy (v1, read-only) backup key derivation function.
#[derive(Default, Clone, Copy)]
pub struct Pbkdf2Kdf;

impl KeyDerivation for Pbkdf2Kdf {
    fn derive(&self, password: &str, salt: &[u8]) -> CoreResult<[u8; KEY_LEN]> {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key)
            .map_err(|e| CoreError::Kdf(format!("pbkdf2: {e}")))?;
        Ok(key)
    }
}
