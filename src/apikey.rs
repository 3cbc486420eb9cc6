//! API-key string format: `arca_` followed by URL-safe base64
//! (no padding) of 32 random bytes. The stored `key_hash` is the lowercase
//! hexadecimal SHA-256 digest of the exact UTF-8 bytes of the full string,
//! prefix included.
//!
//! The plaintext key is never persisted; it is returned exactly once, at
//! generation time, by `generate()`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const KEY_PREFIX: &str = "arca_";
const SECRET_LEN: usize = 32;

/// Generates a new random API key, returning both the plaintext (to be
/// shown to the user once) and its hash (to be persisted).
pub fn generate() -> (String, String) {
    let mut secret = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut secret);
    let plaintext = format!("{KEY_PREFIX}{}", URL_SAFE_NO_PAD.encode(secret));
    let hash = hash_key(&plaintext);
    (plaintext, hash)
}

/// Lowercase hex SHA-256 of the exact UTF-8 bytes of `plaintext_key`.
pub fn hash_key(plaintext_key: &str) -> String {
    let digest = Sha256::digest(plaintext_key.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_has_prefix_and_decodes_to_32_bytes() {
        let (plaintext, _hash) = generate();
        assert!(plaintext.starts_with(KEY_PREFIX));
        let body = &plaintext[KEY_PREFIX.len()..];
        let decoded = URL_SAFE_NO_PAD.decode(body).unwrap();
        assert_eq!(decoded.len(), SECRET_LEN);
    }

    #[test]
    fn hash_matches_sha256_of_utf8_bytes() {
        let (plaintext, hash) = generate();
        let expected = hex::encode(Sha256::digest(plaintext.as_bytes()));
        assert_eq!(hash, expected);
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn generated_keys_are_unique() {
        let (a, _) = generate();
        let (b, _) = generate();
        assert_ne!(a, b);
    }
}
