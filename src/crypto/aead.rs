//! Authenticated encryption.
//!
//! The wire layout of every ciphertext blob produced by this module is the
//! byte concatenation `nonce ∥ tag ∥ ciphertext` (12-byte nonce, 16-byte tag).
//! A fresh random nonce is generated on every call to `seal`.

use crate::crypto::{KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::error::{CoreError, CoreResult};
use aes_gcm::aead::{Aead as _, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

pub trait Aead {
    /// Encrypts `plaintext` under `key`, returning `nonce ∥ tag ∥ ciphertext`.
    fn seal(&self, key: &[u8], plaintext: &[u8]) -> CoreResult<Vec<u8>>;

    /// Decrypts a `nonce ∥ tag ∥ ciphertext` blob produced by `seal`.
    /// A tag mismatch (wrong key or tampered data) yields `CoreError::Authentication`.
    fn open(&self, key: &[u8], blob: &[u8]) -> CoreResult<Vec<u8>>;
}

#[derive(Default, Clone, Copy)]
pub struct AesGcmAead;

impl Aead for AesGcmAead {
    fn seal(&self, key: &[u8], plaintext: &[u8]) -> CoreResult<Vec<u8>> {
        if key.len() != KEY_LEN {
            return Err(CoreError::InvalidKeyLength(key.len()));
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // The crate appends the 16-byte tag to the end of the ciphertext;
        // the wire layout wants it between the nonce and the ciphertext, so
        // split and reorder.
        let mut ciphertext = cipher
            .encrypt(nonce, Payload { msg: plaintext, aad: &[] })
            .map_err(|_| CoreError::Authentication)?;
        let tag = ciphertext.split_off(ciphertext.len() - TAG_LEN);

        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&tag);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open(&self, key: &[u8], blob: &[u8]) -> CoreResult<Vec<u8>> {
        if key.len() != KEY_LEN {
            return Err(CoreError::InvalidKeyLength(key.len()));
        }
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(CoreError::Corrupt("ciphertext blob too short".into()));
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

        let (nonce_bytes, rest) = blob.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let mut ciphertext_and_tag = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        ciphertext_and_tag.extend_from_slice(ciphertext);
        ciphertext_and_tag.extend_from_slice(tag);

        cipher
            .decrypt(nonce, Payload { msg: &ciphertext_and_tag, aad: &[] })
            .map_err(|_| CoreError::Authentication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = [1u8; KEY_LEN];
        let plaintext = b"hello, vault";
        let blob = AesGcmAead.seal(&key, plaintext).unwrap();
        let opened = AesGcmAead.open(&key, &blob).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let key = [1u8; KEY_LEN];
        let other_key = [2u8; KEY_LEN];
        let blob = AesGcmAead.seal(&key, b"secret").unwrap();
        let err = AesGcmAead.open(&other_key, &blob).unwrap_err();
        assert!(matches!(err, CoreError::Authentication));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key = [9u8; KEY_LEN];
        let mut blob = AesGcmAead.seal(&key, b"tamper me").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        let err = AesGcmAead.open(&key, &blob).unwrap_err();
        assert!(matches!(err, CoreError::Authentication));
    }

    #[test]
    fn wrong_key_length_rejected() {
        let err = AesGcmAead.seal(&[0u8; 10], b"x").unwrap_err();
        assert!(matches!(err, CoreError::InvalidKeyLength(10)));
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let key = [5u8; KEY_LEN];
        let a = AesGcmAead.seal(&key, b"same plaintext").unwrap();
        let b = AesGcmAead.seal(&key, b"same plaintext").unwrap();
        assert_ne!(&a[..NONCE_LEN], &b[..NONCE_LEN]);
    }
}
