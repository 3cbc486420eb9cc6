//! Cryptographic primitives: authenticated encryption and password-based key
//! derivation.
//!
//! Both primitives are exposed as small capability traits so tests can
//! substitute deterministic stand-ins without paying for real Argon2id
//! timing (see `DESIGN.md`, "Polymorphism").

pub mod aead;
pub mod kdf;

pub use aead::{Aead, AesGcmAead};
pub use kdf::{Argon2idKdf, KeyDerivation, Pbkdf2Kdf};

pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
