//! Error taxonomy shared by every fallible core operation.
//!
//! Storage and crypto errors propagate up to the controller unchanged; the
//! IPC server maps them to wire-level `ERROR|...` responses (see
//! `server::protocol`), except `NotFound` (-> `NOTFOUND`) and authorization
//! denial of `EXISTS` (-> `FALSE`), which are not surfaced as errors at all.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not a vault file")]
    NotAVault,

    #[error("unsupported vault version: {0}")]
    UnsupportedVersion(u32),

    #[error("invalid password")]
    InvalidPassword,

    #[error("corrupt vault: {0}")]
    Corrupt(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("invalid api key")]
    InvalidApiKey,

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("secret not found")]
    NotFound,

    #[error("duplicate secret key")]
    Duplicate,

    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("authentication failed (aead tag mismatch)")]
    Authentication,

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("vault is locked")]
    Locked,
}

pub type CoreResult<T> = Result<T, CoreError>;
