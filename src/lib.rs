//! Arca - a single-user, host-local secrets manager core.
//!
//! This crate provides the trust-critical subsystem of Arca: the encrypted
//! vault, the API-key-authenticated local IPC server, the audit pipeline,
//! and the encrypted backup codec. It has no GUI of its own — see the
//! `arcad` binary for a headless controller surface any host can drive.
//!
//! # Architecture
//!
//! ```text
//! Host (CLI / GUI / test harness)
//!     │ Controller::unlock / add_secret / ...
//!     ▼
//! controller.rs ──── session orchestration
//!     │
//!     ├── vault/ ──── container + keystore on-disk formats
//!     ├── crypto/ ──── Argon2id KDF, AES-256-GCM AEAD
//!     ├── state.rs ─── in-memory secrets + API keys
//!     ├── authz.rs ─── pure authorization evaluator
//!     ├── audit/ ───── append-only request log
//!     ├── server/ ──── loopback IPC listener + wire protocol
//!     └── backup.rs ── encrypted export/import codec
//! ```
//!
//! # Security features
//!
//! - **Argon2id** key derivation (64 MiB memory, 3 iterations, parallelism 4)
//! - **AES-256-GCM** authenticated encryption of the vault and backups
//! - **Zeroize** for secret hygiene on drop
//! - Case-insensitive, per-secret authorization with `Full`/`Restricted` API keys

pub mod apikey;
pub mod audit;
pub mod authz;
pub mod backup;
pub mod controller;
pub mod crypto;
pub mod error;
pub mod model;
pub mod paths;
pub mod server;
pub mod state;
pub mod vault;

pub use controller::{Controller, ControllerPaths};
pub use error::{CoreError, CoreResult};
