//! On-disk vault formats: the encrypted secret container and its sibling
//! API-key store.

pub mod container;
pub mod keystore;

pub use container::LoadedVault;
