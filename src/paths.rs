//! Default on-disk locations, overridable per process via environment
//! variables for test isolation and multi-instance operation.
//!
//! This is the portable analogue of a Tauri app handle's
//! `app.path().app_data_dir()` lookup, generalized to a pure function of the
//! host's per-user local-data directory.

use std::path::PathBuf;

const APP_DIR_NAME: &str = "Arca";
const VAULT_FILENAME: &str = "vault.vlt";
const KEYS_SUFFIX: &str = ".keys";
const LOGS_DIR_NAME: &str = "Logs";

pub const DEFAULT_IPC_PORT: u16 = 47652;

fn local_app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

/// `<local-app-data>/Arca/vault.vlt`, or `ARCA_VAULT_PATH` if set.
pub fn vault_path() -> PathBuf {
    if let Ok(p) = std::env::var("ARCA_VAULT_PATH") {
        return PathBuf::from(p);
    }
    local_app_data_dir().join(VAULT_FILENAME)
}

/// The API-key store sibling of the vault file: `<vault>.keys`.
pub fn keys_path(vault_path: &std::path::Path) -> PathBuf {
    if let Ok(p) = std::env::var("ARCA_KEYS_PATH") {
        return PathBuf::from(p);
    }
    let mut os_string = vault_path.as_os_str().to_os_string();
    os_string.push(KEYS_SUFFIX);
    PathBuf::from(os_string)
}

/// `<local-app-data>/Arca/Logs`, or `ARCA_AUDIT_DIR` if set.
pub fn audit_dir() -> PathBuf {
    if let Ok(p) = std::env::var("ARCA_AUDIT_DIR") {
        return PathBuf::from(p);
    }
    local_app_data_dir().join(LOGS_DIR_NAME)
}

/// The loopback port the IPC server binds, or `ARCA_IPC_PORT` if set.
pub fn ipc_port() -> u16 {
    std::env::var("ARCA_IPC_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_IPC_PORT)
}
