//! Session/controller: the single entry point a host (GUI,
//! CLI, test harness) drives. Owns the vault's file paths, the in-memory
//! state, the audit pipeline, and the running IPC server, and sequences
//! `unlock`/`lock` the way a sequence of state-mutating command handlers
//! would, generalized to a plain struct any caller can own.

use crate::audit::{AuditLog, AuditLogHandle, AuditStatistics, DEFAULT_CAPACITY};
use crate::backup::{self, ImportOptions, ImportResult};
use crate::error::{CoreError, CoreResult};
use crate::model::{ApiKeyEntry, ApiKeyPermissions, AuditLogEntry, SecretEntry};
use crate::server::{self, RunningServer};
use crate::state::VaultState;
use crate::vault::{self, LoadedVault};
use crate::{apikey, paths};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Everything the controller needs to locate a vault on disk, gathered once
/// at construction so tests can point it at a temp directory via the
/// `ARCA_*` environment overrides (see `paths`).
#[derive(Clone)]
pub struct ControllerPaths {
    pub vault_path: PathBuf,
    pub keys_path: PathBuf,
    pub audit_dir: PathBuf,
    pub ipc_port: u16,
}

impl Default for ControllerPaths {
    fn default() -> Self {
        let vault_path = paths::vault_path();
        let keys_path = paths::keys_path(&vault_path);
        Self { audit_dir: paths::audit_dir(), ipc_port: paths::ipc_port(), vault_path, keys_path }
    }
}

struct Session {
    salt: [u8; crate::crypto::SALT_LEN],
    created_at: chrono::DateTime<chrono::Utc>,
    server: Option<RunningServer>,
}

/// The host-facing controller surface. Not `Clone`; a host
/// holds one instance and shares it (typically behind an `Arc`) with
/// whatever drives the CLI or GUI event loop.
pub struct Controller {
    paths: ControllerPaths,
    state: Arc<Mutex<VaultState>>,
    audit: AuditLogHandle,
    session: Mutex<Option<Session>>,
}

impl Controller {
    pub fn new(paths: ControllerPaths) -> std::io::Result<Self> {
        let audit = crate::audit::start(paths.audit_dir.clone(), DEFAULT_CAPACITY)?;
        Ok(Self { paths, state: Arc::new(Mutex::new(VaultState::new())), audit, session: Mutex::new(None) })
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit.log
    }

    pub fn is_unlocked(&self) -> bool {
        self.state.lock().expect("vault state mutex poisoned").is_unlocked()
    }

    /// Creates a brand-new vault at the configured path and immediately
    /// unlocks it. Fails if a vault already exists there.
    pub fn create_vault(&self, password: &str) -> CoreResult<()> {
        let loaded = vault::container::create(&self.paths.vault_path, password)?;
        self.enter_unlocked(loaded, Vec::new())
    }

    /// Runs the KDF, decrypts the vault as proof of password, and — on
    /// success — populates in-memory state, loads the API-key store, and
    /// starts the IPC server. On `Authentication` failure surfaces
    /// `InvalidPassword` and leaves the controller Locked.
    pub fn unlock(&self, password: &str) -> CoreResult<()> {
        let loaded = vault::container::load(&self.paths.vault_path, password)?;
        let api_keys = vault::keystore::load(&self.paths.keys_path, &loaded.key);
        self.enter_unlocked(loaded, api_keys)
    }

    fn enter_unlocked(&self, loaded: LoadedVault, api_keys: Vec<ApiKeyEntry>) -> CoreResult<()> {
        {
            let mut state = self.state.lock().expect("vault state mutex poisoned");
            state.unlock(loaded.key, loaded.secrets);
            state.install_api_keys(api_keys);
        }

        let state_for_server = self.state.clone();
        let audit_for_server = self.audit.log.clone();
        let state_for_callback = self.state.clone();
        let on_api_key_used = move |id: Uuid| {
            let mut state = state_for_callback.lock().expect("vault state mutex poisoned");
            state.mark_api_key_used_by_id(id, chrono::Utc::now());
        };
        let server = server::start(state_for_server, audit_for_server, self.paths.ipc_port, on_api_key_used)
            .map_err(CoreError::IoError)?;

        *self.session.lock().expect("session mutex poisoned") =
            Some(Session { salt: loaded.salt, created_at: loaded.created_at, server: Some(server) });
        Ok(())
    }

    /// Stops the server, zeroizes the derived key, drops all plaintexts,
    /// and returns to Locked. Idempotent.
    pub fn lock(&self) {
        if let Some(session) = self.session.lock().expect("session mutex poisoned").take() {
            if let Some(server) = session.server {
                server.stop();
            }
        }
        self.state.lock().expect("vault state mutex poisoned").lock();
    }

    fn with_session<T>(&self, f: impl FnOnce(&Session) -> CoreResult<T>) -> CoreResult<T> {
        let guard = self.session.lock().expect("session mutex poisoned");
        let session = guard.as_ref().ok_or(CoreError::Locked)?;
        f(session)
    }

    fn persist_secrets(&self) -> CoreResult<()> {
        self.with_session(|session| {
            let state = self.state.lock().expect("vault state mutex poisoned");
            let key = state.derived_key()?;
            let secrets: Vec<SecretEntry> = state.all_secrets()?.into_iter().cloned().collect();
            vault::container::save(&self.paths.vault_path, &secrets, &session.salt, &key, session.created_at)
        })
    }

    fn persist_api_keys(&self) -> CoreResult<()> {
        let state = self.state.lock().expect("vault state mutex poisoned");
        let key = state.derived_key()?;
        let entries: Vec<ApiKeyEntry> = state.all_api_keys().into_iter().cloned().collect();
        vault::keystore::save(&self.paths.keys_path, &key, &entries)
    }

    pub fn add_secret(&self, key: String, value: String, description: Option<String>) -> CoreResult<()> {
        {
            let mut state = self.state.lock().expect("vault state mutex poisoned");
            state.put_secret(SecretEntry::new(key, value, description))?;
        }
        self.persist_secrets()
    }

    pub fn update_secret(&self, key: &str, value: String, description: Option<String>) -> CoreResult<()> {
        {
            let mut state = self.state.lock().expect("vault state mutex poisoned");
            state.update_secret(key, value, description)?;
        }
        self.persist_secrets()
    }

    pub fn delete_secret(&self, key: &str) -> CoreResult<()> {
        {
            let mut state = self.state.lock().expect("vault state mutex poisoned");
            state.delete_secret(key)?;
        }
        self.persist_secrets()
    }

    pub fn list_secrets(&self) -> CoreResult<Vec<SecretEntry>> {
        let state = self.state.lock().expect("vault state mutex poisoned");
        Ok(state.all_secrets()?.into_iter().cloned().collect())
    }

    /// Generates a new API key, persists it, and returns the plaintext (only
    /// ever returned here) alongside the stored entry.
    pub fn generate_api_key(
        &self,
        name: String,
        description: Option<String>,
        permissions: ApiKeyPermissions,
    ) -> CoreResult<(String, ApiKeyEntry)> {
        if !permissions.is_valid() {
            return Err(CoreError::ProtocolError("restricted key requires a non-empty allow list".to_string()));
        }
        let (plaintext, hash) = apikey::generate();
        let entry = ApiKeyEntry {
            id: Uuid::new_v4(),
            name,
            key_hash: hash,
            description,
            created_at: chrono::Utc::now(),
            last_used_at: None,
            is_active: true,
            permissions,
        };

        {
            let mut state = self.state.lock().expect("vault state mutex poisoned");
            state.add_api_key(entry.clone());
        }
        self.persist_api_keys()?;
        Ok((plaintext, entry))
    }

    pub fn revoke_api_key(&self, id: Uuid) -> CoreResult<()> {
        {
            let mut state = self.state.lock().expect("vault state mutex poisoned");
            state.revoke_api_key(id)?;
        }
        self.persist_api_keys()
    }

    pub fn export(&self, export_password: &str, path: &std::path::Path) -> CoreResult<()> {
        let state = self.state.lock().expect("vault state mutex poisoned");
        let secrets: Vec<SecretEntry> = state.all_secrets()?.into_iter().cloned().collect();
        let api_keys: Vec<ApiKeyEntry> = state.all_api_keys().into_iter().cloned().collect();
        backup::export(path, export_password, &secrets, &api_keys)
    }

    pub fn import(
        &self,
        export_password: &str,
        path: &std::path::Path,
        options: &ImportOptions,
    ) -> CoreResult<ImportResult> {
        let mut state = self.state.lock().expect("vault state mutex poisoned");
        let mut secrets: Vec<SecretEntry> = state.all_secrets()?.into_iter().cloned().collect();
        let mut api_keys: Vec<ApiKeyEntry> = state.all_api_keys().into_iter().cloned().collect();

        let result = backup::import(path, export_password, &mut secrets, &mut api_keys, options)?;

        state.replace_secrets(secrets)?;
        state.install_api_keys(api_keys);
        drop(state);

        self.persist_secrets()?;
        self.persist_api_keys()?;
        Ok(result)
    }

    pub fn audit_recent(&self, n: usize) -> Vec<AuditLogEntry> {
        self.audit.log.recent(n)
    }

    pub fn audit_statistics(&self) -> AuditStatistics {
        self.audit.log.statistics()
    }

    pub fn shutdown(self) {
        self.lock();
        self.audit.shutdown();
    }
}

