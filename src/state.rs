//! The in-memory vault state: the authoritative runtime view of the derived
//! key, decrypted secrets, and active API keys.
//!
//! Mirrors an `AppState`/`VaultSession` split (an `Arc<Mutex<Option<...>>>`
//! per piece of sensitive state, with a documented lock order), generalized
//! from Tauri-managed state to a plain struct any host process can
//! construct.

use crate::error::{CoreError, CoreResult};
use crate::model::{ApiKeyEntry, SecretEntry};
use std::collections::BTreeMap;
use zeroize::Zeroizing;

/// The derived key and decrypted secret map live here while the vault is
/// unlocked. Dropping (or explicitly clearing) this struct zeroizes the key
/// and, via `SecretEntry`'s own `Drop`, every secret value it held.
pub struct Unlocked {
    key: Zeroizing<[u8; 32]>,
    /// Keyed by the lowercased secret key, so lookups are case-insensitive;
    /// the entry itself retains the originally-cased `key`.
    secrets: BTreeMap<String, SecretEntry>,
}

impl Unlocked {
    fn new(key: [u8; 32], secrets: Vec<SecretEntry>) -> Self {
        let mut map = BTreeMap::new();
        for entry in secrets {
            map.insert(entry.key.to_ascii_lowercase(), entry);
        }
        Self {
            key: Zeroizing::new(key),
            secrets: map,
        }
    }

    pub fn key_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

/// Central runtime state: unlocked key material + secrets, and the active
/// API-key set. A single-writer discipline is enforced by requiring `&mut
/// self` for every mutating operation; callers serialize access through the
/// controller.
#[derive(Default)]
pub struct VaultState {
    unlocked: Option<Unlocked>,
    api_keys: BTreeMap<String, ApiKeyEntry>,
}

impl VaultState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.is_some()
    }

    pub fn unlock(&mut self, key: [u8; 32], secrets: Vec<SecretEntry>) {
        self.unlocked = Some(Unlocked::new(key, secrets));
    }

    /// Idempotent: dropping `self.unlocked` zeroizes the key (`Zeroizing`)
    /// and every secret value (`SecretEntry::drop`). Calling `lock` on an
    /// already-locked state is a no-op.
    pub fn lock(&mut self) {
        self.unlocked = None;
    }

    pub fn derived_key(&self) -> CoreResult<[u8; 32]> {
        Ok(*self.unlocked.as_ref().ok_or(CoreError::Locked)?.key_bytes())
    }

    pub fn get_secret(&self, key: &str) -> CoreResult<Option<&SecretEntry>> {
        let unlocked = self.unlocked.as_ref().ok_or(CoreError::Locked)?;
        Ok(unlocked.secrets.get(&key.to_ascii_lowercase()))
    }

    pub fn put_secret(&mut self, mut entry: SecretEntry) -> CoreResult<()> {
        let unlocked = self.unlocked.as_mut().ok_or(CoreError::Locked)?;
        let lower = entry.key.to_ascii_lowercase();
        if unlocked.secrets.contains_key(&lower) {
            return Err(CoreError::Duplicate);
        }
        entry.touch();
        unlocked.secrets.insert(lower, entry);
        Ok(())
    }

    pub fn update_secret(&mut self, key: &str, value: String, description: Option<String>) -> CoreResult<()> {
        let unlocked = self.unlocked.as_mut().ok_or(CoreError::Locked)?;
        let entry = unlocked
            .secrets
            .get_mut(&key.to_ascii_lowercase())
            .ok_or(CoreError::NotFound)?;
        entry.value = value;
        entry.description = description;
        entry.touch();
        Ok(())
    }

    pub fn delete_secret(&mut self, key: &str) -> CoreResult<()> {
        let unlocked = self.unlocked.as_mut().ok_or(CoreError::Locked)?;
        unlocked
            .secrets
            .remove(&key.to_ascii_lowercase())
            .map(|_| ())
            .ok_or(CoreError::NotFound)
    }

    pub fn list_keys(&self, filter: Option<&str>) -> CoreResult<Vec<String>> {
        let unlocked = self.unlocked.as_ref().ok_or(CoreError::Locked)?;
        let filter_lower = filter.map(str::to_ascii_lowercase);
        Ok(unlocked
            .secrets
            .values()
            .filter(|e| match filter_lower.as_deref() {
                Some(f) => e.key.to_ascii_lowercase().contains(f),
                None => true,
            })
            .map(|e| e.key.clone())
            .collect())
    }

    pub fn all_secrets(&self) -> CoreResult<Vec<&SecretEntry>> {
        let unlocked = self.unlocked.as_ref().ok_or(CoreError::Locked)?;
        Ok(unlocked.secrets.values().collect())
    }

    /// Replaces the entire secret set in place, keeping the session's
    /// derived key. Used by import, which rewrites the vault contents
    /// without a fresh unlock.
    pub fn replace_secrets(&mut self, secrets: Vec<SecretEntry>) -> CoreResult<()> {
        let unlocked = self.unlocked.as_mut().ok_or(CoreError::Locked)?;
        unlocked.secrets = secrets.into_iter().map(|e| (e.key.to_ascii_lowercase(), e)).collect();
        Ok(())
    }

    pub fn install_api_keys(&mut self, keys: Vec<ApiKeyEntry>) {
        self.api_keys = keys.into_iter().map(|k| (k.key_hash.clone(), k)).collect();
    }

    pub fn api_key_by_hash(&self, hash: &str) -> Option<&ApiKeyEntry> {
        self.api_keys.get(hash).filter(|e| e.is_active)
    }

    pub fn add_api_key(&mut self, entry: ApiKeyEntry) {
        self.api_keys.insert(entry.key_hash.clone(), entry);
    }

    pub fn revoke_api_key(&mut self, id: uuid::Uuid) -> CoreResult<()> {
        let hash = self
            .api_keys
            .values()
            .find(|e| e.id == id)
            .map(|e| e.key_hash.clone())
            .ok_or(CoreError::NotFound)?;
        self.api_keys.remove(&hash);
        Ok(())
    }

    /// Updates `last_used_at` by id rather than hash. Used by the
    /// controller's `api_key_used` callback, which only carries the id
    /// across the async boundary from the server thread — the server
    /// itself never touches this field directly.
    pub fn mark_api_key_used_by_id(&mut self, id: uuid::Uuid, at: chrono::DateTime<chrono::Utc>) {
        if let Some(entry) = self.api_keys.values_mut().find(|e| e.id == id) {
            entry.last_used_at = Some(at);
        }
    }

    pub fn all_api_keys(&self) -> Vec<&ApiKeyEntry> {
        self.api_keys.values().collect()
    }

    pub fn active_api_key_count(&self) -> usize {
        self.api_keys.values().filter(|k| k.is_active).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_idempotent_and_clears_state() {
        let mut state = VaultState::new();
        state.unlock([1u8; 32], Vec::new());
        assert!(state.is_unlocked());
        state.lock();
        assert!(!state.is_unlocked());
        state.lock();
        assert!(!state.is_unlocked());
    }

    #[test]
    fn put_rejects_case_insensitive_duplicate() {
        let mut state = VaultState::new();
        state.unlock([1u8; 32], Vec::new());
        state
            .put_secret(SecretEntry::new("DB".into(), "a".into(), None))
            .unwrap();
        let err = state
            .put_secret(SecretEntry::new("db".into(), "b".into(), None))
            .unwrap_err();
        assert!(matches!(err, CoreError::Duplicate));
    }

    #[test]
    fn operations_on_locked_state_fail() {
        let mut state = VaultState::new();
        assert!(matches!(state.get_secret("db"), Err(CoreError::Locked)));
        assert!(matches!(
            state.put_secret(SecretEntry::new("db".into(), "v".into(), None)),
            Err(CoreError::Locked)
        ));
    }

    #[test]
    fn get_is_case_insensitive() {
        let mut state = VaultState::new();
        state.unlock([1u8; 32], Vec::new());
        state
            .put_secret(SecretEntry::new("Database".into(), "v".into(), None))
            .unwrap();
        assert!(state.get_secret("DATABASE").unwrap().is_some());
    }
}
