//! Core data model: secrets, API keys and their permissions, vault metadata,
//! and audit log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;
use zeroize::Zeroize;

/// A single named secret value stored in the vault.
///
/// `key` is unique within the vault under case-insensitive comparison;
/// uniqueness is enforced by the in-memory state (`state::VaultState`), not
/// by this type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretEntry {
    pub id: Uuid,
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl SecretEntry {
    pub fn new(key: String, value: String, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            value,
            description,
            created_at: Utc::now(),
            modified_at: None,
        }
    }

    pub fn touch(&mut self) {
        self.modified_at = Some(Utc::now());
    }
}

impl Zeroize for SecretEntry {
    fn zeroize(&mut self) {
        self.key.zeroize();
        self.value.zeroize();
        if let Some(d) = self.description.as_mut() {
            d.zeroize();
        }
    }
}

impl Drop for SecretEntry {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// The access level carried by an API key.
///
/// `ReadOnly` is a legacy variant that was never enforced distinctly from
/// `Restricted` anywhere, so it is kept in the data model (it round-trips
/// through JSON and backups) but is evaluated identically to `Restricted`
/// by `authz::authorize`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AccessLevel {
    Full,
    Restricted,
    ReadOnly,
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AccessLevel::Full => "Full",
            AccessLevel::Restricted => "Restricted",
            AccessLevel::ReadOnly => "ReadOnly",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Full" => Ok(AccessLevel::Full),
            "Restricted" => Ok(AccessLevel::Restricted),
            "ReadOnly" => Ok(AccessLevel::ReadOnly),
            other => Err(format!("unknown access level: {other}")),
        }
    }
}

/// The permission set attached to an API key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiKeyPermissions {
    pub level: AccessLevel,
    #[serde(default)]
    pub allowed_secrets: HashSet<String>,
    #[serde(default)]
    pub allowed_prefixes: HashSet<String>,
    #[serde(default)]
    pub can_list: bool,
}

impl ApiKeyPermissions {
    pub fn full() -> Self {
        Self {
            level: AccessLevel::Full,
            allowed_secrets: HashSet::new(),
            allowed_prefixes: HashSet::new(),
            can_list: true,
        }
    }

    /// `Restricted`/`ReadOnly` permission sets must be non-empty with respect
    /// to `allowed_secrets ∪ allowed_prefixes`.
    pub fn is_valid(&self) -> bool {
        match self.level {
            AccessLevel::Full => true,
            AccessLevel::Restricted | AccessLevel::ReadOnly => {
                !self.allowed_secrets.is_empty() || !self.allowed_prefixes.is_empty()
            }
        }
    }
}

/// An authorized IPC caller. The plaintext API key is never stored; only its
/// SHA-256 hash is kept (see `crate::apikey`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub id: Uuid,
    pub name: String,
    pub key_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub permissions: ApiKeyPermissions,
}

/// Immutable once written: the vault's salt, container version, and creation
/// timestamp.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VaultMetadata {
    pub salt: [u8; crate::crypto::SALT_LEN],
    pub version: u32,
    pub created_at: DateTime<Utc>,
}

/// One of the six actions an IPC request can perform, used both for
/// authorization decisions and for the audit trail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "EXISTS")]
    Exists,
    #[serde(rename = "LIST")]
    List,
    #[serde(rename = "AUTH")]
    Auth,
    #[serde(rename = "STATUS")]
    Status,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::Get => "GET",
            AuditAction::Exists => "EXISTS",
            AuditAction::List => "LIST",
            AuditAction::Auth => "AUTH",
            AuditAction::Status => "STATUS",
            AuditAction::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// `api_key_name = "Anonymous"` and `api_key_id = "N/A"` represent the
/// no-auth mode (server running with `require_auth = false`).
pub const ANONYMOUS_NAME: &str = "Anonymous";
pub const ANONYMOUS_ID: &str = "N/A";
/// Recorded when a caller presents a key that does not hash-match any active
/// entry.
pub const INVALID_KEY_NAME: &str = "Invalid";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub api_key_name: String,
    pub api_key_id: String,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AuditLogEntry {
    pub fn new(
        api_key_name: impl Into<String>,
        api_key_id: impl Into<String>,
        action: AuditAction,
        secret_key: Option<String>,
        success: bool,
        error_message: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            api_key_name: api_key_name.into(),
            api_key_id: api_key_id.into(),
            action,
            secret_key,
            success,
            error_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restricted_permissions_require_allow_list() {
        let p = ApiKeyPermissions {
            level: AccessLevel::Restricted,
            allowed_secrets: HashSet::new(),
            allowed_prefixes: HashSet::new(),
            can_list: false,
        };
        assert!(!p.is_valid());
    }

    #[test]
    fn full_permissions_are_always_valid() {
        assert!(ApiKeyPermissions::full().is_valid());
    }

    #[test]
    fn access_level_round_trips_through_display_and_from_str() {
        for level in [AccessLevel::Full, AccessLevel::Restricted, AccessLevel::ReadOnly] {
            let s = level.to_string();
            let parsed: AccessLevel = s.parse().unwrap();
            assert_eq!(parsed, level);
        }
    }
}
