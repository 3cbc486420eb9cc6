//! The authorization evaluator: a pure function from `(ApiKeyEntry, action,
//! target?)` to an allow/deny decision.
//!
//! `ReadOnly` is evaluated identically to `Restricted` (see the Open
//! design decision): there is a single match arm
//! covering both.

use crate::model::{AccessLevel, ApiKeyEntry, AuditAction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

pub fn authorize(entry: &ApiKeyEntry, action: AuditAction, target: Option<&str>) -> Decision {
    match action {
        AuditAction::Auth | AuditAction::Status => Decision::Allow,
        AuditAction::Unknown => Decision::Deny("unknown action".to_string()),
        _ => match entry.permissions.level {
            AccessLevel::Full => Decision::Allow,
            AccessLevel::Restricted | AccessLevel::ReadOnly => {
                evaluate_restricted(entry, action, target)
            }
        },
    }
}

fn evaluate_restricted(entry: &ApiKeyEntry, action: AuditAction, target: Option<&str>) -> Decision {
    match action {
        AuditAction::List => {
            if entry.permissions.can_list {
                Decision::Allow
            } else {
                Decision::Deny("cannot list secrets".to_string())
            }
        }
        AuditAction::Get | AuditAction::Exists => {
            let Some(target) = target else {
                return Decision::Deny("no target secret specified".to_string());
            };
            if secret_is_allowed(entry, target) {
                Decision::Allow
            } else {
                Decision::Deny(format!("not permitted to access secret '{target}'"))
            }
        }
        AuditAction::Auth | AuditAction::Status | AuditAction::Unknown => {
            unreachable!("handled by the caller")
        }
    }
}

fn secret_is_allowed(entry: &ApiKeyEntry, target: &str) -> bool {
    let target_lower = target.to_ascii_lowercase();

    if entry
        .permissions
        .allowed_secrets
        .iter()
        .any(|s| s.to_ascii_lowercase() == target_lower)
    {
        return true;
    }

    entry.permissions.allowed_prefixes.iter().any(|prefix| {
        let prefix = prefix.strip_suffix('*').unwrap_or(prefix);
        target_lower.starts_with(&prefix.to_ascii_lowercase())
    })
}

/// Only the subset of `keys` the caller may access, after an optional
/// case-insensitive substring filter.
pub fn filter_listable<'a>(
    entry: &ApiKeyEntry,
    keys: impl Iterator<Item = &'a str>,
    filter: Option<&str>,
) -> Vec<&'a str> {
    let filter_lower = filter.map(str::to_ascii_lowercase);
    keys.filter(|k| match filter_lower.as_deref() {
        Some(f) => k.to_ascii_lowercase().contains(f),
        None => true,
    })
    .filter(|k| entry.permissions.level == AccessLevel::Full || secret_is_allowed(entry, k))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ApiKeyPermissions;
    use chrono::Utc;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn entry_with(permissions: ApiKeyPermissions) -> ApiKeyEntry {
        ApiKeyEntry {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            key_hash: "x".repeat(64),
            description: None,
            created_at: Utc::now(),
            last_used_at: None,
            is_active: true,
            permissions,
        }
    }

    #[test]
    fn full_key_allows_every_action() {
        let entry = entry_with(ApiKeyPermissions::full());
        for action in [AuditAction::Get, AuditAction::Exists, AuditAction::List] {
            assert_eq!(authorize(&entry, action, Some("anything")), Decision::Allow);
        }
    }

    #[test]
    fn restricted_with_empty_allow_sets_denies_get_and_exists() {
        let entry = entry_with(ApiKeyPermissions {
            level: AccessLevel::Restricted,
            allowed_secrets: HashSet::new(),
            allowed_prefixes: HashSet::new(),
            can_list: true,
        });
        assert!(!authorize(&entry, AuditAction::Get, Some("db")).is_allowed());
        assert!(!authorize(&entry, AuditAction::Exists, Some("db")).is_allowed());
    }

    #[test]
    fn can_list_false_denies_list() {
        let entry = entry_with(ApiKeyPermissions {
            level: AccessLevel::Restricted,
            allowed_secrets: ["db".to_string()].into_iter().collect(),
            allowed_prefixes: HashSet::new(),
            can_list: false,
        });
        assert!(!authorize(&entry, AuditAction::List, None).is_allowed());
    }

    #[test]
    fn allowed_secrets_match_is_case_insensitive() {
        let entry = entry_with(ApiKeyPermissions {
            level: AccessLevel::Restricted,
            allowed_secrets: ["DB".to_string()].into_iter().collect(),
            allowed_prefixes: HashSet::new(),
            can_list: false,
        });
        assert!(authorize(&entry, AuditAction::Get, Some("db")).is_allowed());
    }

    #[test]
    fn allowed_prefix_matches_and_ignores_trailing_star() {
        let entry = entry_with(ApiKeyPermissions {
            level: AccessLevel::Restricted,
            allowed_secrets: HashSet::new(),
            allowed_prefixes: ["prod-*".to_string()].into_iter().collect(),
            can_list: false,
        });
        assert!(authorize(&entry, AuditAction::Get, Some("prod-db")).is_allowed());
        assert!(!authorize(&entry, AuditAction::Get, Some("staging-db")).is_allowed());
    }

    #[test]
    fn auth_and_status_always_allowed() {
        let entry = entry_with(ApiKeyPermissions {
            level: AccessLevel::Restricted,
            allowed_secrets: HashSet::new(),
            allowed_prefixes: HashSet::new(),
            can_list: false,
        });
        assert!(authorize(&entry, AuditAction::Auth, None).is_allowed());
        assert!(authorize(&entry, AuditAction::Status, None).is_allowed());
    }

    #[test]
    fn read_only_behaves_like_restricted() {
        let entry = entry_with(ApiKeyPermissions {
            level: AccessLevel::ReadOnly,
            allowed_secrets: ["db".to_string()].into_iter().collect(),
            allowed_prefixes: HashSet::new(),
            can_list: false,
        });
        assert!(authorize(&entry, AuditAction::Get, Some("db")).is_allowed());
        assert!(!authorize(&entry, AuditAction::Get, Some("other")).is_allowed());
        assert!(!authorize(&entry, AuditAction::List, None).is_allowed());
    }

    #[test]
    fn filter_listable_applies_substring_filter_and_permission_set() {
        let entry = entry_with(ApiKeyPermissions {
            level: AccessLevel::Restricted,
            allowed_secrets: ["db-prod".to_string(), "db-staging".to_string(), "cache".to_string()]
                .into_iter()
                .collect(),
            allowed_prefixes: HashSet::new(),
            can_list: true,
        });
        let keys = vec!["db-prod", "db-staging", "cache", "other"];
        let visible = filter_listable(&entry, keys.into_iter(), Some("db"));
        assert_eq!(visible.len(), 2);
        assert!(visible.contains(&"db-prod"));
        assert!(visible.contains(&"db-staging"));
    }
}
