//! Statistics computed over the in-memory audit ring buffer:
//! totals, pass/fail counts, unique callers/secrets, per-action and
//! per-caller request counts, and the top-10 most-accessed secrets.

use crate::model::{AuditAction, AuditLogEntry};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Default)]
pub struct AuditStatistics {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub unique_api_key_names: usize,
    pub unique_secret_keys: usize,
    pub requests_by_action: HashMap<String, usize>,
    pub requests_by_api_key_name: HashMap<String, usize>,
    pub top_secrets: Vec<(String, usize)>,
}

impl AuditStatistics {
    pub fn compute<'a>(entries: impl Iterator<Item = &'a AuditLogEntry>) -> Self {
        let mut stats = AuditStatistics::default();
        let mut api_key_names = HashSet::new();
        let mut secret_keys = HashSet::new();
        let mut secret_access_counts: HashMap<String, usize> = HashMap::new();

        for entry in entries {
            stats.total += 1;
            if entry.success {
                stats.successes += 1;
            } else {
                stats.failures += 1;
            }

            api_key_names.insert(entry.api_key_name.clone());
            *stats
                .requests_by_action
                .entry(entry.action.to_string())
                .or_insert(0) += 1;
            *stats
                .requests_by_api_key_name
                .entry(entry.api_key_name.clone())
                .or_insert(0) += 1;

            if let Some(secret_key) = &entry.secret_key {
                secret_keys.insert(secret_key.clone());
                if matches!(entry.action, AuditAction::Get | AuditAction::Exists) {
                    *secret_access_counts.entry(secret_key.clone()).or_insert(0) += 1;
                }
            }
        }

        stats.unique_api_key_names = api_key_names.len();
        stats.unique_secret_keys = secret_keys.len();

        let mut top: Vec<(String, usize)> = secret_access_counts.into_iter().collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(10);
        stats.top_secrets = top;

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuditLogEntry;

    fn entry(action: AuditAction, name: &str, secret: Option<&str>, success: bool) -> AuditLogEntry {
        AuditLogEntry::new(
            name,
            "id",
            action,
            secret.map(String::from),
            success,
            None,
        )
    }

    #[test]
    fn totals_and_pass_fail_counts() {
        let entries = vec![
            entry(AuditAction::Get, "a", Some("db"), true),
            entry(AuditAction::Get, "b", Some("db"), false),
        ];
        let stats = AuditStatistics::compute(entries.iter());
        assert_eq!(stats.total, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.unique_api_key_names, 2);
        assert_eq!(stats.unique_secret_keys, 1);
    }

    #[test]
    fn top_secrets_sorted_by_access_count_descending() {
        let entries = vec![
            entry(AuditAction::Get, "a", Some("db"), true),
            entry(AuditAction::Get, "a", Some("db"), true),
            entry(AuditAction::Exists, "a", Some("cache"), true),
        ];
        let stats = AuditStatistics::compute(entries.iter());
        assert_eq!(stats.top_secrets[0], ("db".to_string(), 2));
        assert_eq!(stats.top_secrets[1], ("cache".to_string(), 1));
    }
}
