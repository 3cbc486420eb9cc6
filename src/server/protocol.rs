//! The line-delimited IPC request/response grammar.
//!
//! Parsing is split out from dispatch so the grammar itself — which fields
//! are present depends on whether the server is in `require_auth` mode — can
//! be unit tested without a running socket.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Auth {
        api_key: String,
    },
    Get {
        api_key: Option<String>,
        secret_key: String,
    },
    Exists {
        api_key: Option<String>,
        secret_key: String,
    },
    /// Covers both `LIST` and `KEYS` (retained as aliases for client compatibility).
    List {
        api_key: Option<String>,
        filter: Option<String>,
    },
    Unknown,
}

/// Parses one request line. `require_auth` governs whether an `<api_key>`
/// field is expected ahead of the command's own arguments — the grammar
/// itself is ambiguous without knowing the server's current mode.
pub fn parse(line: &str, require_auth: bool) -> Command {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('|').map(str::trim).collect();
    let Some(name) = fields.first() else {
        return Command::Unknown;
    };

    match name.to_ascii_uppercase().as_str() {
        "STATUS" => Command::Status,
        "AUTH" => match fields.get(1) {
            Some(key) if !key.is_empty() => Command::Auth { api_key: key.to_string() },
            _ => Command::Unknown,
        },
        "GET" => parse_targeted(&fields, require_auth, false),
        "EXISTS" => parse_targeted(&fields, require_auth, true),
        "LIST" | "KEYS" => parse_list(&fields, require_auth),
        _ => Command::Unknown,
    }
}

fn parse_targeted(fields: &[&str], require_auth: bool, exists: bool) -> Command {
    let (api_key, secret_key) = if require_auth {
        match (fields.get(1), fields.get(2)) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                (Some(key.to_string()), secret.to_string())
            }
            _ => return Command::Unknown,
        }
    } else {
        match fields.get(1) {
            Some(secret) if !secret.is_empty() => (None, secret.to_string()),
            _ => return Command::Unknown,
        }
    };

    if exists {
        Command::Exists { api_key, secret_key }
    } else {
        Command::Get { api_key, secret_key }
    }
}

fn parse_list(fields: &[&str], require_auth: bool) -> Command {
    let non_empty = |s: &&str| !s.is_empty();
    if require_auth {
        match fields.get(1).filter(non_empty) {
            Some(key) => Command::List {
                api_key: Some(key.to_string()),
                filter: fields.get(2).filter(non_empty).map(|s| s.to_string()),
            },
            None => Command::Unknown,
        }
    } else {
        Command::List {
            api_key: None,
            filter: fields.get(1).filter(non_empty).map(|s| s.to_string()),
        }
    }
}

pub fn status_response(unlocked: bool, api_key_count: usize, require_auth: bool) -> String {
    let state = if unlocked { "UNLOCKED" } else { "LOCKED" };
    let auth_mode = if require_auth { "AUTH_REQUIRED" } else { "NO_AUTH" };
    format!("OK|{state}|{api_key_count}|{auth_mode}")
}

pub const AUTHENTICATED: &str = "OK|AUTHENTICATED";
pub const NOTFOUND: &str = "NOTFOUND";
pub const TRUE: &str = "TRUE";
pub const FALSE: &str = "FALSE";
pub const INVALID_AUTH_COMMAND: &str = "ERROR|Invalid API Key";
pub const INVALID_AUTH_GATE: &str = "ERROR|Invalid or expired API Key";
pub const LIST_DENIED: &str = "ERROR|Access denied - cannot list secrets";
pub const GET_DENIED: &str = "ERROR|Access denied to this secret";
pub const UNKNOWN_COMMAND: &str = "ERROR|Unknown command";

pub fn get_hit(value: &str, description: &str) -> String {
    format!("OK|{value}|{description}")
}

pub fn list_ok(keys: &[&str]) -> String {
    format!("OK|{}", keys.join(","))
}

pub fn error(reason: impl std::fmt::Display) -> String {
    format!("ERROR|{reason}")
}
