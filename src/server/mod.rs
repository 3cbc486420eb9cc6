//! The IPC request server: a loopback TCP listener that
//! parses one line-delimited request per connection, authenticates,
//! authorizes, dispatches against the in-memory vault state, audits, and
//! writes one response line.
//!
//! Generalizes an HTTP server loop (bind `127.0.0.1`,
//! `thread::spawn` an accept loop) from `tiny_http`'s HTTP request shape to
//! a plain pipe-delimited text protocol — no crate in the retrieval
//! pack offers a named-pipe/Unix-socket abstraction, so a loopback TCP
//! socket is the portable stand-in for `arca-vault-simple`.

pub mod protocol;

use crate::audit::AuditLog;
use crate::authz::{self, Decision};
use crate::model::{
    ApiKeyEntry, ApiKeyPermissions, AuditAction, AuditLogEntry, ANONYMOUS_ID, ANONYMOUS_NAME,
    INVALID_KEY_NAME,
};
use crate::state::VaultState;
use crate::apikey;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_WORKER_POOL_SIZE: usize = 16;

/// Bounds the number of connections handled concurrently, matching
/// a small fixed worker pool.
struct WorkerPool {
    max: usize,
    in_use: Mutex<usize>,
    available: Condvar,
}

impl WorkerPool {
    fn new(max: usize) -> Self {
        Self { max, in_use: Mutex::new(0), available: Condvar::new() }
    }

    fn acquire(&self) {
        let mut in_use = self.in_use.lock().expect("worker pool mutex poisoned");
        while *in_use >= self.max {
            in_use = self.available.wait(in_use).expect("worker pool mutex poisoned");
        }
        *in_use += 1;
    }

    fn release(&self) {
        let mut in_use = self.in_use.lock().expect("worker pool mutex poisoned");
        *in_use -= 1;
        self.available.notify_one();
    }
}

struct ServerContext {
    state: Arc<Mutex<VaultState>>,
    audit: AuditLog,
    on_api_key_used: Arc<dyn Fn(Uuid) + Send + Sync>,
}

/// A running server instance. `stop` signals the accept loop, unblocks it
/// with a self-connection, and waits up to two seconds for in-flight
/// handlers to finish.
pub struct RunningServer {
    local_addr: std::net::SocketAddr,
    stop_flag: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    active_handlers: Arc<AtomicUsize>,
}

impl RunningServer {
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub fn stop(mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        // Unblock a pending `accept()`; the connection itself is dropped
        // unused by the accept loop once it observes the stop flag.
        let _ = TcpStream::connect(self.local_addr);

        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }

        let deadline = Instant::now() + STOP_DRAIN_TIMEOUT;
        while self.active_handlers.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
    }
}

/// Binds a loopback listener on `port` and starts the accept loop on a
/// dedicated thread. `on_api_key_used` is invoked (off the handler thread)
/// with the id of every API key that successfully authenticated.
pub fn start(
    state: Arc<Mutex<VaultState>>,
    audit: AuditLog,
    port: u16,
    on_api_key_used: impl Fn(Uuid) + Send + Sync + 'static,
) -> std::io::Result<RunningServer> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    let local_addr = listener.local_addr()?;

    let ctx = Arc::new(ServerContext { state, audit, on_api_key_used: Arc::new(on_api_key_used) });
    let stop_flag = Arc::new(AtomicBool::new(false));
    let active_handlers = Arc::new(AtomicUsize::new(0));
    let pool = Arc::new(WorkerPool::new(DEFAULT_WORKER_POOL_SIZE));

    let thread_stop = stop_flag.clone();
    let thread_active = active_handlers.clone();
    let accept_thread = thread::spawn(move || run_accept_loop(listener, ctx, thread_stop, pool, thread_active));

    Ok(RunningServer { local_addr, stop_flag, accept_thread: Some(accept_thread), active_handlers })
}

fn run_accept_loop(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    stop: Arc<AtomicBool>,
    pool: Arc<WorkerPool>,
    active: Arc<AtomicUsize>,
) {
    for incoming in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            return;
        }

        let stream = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "ipc accept error, backing off");
                thread::sleep(ACCEPT_ERROR_BACKOFF);
                continue;
            }
        };

        pool.acquire();
        active.fetch_add(1, Ordering::SeqCst);
        let ctx = ctx.clone();
        let pool = pool.clone();
        let active = active.clone();
        thread::spawn(move || {
            handle_connection(stream, &ctx);
            active.fetch_sub(1, Ordering::SeqCst);
            pool.release();
        });
    }
}

fn handle_connection(stream: TcpStream, ctx: &ServerContext) {
    let peer_write = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(error = %e, "ipc connection: failed to clone stream");
            return;
        }
    };
    let mut writer = peer_write;
    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => return, // peer closed without sending anything (e.g. our own unblock probe)
        Ok(_) => {}
        Err(e) => {
            tracing::debug!(error = %e, "ipc connection: read error");
            return;
        }
    }

    let response = dispatch(ctx, &line);
    let _ = writer.write_all(response.as_bytes());
    let _ = writer.write_all(b"\n");
    let _ = writer.flush();
}

fn anonymous_entry() -> ApiKeyEntry {
    ApiKeyEntry {
        id: Uuid::nil(),
        name: ANONYMOUS_NAME.to_string(),
        key_hash: String::new(),
        description: None,
        created_at: chrono::Utc::now(),
        last_used_at: None,
        is_active: true,
        permissions: ApiKeyPermissions::full(),
    }
}

/// Resolves the caller for a non-exempt command: `Ok(entry)` on success,
/// `Err(response)` with the wire-level denial already formatted otherwise.
fn resolve_caller(
    state: &VaultState,
    require_auth: bool,
    api_key: Option<&str>,
) -> Result<ApiKeyEntry, String> {
    if !require_auth {
        return Ok(anonymous_entry());
    }
    let Some(presented) = api_key else {
        return Err(protocol::INVALID_AUTH_GATE.to_string());
    };
    let hash = apikey::hash_key(presented);
    match state.api_key_by_hash(&hash) {
        Some(entry) => Ok(entry.clone()),
        None => Err(protocol::INVALID_AUTH_GATE.to_string()),
    }
}

fn dispatch(ctx: &ServerContext, line: &str) -> String {
    let mut state = ctx.state.lock().expect("vault state mutex poisoned");
    let require_auth = state.active_api_key_count() > 0;
    let command = protocol::parse(line, require_auth);

    match command {
        protocol::Command::Status => {
            let response = protocol::status_response(state.is_unlocked(), state.active_api_key_count(), require_auth);
            ctx.audit.record(AuditLogEntry::new(ANONYMOUS_NAME, ANONYMOUS_ID, AuditAction::Status, None, true, None));
            response
        }

        protocol::Command::Auth { api_key } => {
            let hash = apikey::hash_key(&api_key);
            match state.api_key_by_hash(&hash).cloned() {
                Some(entry) => {
                    notify_used(ctx, entry.id);
                    ctx.audit.record(AuditLogEntry::new(
                        entry.name.clone(),
                        entry.id.to_string(),
                        AuditAction::Auth,
                        None,
                        true,
                        None,
                    ));
                    protocol::AUTHENTICATED.to_string()
                }
                None => {
                    ctx.audit.record(AuditLogEntry::new(
                        INVALID_KEY_NAME,
                        ANONYMOUS_ID,
                        AuditAction::Auth,
                        None,
                        false,
                        Some("invalid api key".to_string()),
                    ));
                    protocol::INVALID_AUTH_COMMAND.to_string()
                }
            }
        }

        protocol::Command::Get { api_key, secret_key } => {
            let entry = match resolve_caller(&state, require_auth, api_key.as_deref()) {
                Ok(entry) => entry,
                Err(response) => {
                    audit_gate_failure(ctx, AuditAction::Get, Some(&secret_key));
                    return response;
                }
            };
            mark_authenticated(ctx, &mut state, require_auth, &entry);

            match authz::authorize(&entry, AuditAction::Get, Some(&secret_key)) {
                Decision::Allow => match state.get_secret(&secret_key) {
                    Ok(Some(found)) => {
                        ctx.audit.record(AuditLogEntry::new(
                            entry.name.clone(),
                            entry.id.to_string(),
                            AuditAction::Get,
                            Some(secret_key.clone()),
                            true,
                            None,
                        ));
                        protocol::get_hit(&found.value, found.description.as_deref().unwrap_or(""))
                    }
                    Ok(None) => {
                        ctx.audit.record(AuditLogEntry::new(
                            entry.name.clone(),
                            entry.id.to_string(),
                            AuditAction::Get,
                            Some(secret_key.clone()),
                            true,
                            None,
                        ));
                        protocol::NOTFOUND.to_string()
                    }
                    Err(e) => {
                        ctx.audit.record(AuditLogEntry::new(
                            entry.name.clone(),
                            entry.id.to_string(),
                            AuditAction::Get,
                            Some(secret_key.clone()),
                            false,
                            Some(e.to_string()),
                        ));
                        protocol::error(e)
                    }
                },
                Decision::Deny(reason) => {
                    ctx.audit.record(AuditLogEntry::new(
                        entry.name.clone(),
                        entry.id.to_string(),
                        AuditAction::Get,
                        Some(secret_key.clone()),
                        false,
                        Some(reason),
                    ));
                    protocol::GET_DENIED.to_string()
                }
            }
        }

        protocol::Command::Exists { api_key, secret_key } => {
            let entry = match resolve_caller(&state, require_auth, api_key.as_deref()) {
                Ok(entry) => entry,
                Err(response) => {
                    audit_gate_failure(ctx, AuditAction::Exists, Some(&secret_key));
                    return response;
                }
            };
            mark_authenticated(ctx, &mut state, require_auth, &entry);

            match authz::authorize(&entry, AuditAction::Exists, Some(&secret_key)) {
                Decision::Allow => {
                    let exists = matches!(state.get_secret(&secret_key), Ok(Some(_)));
                    ctx.audit.record(AuditLogEntry::new(
                        entry.name.clone(),
                        entry.id.to_string(),
                        AuditAction::Exists,
                        Some(secret_key.clone()),
                        true,
                        None,
                    ));
                    if exists { protocol::TRUE.to_string() } else { protocol::FALSE.to_string() }
                }
                Decision::Deny(reason) => {
                    ctx.audit.record(AuditLogEntry::new(
                        entry.name.clone(),
                        entry.id.to_string(),
                        AuditAction::Exists,
                        Some(secret_key.clone()),
                        false,
                        Some(reason),
                    ));
                    // Denial is indistinguishable from a genuine absence on the wire.
                    protocol::FALSE.to_string()
                }
            }
        }

        protocol::Command::List { api_key, filter } => {
            let entry = match resolve_caller(&state, require_auth, api_key.as_deref()) {
                Ok(entry) => entry,
                Err(response) => {
                    audit_gate_failure(ctx, AuditAction::List, None);
                    return response;
                }
            };
            mark_authenticated(ctx, &mut state, require_auth, &entry);

            match authz::authorize(&entry, AuditAction::List, None) {
                Decision::Allow => match state.list_keys(None) {
                    Ok(all_keys) => {
                        let visible = authz::filter_listable(
                            &entry,
                            all_keys.iter().map(String::as_str),
                            filter.as_deref(),
                        );
                        ctx.audit.record(AuditLogEntry::new(
                            entry.name.clone(),
                            entry.id.to_string(),
                            AuditAction::List,
                            None,
                            true,
                            None,
                        ));
                        protocol::list_ok(&visible)
                    }
                    Err(e) => {
                        ctx.audit.record(AuditLogEntry::new(
                            entry.name.clone(),
                            entry.id.to_string(),
                            AuditAction::List,
                            None,
                            false,
                            Some(e.to_string()),
                        ));
                        protocol::error(e)
                    }
                },
                Decision::Deny(reason) => {
                    ctx.audit.record(AuditLogEntry::new(
                        entry.name.clone(),
                        entry.id.to_string(),
                        AuditAction::List,
                        None,
                        false,
                        Some(reason),
                    ));
                    protocol::LIST_DENIED.to_string()
                }
            }
        }

        protocol::Command::Unknown => {
            ctx.audit.record(AuditLogEntry::new(
                ANONYMOUS_NAME,
                ANONYMOUS_ID,
                AuditAction::Unknown,
                None,
                false,
                Some("unparseable request".to_string()),
            ));
            protocol::UNKNOWN_COMMAND.to_string()
        }
    }
}

/// Does *not* touch `VaultState` directly: `last_used_at` is the
/// controller's to update, so the server thread only fires the
/// `api_key_used` callback and lets the controller apply the mutation.
fn mark_authenticated(ctx: &ServerContext, _state: &mut VaultState, require_auth: bool, entry: &ApiKeyEntry) {
    if !require_auth {
        return;
    }
    notify_used(ctx, entry.id);
}

fn notify_used(ctx: &ServerContext, id: Uuid) {
    let callback = ctx.on_api_key_used.clone();
    thread::spawn(move || callback(id));
}

fn audit_gate_failure(ctx: &ServerContext, action: AuditAction, secret_key: Option<&str>) {
    ctx.audit.record(AuditLogEntry::new(
        INVALID_KEY_NAME,
        ANONYMOUS_ID,
        action,
        secret_key.map(str::to_string),
        false,
        Some("invalid or expired api key".to_string()),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apikey;
    use crate::model::{AccessLevel, ApiKeyPermissions, SecretEntry};
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpStream;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn roundtrip(server_addr: std::net::SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(server_addr).unwrap();
        stream.write_all(request.as_bytes()).unwrap();
        stream.write_all(b"\n").unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        line.trim_end().to_string()
    }

    fn start_test_server() -> (RunningServer, Arc<Mutex<VaultState>>, crate::audit::AuditLogHandle) {
        let mut state = VaultState::new();
        state.unlock([7u8; 32], vec![SecretEntry::new("db".to_string(), "s3cret".to_string(), Some("prod DB".to_string()))]);
        let state = Arc::new(Mutex::new(state));

        let dir = tempdir().unwrap();
        let audit_handle = crate::audit::start(dir.path().to_path_buf(), 100).unwrap();

        let server = start(state.clone(), audit_handle.log.clone(), 0, |_id| {}).unwrap();
        (server, state, audit_handle)
    }

    #[test]
    fn status_reports_unlocked_and_no_auth_with_zero_keys() {
        let (server, _state, audit) = start_test_server();
        let addr = server.local_addr();
        let response = roundtrip(addr, "STATUS");
        assert_eq!(response, "OK|UNLOCKED|0|NO_AUTH");
        server.stop();
        audit.shutdown();
    }

    #[test]
    fn anonymous_get_succeeds_without_auth() {
        let (server, _state, audit) = start_test_server();
        let addr = server.local_addr();
        let response = roundtrip(addr, "GET|db");
        assert_eq!(response, "OK|s3cret|prod DB");
        server.stop();
        audit.shutdown();
    }

    #[test]
    fn get_miss_yields_notfound() {
        let (server, _state, audit) = start_test_server();
        let addr = server.local_addr();
        let response = roundtrip(addr, "GET|missing");
        assert_eq!(response, "NOTFOUND");
        server.stop();
        audit.shutdown();
    }

    #[test]
    fn unknown_command_yields_error_without_disconnect() {
        let (server, _state, audit) = start_test_server();
        let addr = server.local_addr();
        let response = roundtrip(addr, "BOGUS");
        assert_eq!(response, "ERROR|Unknown command");
        server.stop();
        audit.shutdown();
    }

    #[test]
    fn restricted_key_scenario_matches_spec_end_to_end() {
        let (server, state, audit) = start_test_server();
        let addr = server.local_addr();

        let (plaintext, hash) = apikey::generate();
        {
            let mut s = state.lock().unwrap();
            s.add_api_key(ApiKeyEntry {
                id: Uuid::new_v4(),
                name: "ci".to_string(),
                key_hash: hash,
                description: None,
                created_at: chrono::Utc::now(),
                last_used_at: None,
                is_active: true,
                permissions: ApiKeyPermissions {
                    level: AccessLevel::Restricted,
                    allowed_secrets: ["db".to_string()].into_iter().collect(),
                    allowed_prefixes: Default::default(),
                    can_list: false,
                },
            });
        }

        assert_eq!(roundtrip(addr, "STATUS"), "OK|UNLOCKED|1|AUTH_REQUIRED");
        assert_eq!(roundtrip(addr, &format!("GET|{plaintext}|db")), "OK|s3cret|prod DB");
        assert_eq!(roundtrip(addr, &format!("GET|{plaintext}|other")), "ERROR|Access denied to this secret");
        assert_eq!(roundtrip(addr, &format!("EXISTS|{plaintext}|other")), "FALSE");
        assert_eq!(roundtrip(addr, &format!("LIST|{plaintext}")), "ERROR|Access denied - cannot list secrets");

        server.stop();
        audit.shutdown();
    }

    #[test]
    fn revoked_key_is_rejected() {
        let (server, state, audit) = start_test_server();
        let addr = server.local_addr();

        let (plaintext, hash) = apikey::generate();
        let id = Uuid::new_v4();
        {
            let mut s = state.lock().unwrap();
            s.add_api_key(ApiKeyEntry {
                id,
                name: "ci".to_string(),
                key_hash: hash,
                description: None,
                created_at: chrono::Utc::now(),
                last_used_at: None,
                is_active: true,
                permissions: ApiKeyPermissions::full(),
            });
        }
        {
            let mut s = state.lock().unwrap();
            s.revoke_api_key(id).unwrap();
        }

        assert_eq!(roundtrip(addr, &format!("AUTH|{plaintext}")), "ERROR|Invalid API Key");
        server.stop();
        audit.shutdown();
    }

    #[test]
    fn stop_returns_promptly_with_no_pending_connections() {
        let (server, _state, audit) = start_test_server();
        let started = Instant::now();
        server.stop();
        assert!(started.elapsed() < STOP_DRAIN_TIMEOUT + Duration::from_secs(1));
        audit.shutdown();
    }
}
