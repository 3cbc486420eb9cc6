//! The audit pipeline: a concurrent-safe, batched,
//! append-only record of every IPC request outcome.
//!
//! Layout: an in-memory ring buffer of the most recent `capacity` entries
//! (used for UI queries and statistics) fed by a multi-producer queue that a
//! background thread drains every `flush_interval` into a per-day
//! `audit-YYYY-MM-DD.json` file, one JSON object per line.

pub mod statistics;

pub use statistics::AuditStatistics;

use crate::model::AuditLogEntry;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

struct Inner {
    recent: Mutex<VecDeque<AuditLogEntry>>,
    capacity: usize,
    dir: PathBuf,
    sender: Sender<AuditLogEntry>,
}

/// Handle to the running audit pipeline. Cloning is cheap (shares the
/// underlying `Arc`); every clone can enqueue entries and query recent
/// history/statistics.
#[derive(Clone)]
pub struct AuditLog {
    inner: Arc<Inner>,
    stop: Arc<AtomicBool>,
}

pub struct AuditLogHandle {
    pub log: AuditLog,
    flusher: Option<JoinHandle<()>>,
}

impl AuditLogHandle {
    /// Flushes any pending entries synchronously and joins the flusher
    /// thread. Individual `FileIoError`s on the final flush are logged and
    /// dropped — the file system is the only durable sink
    /// and a write failure here must not block shutdown.
    pub fn shutdown(mut self) {
        self.log.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.flusher.take() {
            let _ = handle.join();
        }
    }
}

/// Starts the audit pipeline rooted at `dir`, reloading the tail of today's
/// file (up to `capacity` lines) so a process restart doesn't lose the
/// visible window.
pub fn start(dir: PathBuf, capacity: usize) -> std::io::Result<AuditLogHandle> {
    std::fs::create_dir_all(&dir)?;

    let recent = reload_today_tail(&dir, capacity).unwrap_or_default();
    let (sender, receiver): (Sender<AuditLogEntry>, Receiver<AuditLogEntry>) = mpsc::channel();

    let inner = Arc::new(Inner {
        recent: Mutex::new(recent),
        capacity,
        dir,
        sender,
    });
    let stop = Arc::new(AtomicBool::new(false));

    let flusher_inner = inner.clone();
    let flusher_stop = stop.clone();
    let flusher = std::thread::spawn(move || run_flusher(flusher_inner, receiver, flusher_stop));

    Ok(AuditLogHandle {
        log: AuditLog { inner, stop },
        flusher: Some(flusher),
    })
}

fn today_file_path(dir: &Path) -> PathBuf {
    let today = chrono::Utc::now().format("%Y-%m-%d");
    dir.join(format!("audit-{today}.json"))
}

fn reload_today_tail(dir: &Path, capacity: usize) -> std::io::Result<VecDeque<AuditLogEntry>> {
    let path = today_file_path(dir);
    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(VecDeque::new()),
        Err(e) => return Err(e),
    };

    let mut all_lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<AuditLogEntry>(&line) {
            all_lines.push(entry);
        }
    }

    let start = all_lines.len().saturating_sub(capacity);
    Ok(all_lines.split_off(start).into())
}

fn run_flusher(inner: Arc<Inner>, receiver: Receiver<AuditLogEntry>, stop: Arc<AtomicBool>) {
    loop {
        let deadline = std::time::Instant::now() + FLUSH_INTERVAL;
        let mut batch = Vec::new();
        while let Ok(elapsed) = deadline
            .checked_duration_since(std::time::Instant::now())
            .ok_or(())
        {
            match receiver.recv_timeout(elapsed) {
                Ok(entry) => batch.push(entry),
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        // Drain anything queued without blocking, in case a burst arrived
        // right at the deadline.
        while let Ok(entry) = receiver.try_recv() {
            batch.push(entry);
        }

        if !batch.is_empty() {
            if let Err(e) = append_batch(&inner.dir, &batch) {
                tracing::debug!(error = %e, "audit flush: failed to append batch, entries dropped");
            }
        }

        if stop.load(Ordering::SeqCst) {
            // Final synchronous drain before exiting.
            let mut tail = Vec::new();
            while let Ok(entry) = receiver.try_recv() {
                tail.push(entry);
            }
            if !tail.is_empty() {
                if let Err(e) = append_batch(&inner.dir, &tail) {
                    tracing::debug!(error = %e, "audit shutdown flush: entries dropped");
                }
            }
            return;
        }
    }
}

fn append_batch(dir: &Path, batch: &[AuditLogEntry]) -> std::io::Result<()> {
    let path = today_file_path(dir);
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for entry in batch {
        let line = serde_json::to_string(entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(file, "{line}")?;
    }
    Ok(())
}

impl AuditLog {
    /// Enqueues `entry` for durable persistence and immediately appends it
    /// to the in-memory ring buffer (evicting the oldest entry once
    /// `capacity` is exceeded).
    pub fn record(&self, entry: AuditLogEntry) {
        {
            let mut recent = self.inner.recent.lock().expect("audit ring buffer mutex poisoned");
            recent.push_back(entry.clone());
            while recent.len() > self.inner.capacity {
                recent.pop_front();
            }
        }
        // A full receiver-side disconnect only happens if the flusher
        // thread panicked; dropping the entry here is acceptable since the
        // in-memory ring buffer above already has it for UI queries.
        let _ = self.inner.sender.send(entry);
    }

    pub fn recent(&self, n: usize) -> Vec<AuditLogEntry> {
        let recent = self.inner.recent.lock().expect("audit ring buffer mutex poisoned");
        recent.iter().rev().take(n).cloned().collect()
    }

    pub fn statistics(&self) -> AuditStatistics {
        let recent = self.inner.recent.lock().expect("audit ring buffer mutex poisoned");
        AuditStatistics::compute(recent.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuditAction;
    use tempfile::tempdir;

    fn entry(action: AuditAction, success: bool) -> AuditLogEntry {
        AuditLogEntry::new("Anonymous", "N/A", action, None, success, None)
    }

    #[test]
    fn record_appends_to_ring_buffer() {
        let dir = tempdir().unwrap();
        let handle = start(dir.path().to_path_buf(), 1000).unwrap();
        handle.log.record(entry(AuditAction::Status, true));
        handle.log.record(entry(AuditAction::Auth, false));

        let recent = handle.log.recent(10);
        assert_eq!(recent.len(), 2);
        // Most-recent first.
        assert_eq!(recent[0].action, AuditAction::Auth);
        handle.shutdown();
    }

    #[test]
    fn ring_buffer_respects_capacity() {
        let dir = tempdir().unwrap();
        let handle = start(dir.path().to_path_buf(), 3).unwrap();
        for _ in 0..5 {
            handle.log.record(entry(AuditAction::Get, true));
        }
        assert_eq!(handle.log.recent(100).len(), 3);
        handle.shutdown();
    }

    #[test]
    fn shutdown_flushes_pending_entries_to_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let handle = start(path.clone(), 1000).unwrap();
        handle.log.record(entry(AuditAction::Get, true));
        handle.shutdown();

        let file_path = today_file_path(&path);
        let contents = std::fs::read_to_string(file_path).unwrap();
        assert!(contents.contains("\"action\":\"GET\""));
    }

    #[test]
    fn restart_reloads_todays_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().to_path_buf();
        {
            let handle = start(path.clone(), 1000).unwrap();
            handle.log.record(entry(AuditAction::Auth, true));
            handle.shutdown();
        }
        {
            let handle = start(path, 1000).unwrap();
            assert_eq!(handle.log.recent(10).len(), 1);
            handle.shutdown();
        }
    }
}
