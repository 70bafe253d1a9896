//! Append-only activity log shared by the engine and the sandbox.
//!
//! This is the product-level record of what happened; diagnostics go through
//! `tracing` (see [`crate::logging`]). Every append is mirrored as an `info!`
//! event with target `activity`.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One timestamped log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<LogEntry>,
    mirror: Option<PathBuf>,
}

/// Cloneable handle; all clones append to the same log
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    inner: Arc<Mutex<Inner>>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also append every entry to a file
    pub fn with_file(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), err = %e, "failed to create activity log directory");
            }
        }
        self.lock().mirror = Some(path);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // An append never leaves the log half written, so a poisoned lock is still usable
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an entry stamped with the current time
    pub fn record(&self, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            message: message.into(),
        };
        info!(target: "activity", "{}", entry.message);

        let mut inner = self.lock();
        if let Some(path) = &inner.mirror {
            let written = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut file| {
                    writeln!(file, "{} {}", entry.timestamp.to_rfc3339(), entry.message)
                });
            if let Err(e) = written {
                warn!(path = %path.display(), err = %e, "failed to mirror activity entry");
            }
        }
        inner.entries.push(entry);
    }

    /// Snapshot of all entries in append order
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Drop all in-memory entries. The mirror file is left untouched.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_appends_in_order() {
        let log = ActivityLog::new();
        log.record("first");
        log.record("second");

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].message, "second");
        assert!(entries[0].timestamp <= entries[1].timestamp);
    }

    #[test]
    fn test_clones_share_entries() {
        let log = ActivityLog::new();
        let other = log.clone();
        other.record("from clone");

        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_clear() {
        let log = ActivityLog::new();
        log.record("entry");
        log.clear();

        assert!(log.is_empty());
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let log = ActivityLog::new();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        log.record(format!("thread {t} entry {i}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let entries = log.entries();
        assert_eq!(entries.len(), 400);
        assert!(entries.iter().all(|e| e.message.starts_with("thread ")));
    }

    #[test]
    fn test_mirror_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("activity.log");
        let log = ActivityLog::new().with_file(&path);
        log.record("mirrored line");

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("mirrored line"));
    }

    #[test]
    fn test_unusable_mirror_directory_keeps_memory_log() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let log = ActivityLog::new().with_file(blocker.join("activity.log"));
        log.record("still recorded");

        assert_eq!(log.len(), 1);
        assert!(!blocker.join("activity.log").exists());
    }
}
