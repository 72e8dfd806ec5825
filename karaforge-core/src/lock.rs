use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type LockResult<T> = std::result::Result<T, LockError>;

/// On-disk record of a held lock. Absence of the file means unlocked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub process_id: u32,
    pub start_time: DateTime<Utc>,
    pub label: String,
}

impl LockRecord {
    pub fn holder_alive(&self) -> bool {
        process_alive(self.process_id)
    }
}

/// Cooperative advisory lock serialising access to the single shared
/// inference slot across independently-launched runs. Mutual exclusion is
/// achieved with an atomic create-new of the record file; waiters poll, and
/// a record whose holder process is dead is reclaimed immediately.
#[derive(Debug, Clone)]
pub struct ResourceLock {
    path: PathBuf,
    poll_interval: Duration,
}

impl ResourceLock {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_secs(5),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks (polling) until the lock is held. Never times out on its own;
    /// callers needing a bound must impose external cancellation. Only
    /// unrecoverable I/O (permission denied) fails outward.
    pub async fn acquire(&self, label: &str) -> LockResult<LockGuard> {
        loop {
            match self.try_create(label) {
                Ok(()) => {
                    debug!(path = %self.path.display(), label, "resource lock acquired");
                    return Ok(LockGuard {
                        path: self.path.clone(),
                        process_id: std::process::id(),
                        released: false,
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if self.wait_or_reclaim(label).await? {
                        continue;
                    }
                    sleep(self.poll_interval).await;
                }
                Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                    return Err(LockError::Io {
                        source: err,
                        path: self.path.clone(),
                    });
                }
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "transient lock write error, retrying");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Returns the current record, if any. Used for lock inspection.
    pub fn read_record(&self) -> Option<LockRecord> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Unconditionally removes the record. For administrative clearing;
    /// returns the record that was in place, if any.
    pub fn clear(&self) -> LockResult<Option<LockRecord>> {
        let record = self.read_record();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(record),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(LockError::Io {
                source,
                path: self.path.clone(),
            }),
        }
    }

    /// True if reclamation happened and acquisition should retry at once.
    async fn wait_or_reclaim(&self, label: &str) -> LockResult<bool> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<LockRecord>(&contents) {
                Ok(record) => {
                    if process_alive(record.process_id) {
                        debug!(
                            holder = record.process_id,
                            held_by = %record.label,
                            waiting_for = label,
                            "resource busy, waiting"
                        );
                        Ok(false)
                    } else {
                        warn!(
                            holder = record.process_id,
                            held_by = %record.label,
                            "reclaiming lock from dead process"
                        );
                        self.remove_record();
                        Ok(true)
                    }
                }
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "deleting unparseable lock record");
                    self.remove_record();
                    Ok(true)
                }
            },
            // Holder released between our create attempt and the read.
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(true),
            Err(err) if err.kind() == ErrorKind::PermissionDenied => Err(LockError::Io {
                source: err,
                path: self.path.clone(),
            }),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "transient lock read error, retrying");
                Ok(false)
            }
        }
    }

    fn try_create(&self, label: &str) -> std::io::Result<()> {
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let record = LockRecord {
            process_id: std::process::id(),
            start_time: Utc::now(),
            label: label.to_string(),
        };
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        let payload = serde_json::to_vec(&record).map_err(std::io::Error::other)?;
        file.write_all(&payload)
    }

    fn remove_record(&self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove lock record");
            }
        }
    }
}

/// Held lock. Releasing deletes the record only while it still names this
/// process, so a racing reclaimer's fresh lock is never clobbered.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    process_id: u32,
    released: bool,
}

impl LockGuard {
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let still_ours = std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|contents| serde_json::from_str::<LockRecord>(&contents).ok())
            .map(|record| record.process_id == self.process_id)
            .unwrap_or(false);
        if !still_ours {
            warn!(path = %self.path.display(), "lock record no longer ours, leaving it in place");
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to release lock");
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Liveness probe for the recorded holder pid. Prefers /proc where the
/// platform provides it, otherwise asks the system `kill -0`.
fn process_alive(pid: u32) -> bool {
    let proc_root = Path::new("/proc");
    if proc_root.is_dir() {
        return proc_root.join(pid.to_string()).exists();
    }
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
