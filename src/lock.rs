use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AutostartError;
use crate::log_warn;

/// Holds one batch's lock; released on drop.
#[must_use = "lock is released when LockGuard is dropped"]
pub struct LockGuard {
    lock: fslock::LockFile,
    pid_path: PathBuf,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("pid_path", &self.pid_path)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock() {
            log_warn!("Warning: Failed to release batch lock: {}", e);
        }
        if let Err(e) = fs::remove_file(&self.pid_path) {
            log_warn!(
                "Warning: Failed to remove PID file {}: {}",
                self.pid_path.display(),
                e
            );
        }
    }
}

pub fn lock_path(runtime_dir: &Path, batch_id: &str) -> PathBuf {
    runtime_dir.join("locks").join(format!("{}.lock", batch_id))
}

pub fn pid_path(runtime_dir: &Path, batch_id: &str) -> PathBuf {
    runtime_dir.join("locks").join(format!("{}.pid", batch_id))
}

/// Take the exclusive driver lock for `batch_id`.
///
/// Only one process may drive a batch's queue at a time: two drivers would
/// both start the current group's tasks. The file lock gives mutual
/// exclusion; the PID file next to it only feeds the error message.
pub fn try_acquire_batch(runtime_dir: &Path, batch_id: &str) -> Result<LockGuard, AutostartError> {
    let lock_path = lock_path(runtime_dir, batch_id);
    let pid_path = pid_path(runtime_dir, batch_id);
    if let Some(dir) = lock_path.parent() {
        fs::create_dir_all(dir).map_err(|e| {
            AutostartError::Storage(format!("Failed to create {}: {}", dir.display(), e))
        })?;
    }

    let mut lock = fslock::LockFile::open(&lock_path).map_err(|e| {
        AutostartError::Storage(format!(
            "Failed to open lock file {}: {}",
            lock_path.display(),
            e
        ))
    })?;

    let acquired = lock
        .try_lock()
        .map_err(|e| AutostartError::Storage(format!("Failed to acquire lock: {}", e)))?;

    if !acquired {
        let holder = fs::read_to_string(&pid_path)
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok());

        let message = match holder {
            Some(pid) if is_pid_alive(pid) => format!(
                "Batch {} is already being driven by another process (PID {})",
                batch_id, pid
            ),
            // flock is dropped when its holder dies, so this should not happen.
            Some(pid) => format!(
                "Lock for batch {} is held but recorded PID {} is not alive. \
                 Remove {} and {} to recover",
                batch_id,
                pid,
                lock_path.display(),
                pid_path.display()
            ),
            None => format!(
                "Batch {} is locked by another process. If this is stale, remove {}",
                batch_id,
                lock_path.display()
            ),
        };
        return Err(AutostartError::LockHeld(message));
    }

    fs::write(&pid_path, std::process::id().to_string())
        .map_err(|e| AutostartError::Storage(format!("Failed to write PID file: {}", e)))?;

    Ok(LockGuard { lock, pid_path })
}

fn is_pid_alive(pid: i32) -> bool {
    // signal 0 checks existence without delivering anything
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_pid_alive(std::process::id() as i32));
    }

    #[test]
    fn nonexistent_pid_is_dead() {
        assert!(!is_pid_alive(99_999_999));
    }
}
