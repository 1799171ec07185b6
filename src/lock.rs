use std::fs;
use std::path::{Path, PathBuf};

use crate::log_warn;

const LOCK_FILE: &str = "provision-reconciler.lock";
const PID_FILE: &str = "provision-reconciler.pid";

/// Host-local lock that keeps two reconciler processes from running cycles at once.
/// Released on drop.
#[must_use = "lock is released when LockGuard is dropped"]
pub struct LockGuard {
    lock: fslock::LockFile,
    pid_path: PathBuf,
}

impl LockGuard {
    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }
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
            log_warn!("[lock] Failed to release lock: {}", e);
        }
        if let Err(e) = fs::remove_file(&self.pid_path) {
            log_warn!(
                "[lock] Failed to remove PID file {}: {}",
                self.pid_path.display(),
                e
            );
        }
    }
}

/// Acquire the reconciler lock in `lock_dir`, creating the directory if needed.
///
/// The file lock is taken first; the PID file is written afterwards and only
/// used to explain contention.
pub fn try_acquire(lock_dir: &Path) -> Result<LockGuard, String> {
    fs::create_dir_all(lock_dir)
        .map_err(|e| format!("Failed to create {}: {}", lock_dir.display(), e))?;

    let lock_path = lock_dir.join(LOCK_FILE);
    let pid_path = lock_dir.join(PID_FILE);

    let mut lock = fslock::LockFile::open(&lock_path)
        .map_err(|e| format!("Failed to open lock file {}: {}", lock_path.display(), e))?;

    let acquired = lock
        .try_lock()
        .map_err(|e| format!("Failed to acquire lock: {}", e))?;

    if !acquired {
        return Err(describe_holder(&lock_path, &pid_path));
    }

    fs::write(&pid_path, std::process::id().to_string())
        .map_err(|e| format!("Failed to write PID file: {}", e))?;

    Ok(LockGuard { lock, pid_path })
}

fn describe_holder(lock_path: &Path, pid_path: &Path) -> String {
    let holder = fs::read_to_string(pid_path)
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok());

    match holder {
        Some(pid) if is_pid_alive(pid) => format!(
            "Another reconciler instance is running (PID {}); a cycle may still be in progress",
            pid
        ),
        // flock is released on process death, so a dead holder is unexpected
        Some(pid) => format!(
            "Lock file is held but recorded PID {} is not alive. \
             Remove {} and {} to recover",
            pid,
            lock_path.display(),
            pid_path.display()
        ),
        None => format!(
            "Another reconciler instance holds the lock. \
             If this is stale, remove {}",
            lock_path.display()
        ),
    }
}

fn is_pid_alive(pid: i32) -> bool {
    // signal 0 probes for existence without delivering anything
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_pid_alive_current_process() {
        let pid = std::process::id() as i32;
        assert!(is_pid_alive(pid));
    }

    #[test]
    fn test_is_pid_alive_nonexistent() {
        assert!(!is_pid_alive(99_999_999));
    }

    #[test]
    fn test_describe_holder_without_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let message = describe_holder(&dir.path().join(LOCK_FILE), &dir.path().join(PID_FILE));
        assert!(message.contains("holds the lock"), "{}", message);
    }
}
