//! Single-instance guard: a file-backed lock preventing two live copies of
//! the application from running simultaneously.
//!
//! The lock file names a PID, the holder's executable path, and a write
//! timestamp. A lock is honored only if that PID is still alive *and* its
//! executable matches this application's own binary path — a foreign
//! process that happens to reuse the PID is never mistaken for a live
//! instance. Partially-written or corrupt locks are tolerated through a
//! grace window: a lock younger than the window is treated as
//! valid-but-unconfirmed (do not launch), older corrupt locks are reclaimed.
//!
//! Cross-process correctness relies on exclusive create for first
//! acquisition, the atomicity of write-then-rename for refresh/reclaim,
//! and every participant re-deriving its decision from the file
//! immediately before acting, never from a cached answer.

use crate::error::{OnboardingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Contents of the instance lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceLock {
    /// PID of the process that wrote this lock.
    pub pid: u32,
    /// Executable path of the holder, for packaged-binary verification.
    pub exe: PathBuf,
    /// When the lock was written.
    pub written_at: DateTime<Utc>,
}

impl InstanceLock {
    /// Create a lock record for the current process.
    #[must_use]
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            exe: std::env::current_exe().unwrap_or_default(),
            written_at: Utc::now(),
        }
    }

    /// Whether the holder is a live instance of *this* application: the
    /// PID is alive and its executable path matches ours.
    #[must_use]
    pub fn holder_is_live_instance(&self) -> bool {
        if self.pid == std::process::id() {
            return true;
        }
        if !pid_alive(self.pid) {
            return false;
        }
        // Prefer the live executable path for the PID where the platform
        // exposes it; fall back to the path recorded in the lock.
        let holder_exe = pid_executable(self.pid).unwrap_or_else(|| self.exe.clone());
        let own_exe = std::env::current_exe().unwrap_or_default();
        same_executable(&holder_exe, &own_exe)
    }
}

/// Outcome of an acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The lock is ours; we are the single live instance.
    Acquired,
    /// Another live instance (or an unconfirmed young lock) holds it.
    Busy,
}

/// File-backed mutual exclusion for application instances.
#[derive(Debug, Clone)]
pub struct InstanceGuard {
    path: PathBuf,
    grace: Duration,
}

impl InstanceGuard {
    /// Create a guard over the given lock path with the given grace window.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, grace: Duration) -> Self {
        Self {
            path: path.into(),
            grace,
        }
    }

    /// Lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to become the single live instance.
    ///
    /// Stale locks (dead PID, foreign executable past the grace window, or
    /// corrupt past the grace window) are reclaimed. Young unconfirmed
    /// locks yield [`AcquireOutcome::Busy`].
    ///
    /// # Errors
    ///
    /// Returns [`OnboardingError::Lock`] on I/O failure reading or writing
    /// the lock file.
    pub fn try_acquire(&self) -> Result<AcquireOutcome> {
        match self.read_lock() {
            LockRead::Missing => {
                // Exclusive create closes the race between two first
                // launches: whichever create_new lands first wins, and the
                // loser sees the winner's fresh lock.
                return if self.create_lock(&InstanceLock::current())? {
                    Ok(AcquireOutcome::Acquired)
                } else {
                    debug!("lost first-acquisition race; treating new lock as busy");
                    Ok(AcquireOutcome::Busy)
                };
            }
            LockRead::Valid(existing) => {
                if existing.pid == std::process::id() {
                    // Re-acquisition by the same process: refresh the stamp.
                } else if existing.holder_is_live_instance() {
                    debug!(pid = existing.pid, "another live instance holds the lock");
                    return Ok(AcquireOutcome::Busy);
                } else if self.younger_than_grace(existing.written_at) {
                    // Holder not confirmed live, but the lock is fresh; it
                    // may still be mid-startup. Do not launch.
                    debug!(pid = existing.pid, "young lock, holder unconfirmed");
                    return Ok(AcquireOutcome::Busy);
                } else {
                    warn!(
                        pid = existing.pid,
                        "reclaiming stale instance lock (holder is gone)"
                    );
                }
            }
            LockRead::Corrupt => {
                if self.file_younger_than_grace() {
                    debug!("corrupt lock inside grace window; treating as busy");
                    return Ok(AcquireOutcome::Busy);
                }
                warn!("reclaiming corrupt instance lock past grace window");
            }
            LockRead::Error(e) => return Err(e),
        }

        self.write_lock(&InstanceLock::current())?;
        Ok(AcquireOutcome::Acquired)
    }

    /// Whether another live instance of this application currently holds
    /// the lock.
    ///
    /// This is the authoritative pre-relaunch check; call it as close as
    /// possible to the actual relaunch action. A corrupt-but-young lock
    /// answers `true` (do not launch).
    #[must_use]
    pub fn is_other_instance_running(&self) -> bool {
        match self.read_lock() {
            LockRead::Valid(existing) => {
                existing.pid != std::process::id() && existing.holder_is_live_instance()
            }
            LockRead::Corrupt => self.file_younger_than_grace(),
            LockRead::Missing | LockRead::Error(_) => false,
        }
    }

    /// Release the lock on clean shutdown.
    ///
    /// Only removes the file if it still names this process, so a racing
    /// new instance's lock is never deleted.
    pub fn release(&self) {
        if let LockRead::Valid(existing) = self.read_lock() {
            if existing.pid == std::process::id() {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(error = %e, "failed to remove instance lock");
                    }
                }
            }
        }
    }

    fn read_lock(&self) -> LockRead {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LockRead::Missing,
            Err(e) => {
                return LockRead::Error(OnboardingError::Lock(format!(
                    "read {}: {e}",
                    self.path.display()
                )));
            }
        };
        match serde_json::from_str::<InstanceLock>(&content) {
            Ok(lock) => LockRead::Valid(lock),
            Err(_) => LockRead::Corrupt,
        }
    }

    /// Atomically create the lock file, failing if it already exists.
    ///
    /// Returns `false` when another process created the file first. Used
    /// only for first acquisition; refresh and reclaim go through the
    /// write-then-rename path, which may legitimately replace an existing
    /// file.
    fn create_lock(&self, lock: &InstanceLock) -> Result<bool> {
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(lock)
            .map_err(|e| OnboardingError::Lock(format!("serialize lock: {e}")))?;
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(OnboardingError::Lock(format!(
                    "create {}: {e}",
                    self.path.display()
                )));
            }
        };
        file.write_all(json.as_bytes())
            .map_err(|e| OnboardingError::Lock(format!("write {}: {e}", self.path.display())))?;
        Ok(true)
    }

    fn write_lock(&self, lock: &InstanceLock) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(lock)
            .map_err(|e| OnboardingError::Lock(format!("serialize lock: {e}")))?;
        let tmp = self.path.with_extension("lock.tmp");
        std::fs::write(&tmp, json.as_bytes())
            .map_err(|e| OnboardingError::Lock(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| OnboardingError::Lock(format!("rename lock: {e}")))?;
        Ok(())
    }

    fn younger_than_grace(&self, written_at: DateTime<Utc>) -> bool {
        let age = Utc::now().signed_duration_since(written_at);
        age.to_std().map(|a| a < self.grace).unwrap_or(true)
    }

    fn file_younger_than_grace(&self) -> bool {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return true;
        };
        modified
            .elapsed()
            .map(|age| age < self.grace)
            .unwrap_or(true)
    }
}

enum LockRead {
    Missing,
    Valid(InstanceLock),
    Corrupt,
    Error(OnboardingError),
}

/// Whether a PID names a live process on this host.
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // Signal 0 performs error checking only. EPERM still means the process
    // exists.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // Cannot verify; assume alive so the grace window governs.
    true
}

/// Best-effort live executable path for a PID.
#[cfg(target_os = "linux")]
fn pid_executable(pid: u32) -> Option<PathBuf> {
    std::fs::read_link(format!("/proc/{pid}/exe")).ok()
}

#[cfg(not(target_os = "linux"))]
fn pid_executable(_pid: u32) -> Option<PathBuf> {
    None
}

/// Compare two executable paths, tolerating symlinks.
fn same_executable(a: &Path, b: &Path) -> bool {
    if a.as_os_str().is_empty() || b.as_os_str().is_empty() {
        return false;
    }
    let ca = a.canonicalize().unwrap_or_else(|_| a.to_path_buf());
    let cb = b.canonicalize().unwrap_or_else(|_| b.to_path_buf());
    ca == cb
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn guard_in(dir: &tempfile::TempDir, grace: Duration) -> InstanceGuard {
        InstanceGuard::new(dir.path().join("instance.lock"), grace)
    }

    #[test]
    fn acquire_on_empty_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_in(&dir, Duration::from_secs(5));
        assert_eq!(guard.try_acquire().unwrap(), AcquireOutcome::Acquired);
        assert!(guard.path().exists());
    }

    #[test]
    fn own_lock_is_not_another_instance() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_in(&dir, Duration::from_secs(5));
        guard.try_acquire().unwrap();
        assert!(!guard.is_other_instance_running());
    }

    #[test]
    fn reacquire_by_same_process_succeeds() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_in(&dir, Duration::from_secs(5));
        assert_eq!(guard.try_acquire().unwrap(), AcquireOutcome::Acquired);
        assert_eq!(guard.try_acquire().unwrap(), AcquireOutcome::Acquired);
    }

    #[test]
    fn dead_pid_lock_is_reclaimed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_in(&dir, Duration::from_secs(5));
        let stale = InstanceLock {
            // PIDs near u32::MAX exceed any real pid range.
            pid: u32::MAX - 1,
            exe: std::env::current_exe().unwrap_or_default(),
            written_at: Utc::now() - TimeDelta::seconds(3600),
        };
        std::fs::write(guard.path(), serde_json::to_string(&stale).unwrap()).unwrap();

        assert_eq!(guard.try_acquire().unwrap(), AcquireOutcome::Acquired);
        assert!(!guard.is_other_instance_running());
    }

    #[test]
    fn young_unconfirmed_lock_is_busy() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_in(&dir, Duration::from_secs(3600));
        let young = InstanceLock {
            pid: u32::MAX - 1,
            exe: PathBuf::from("/nonexistent/binary"),
            written_at: Utc::now(),
        };
        std::fs::write(guard.path(), serde_json::to_string(&young).unwrap()).unwrap();

        assert_eq!(guard.try_acquire().unwrap(), AcquireOutcome::Busy);
    }

    #[test]
    fn corrupt_young_lock_is_busy_corrupt_old_is_reclaimed() {
        let dir = tempfile::tempdir().expect("temp dir");

        // Young corrupt lock: busy.
        let busy_guard = guard_in(&dir, Duration::from_secs(3600));
        std::fs::write(busy_guard.path(), b"garbage").unwrap();
        assert_eq!(busy_guard.try_acquire().unwrap(), AcquireOutcome::Busy);
        assert!(busy_guard.is_other_instance_running());

        // Same file past a zero grace window: reclaimable.
        let reclaim_guard = InstanceGuard::new(busy_guard.path(), Duration::ZERO);
        assert_eq!(reclaim_guard.try_acquire().unwrap(), AcquireOutcome::Acquired);
    }

    #[test]
    fn live_foreign_executable_does_not_count_as_instance() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_in(&dir, Duration::ZERO);
        // PID 1 is alive on unix but is not our binary.
        let foreign = InstanceLock {
            pid: 1,
            exe: PathBuf::from("/sbin/init"),
            written_at: Utc::now() - TimeDelta::seconds(3600),
        };
        std::fs::write(guard.path(), serde_json::to_string(&foreign).unwrap()).unwrap();

        assert!(!guard.is_other_instance_running());
        assert_eq!(guard.try_acquire().unwrap(), AcquireOutcome::Acquired);
    }

    #[test]
    fn release_removes_own_lock_only() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_in(&dir, Duration::from_secs(5));
        guard.try_acquire().unwrap();
        guard.release();
        assert!(!guard.path().exists());

        // A lock naming a different pid survives release().
        let other = InstanceLock {
            pid: u32::MAX - 1,
            exe: PathBuf::from("/other"),
            written_at: Utc::now(),
        };
        std::fs::write(guard.path(), serde_json::to_string(&other).unwrap()).unwrap();
        guard.release();
        assert!(guard.path().exists());
    }

    #[test]
    fn racing_first_acquisitions_have_exactly_one_winner() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("instance.lock");
        let threads = 8u32;
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(threads as usize));

        // Distinct fabricated holders sidestep the legitimate same-PID
        // re-acquire path, so the exclusive create alone decides.
        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let path = path.clone();
                let barrier = std::sync::Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let guard = InstanceGuard::new(path, Duration::from_secs(3600));
                    let lock = InstanceLock {
                        pid: u32::MAX - 1 - i,
                        exe: PathBuf::from(format!("/launch/{i}")),
                        written_at: Utc::now(),
                    };
                    barrier.wait();
                    guard.create_lock(&lock).expect("create attempt")
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1, "exactly one simultaneous launch may win");
    }

    #[test]
    fn loser_of_first_acquisition_race_is_busy() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_in(&dir, Duration::from_secs(3600));

        // Another launch created its lock between our missing-read and our
        // create: the exclusive create fails and the fresh lock reads as an
        // unconfirmed young holder.
        let winner = InstanceLock {
            pid: u32::MAX - 1,
            exe: PathBuf::from("/other/launch"),
            written_at: Utc::now(),
        };
        assert!(guard.create_lock(&winner).unwrap());
        assert!(!guard.create_lock(&InstanceLock::current()).unwrap());
        assert_eq!(guard.try_acquire().unwrap(), AcquireOutcome::Busy);

        // The winner's lock was not clobbered.
        let on_disk: InstanceLock =
            serde_json::from_str(&std::fs::read_to_string(guard.path()).unwrap()).unwrap();
        assert_eq!(on_disk.pid, winner.pid);
    }
}
