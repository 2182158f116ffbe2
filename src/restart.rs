//! Single-shot, cancellable application restart.
//!
//! The restart hand-off is a message-passing boundary between three
//! processes: the current instance, a detached relaunch helper, and the
//! fresh instance the helper spawns. After the hand-off the parent controls
//! the helper only through durable marker files — the persisted abort
//! marker and the instance lock — never through in-memory state. Every
//! participant re-derives its decision from those files immediately before
//! acting.
//!
//! The primary defense against restart loops is the ledger's
//! `restart_count`: it is incremented and persisted *before* the helper is
//! spawned, so a crash after spawning can never be replayed into a second
//! restart.

use crate::error::{OnboardingError, Result};
use crate::guard::InstanceGuard;
use crate::ledger::{Ledger, LedgerStore};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Persisted user-quit intent.
///
/// The marker file is written the instant a user-initiated quit is
/// observed, survives the process being killed mid-abort, and is consulted
/// at every remaining suspension point of the restart sequence — including
/// by the detached helper right before its one irreversible action.
/// Cleared on the next clean startup.
#[derive(Debug, Clone)]
pub struct RestartIntent {
    marker: PathBuf,
}

impl RestartIntent {
    /// Create an intent backed by the given marker path.
    #[must_use]
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Create an intent at the default marker path for this app identity.
    #[must_use]
    pub fn at_default_path() -> Self {
        Self::new(crate::paths::abort_marker_file())
    }

    /// Marker file path.
    #[must_use]
    pub fn marker_path(&self) -> &Path {
        &self.marker
    }

    /// Record a user-initiated quit. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`OnboardingError::Restart`] if the marker cannot be written.
    pub fn request_abort(&self) -> Result<()> {
        if let Some(parent) = self.marker.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stamp = chrono::Utc::now().to_rfc3339();
        std::fs::write(&self.marker, stamp)
            .map_err(|e| OnboardingError::Restart(format!("write abort marker: {e}")))?;
        info!("restart abort requested");
        Ok(())
    }

    /// Whether a quit has been recorded and not yet cleared.
    #[must_use]
    pub fn abort_requested(&self) -> bool {
        self.marker.exists()
    }

    /// Clear the marker on clean startup.
    pub fn clear(&self) {
        if let Err(e) = std::fs::remove_file(&self.marker) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to clear abort marker");
            }
        }
    }
}

/// Outcome of a restart decision or of the helper's relaunch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    /// No restart performed: none owed, already used this cycle, or a
    /// duplicate live instance made the relaunch unnecessary.
    None,
    /// Restart recorded and the detached helper spawned; the current
    /// process should now exit so the helper can relaunch.
    Scheduled,
    /// The helper performed the relaunch.
    Executed,
    /// A user quit won the race; no relaunch will occur.
    Aborted,
}

/// Spawns the detached relaunch helper.
///
/// A seam so tests can verify restart decisions without creating real
/// processes.
pub trait RelaunchSpawner: Send + Sync {
    /// Spawn a detached process that will relaunch the application after
    /// `delay`.
    fn spawn_helper(&self, delay: Duration) -> Result<()>;
}

/// Production spawner: re-invokes this binary with the `relaunch-helper`
/// subcommand, fully detached from the current process.
pub struct ProcessSpawner;

impl RelaunchSpawner for ProcessSpawner {
    fn spawn_helper(&self, delay: Duration) -> Result<()> {
        let exe = std::env::current_exe()
            .map_err(|e| OnboardingError::Restart(format!("resolve own executable: {e}")))?;
        std::process::Command::new(&exe)
            .arg("relaunch-helper")
            .arg("--delay-ms")
            .arg(delay.as_millis().to_string())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| OnboardingError::Restart(format!("spawn relaunch helper: {e}")))?;
        Ok(())
    }
}

/// Owner of the single permitted automatic relaunch.
///
/// Any subsystem wanting a restart must request it through this one owner,
/// which enforces the at-most-one invariant centrally.
pub struct RestartCoordinator<'a> {
    store: &'a LedgerStore,
    intent: &'a RestartIntent,
    spawner: &'a dyn RelaunchSpawner,
    relaunch_delay: Duration,
}

impl<'a> RestartCoordinator<'a> {
    /// Create a coordinator over the shared durable state.
    #[must_use]
    pub fn new(
        store: &'a LedgerStore,
        intent: &'a RestartIntent,
        spawner: &'a dyn RelaunchSpawner,
        relaunch_delay: Duration,
    ) -> Self {
        Self {
            store,
            intent,
            spawner,
            relaunch_delay,
        }
    }

    /// Decide and, if owed, perform the restart hand-off.
    ///
    /// Sequence: abort check → increment-and-persist `restart_count` →
    /// spawn detached helper → final abort check. The count is persisted
    /// before the spawn so a crash afterwards cannot replay into a second
    /// restart. Refuses outright (returns [`RestartOutcome::None`]) if a
    /// restart was already used this onboarding cycle.
    ///
    /// On [`RestartOutcome::Scheduled`] the caller must exit the current
    /// process promptly so the helper finds the instance lock released.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be persisted or the helper
    /// cannot be spawned; in both cases no restart is recorded as pending
    /// beyond what is on disk.
    pub fn maybe_restart(&self, ledger: &mut Ledger) -> Result<RestartOutcome> {
        if self.intent.abort_requested() {
            info!("restart skipped: quit requested");
            return Ok(RestartOutcome::Aborted);
        }
        if ledger.restart_count >= 1 {
            warn!(
                count = ledger.restart_count,
                "restart already used this onboarding cycle; refusing"
            );
            return Ok(RestartOutcome::None);
        }

        ledger.restart_count += 1;
        self.store.save(ledger)?;

        self.spawner.spawn_helper(self.relaunch_delay)?;
        info!(delay_ms = self.relaunch_delay.as_millis() as u64, "relaunch helper spawned");

        // Final check before the caller exits: if the user quit in the
        // interim, the persisted marker also tells the racing helper to
        // stand down before it relaunches.
        if self.intent.abort_requested() {
            info!("quit won the race after helper spawn; relaunch will be cancelled");
            return Ok(RestartOutcome::Aborted);
        }
        Ok(RestartOutcome::Scheduled)
    }
}

/// Entry point for the detached relaunch helper process.
///
/// Waits out the hand-off delay (so the parent can exit and release the
/// instance lock), then re-derives its decision from the durable state:
/// the abort marker first, then the instance guard as close as possible to
/// the relaunch itself. Relaunches `app_exe` with no arguments.
///
/// # Errors
///
/// Returns an error only if the relaunch spawn itself fails.
pub async fn run_relaunch_helper(
    intent: &RestartIntent,
    guard: &InstanceGuard,
    app_exe: &Path,
    delay: Duration,
) -> Result<RestartOutcome> {
    tokio::time::sleep(delay).await;

    if intent.abort_requested() {
        info!("relaunch cancelled: user quit");
        return Ok(RestartOutcome::Aborted);
    }
    // Authoritative duplicate check, immediately before the one
    // irreversible action.
    if guard.is_other_instance_running() {
        info!("relaunch skipped: another live instance detected");
        return Ok(RestartOutcome::None);
    }

    std::process::Command::new(app_exe)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| OnboardingError::Restart(format!("relaunch {}: {e}", app_exe.display())))?;
    info!(exe = %app_exe.display(), "application relaunched");
    Ok(RestartOutcome::Executed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OnboardingConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingSpawner {
        spawns: AtomicUsize,
    }

    impl RecordingSpawner {
        fn new() -> Self {
            Self {
                spawns: AtomicUsize::new(0),
            }
        }

        fn count(&self) -> usize {
            self.spawns.load(Ordering::SeqCst)
        }
    }

    impl RelaunchSpawner for RecordingSpawner {
        fn spawn_helper(&self, _delay: Duration) -> Result<()> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fixture(dir: &tempfile::TempDir) -> (LedgerStore, RestartIntent, Ledger) {
        let store = LedgerStore::new(dir.path().join("onboarding.json"));
        let intent = RestartIntent::new(dir.path().join("restart-abort.marker"));
        let ledger = Ledger::from_config(&OnboardingConfig::default());
        (store, intent, ledger)
    }

    #[test]
    fn first_restart_is_scheduled_and_persisted_before_spawn() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (store, intent, mut ledger) = fixture(&dir);
        let spawner = RecordingSpawner::new();
        let coordinator = RestartCoordinator::new(&store, &intent, &spawner, Duration::ZERO);

        let outcome = coordinator.maybe_restart(&mut ledger).expect("restart");
        assert_eq!(outcome, RestartOutcome::Scheduled);
        assert_eq!(spawner.count(), 1);
        assert_eq!(ledger.restart_count, 1);

        let persisted = store.load().unwrap().unwrap();
        assert_eq!(persisted.restart_count, 1);
    }

    #[test]
    fn second_restart_is_refused() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (store, intent, mut ledger) = fixture(&dir);
        let spawner = RecordingSpawner::new();
        let coordinator = RestartCoordinator::new(&store, &intent, &spawner, Duration::ZERO);

        assert_eq!(
            coordinator.maybe_restart(&mut ledger).unwrap(),
            RestartOutcome::Scheduled
        );
        assert_eq!(
            coordinator.maybe_restart(&mut ledger).unwrap(),
            RestartOutcome::None
        );
        assert_eq!(spawner.count(), 1, "helper spawned at most once");
        assert_eq!(ledger.restart_count, 1);
    }

    #[test]
    fn abort_before_restart_has_no_side_effects() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (store, intent, mut ledger) = fixture(&dir);
        intent.request_abort().expect("set abort");
        let spawner = RecordingSpawner::new();
        let coordinator = RestartCoordinator::new(&store, &intent, &spawner, Duration::ZERO);

        let outcome = coordinator.maybe_restart(&mut ledger).expect("restart");
        assert_eq!(outcome, RestartOutcome::Aborted);
        assert_eq!(spawner.count(), 0, "no helper spawned");
        assert_eq!(ledger.restart_count, 0, "count untouched");
        assert!(store.load().unwrap().is_none(), "ledger not persisted");
    }

    #[test]
    fn abort_marker_roundtrip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let intent = RestartIntent::new(dir.path().join("restart-abort.marker"));
        assert!(!intent.abort_requested());
        intent.request_abort().expect("set abort");
        assert!(intent.abort_requested());
        intent.request_abort().expect("idempotent");
        intent.clear();
        assert!(!intent.abort_requested());
        intent.clear();
    }

    #[tokio::test]
    async fn helper_aborts_when_quit_marker_present() {
        let dir = tempfile::tempdir().expect("temp dir");
        let intent = RestartIntent::new(dir.path().join("restart-abort.marker"));
        intent.request_abort().expect("set abort");
        let guard = InstanceGuard::new(dir.path().join("instance.lock"), Duration::from_secs(5));

        let outcome = run_relaunch_helper(
            &intent,
            &guard,
            Path::new("/nonexistent/app"),
            Duration::ZERO,
        )
        .await
        .expect("helper run");
        assert_eq!(outcome, RestartOutcome::Aborted);
    }

    #[tokio::test]
    async fn helper_never_relaunches_over_a_corrupt_young_lock() {
        let dir = tempfile::tempdir().expect("temp dir");
        let intent = RestartIntent::new(dir.path().join("restart-abort.marker"));
        let guard = InstanceGuard::new(dir.path().join("instance.lock"), Duration::from_secs(3600));
        // A fresh but unreadable lock means "possibly mid-startup": the
        // helper must stand down rather than risk a duplicate.
        std::fs::write(guard.path(), b"partial write").unwrap();

        let outcome = run_relaunch_helper(
            &intent,
            &guard,
            Path::new("/nonexistent/app"),
            Duration::ZERO,
        )
        .await
        .expect("helper run");
        assert_eq!(outcome, RestartOutcome::None);
    }
}
