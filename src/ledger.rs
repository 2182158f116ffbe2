//! Durable onboarding ledger: the single source of truth for progress.
//!
//! The ledger is a JSON file persisted after every mutation with atomic
//! write-then-rename semantics, so another process (the relaunch helper, a
//! fresh instance after a crash) never observes a partial write. All
//! components read and mutate it through one serializing owner — the
//! orchestrator — never directly.

use crate::capability::{CapabilityKind, CapabilityStep, StepState};
use crate::config::OnboardingConfig;
use crate::error::{OnboardingError, Result};
use crate::phase::OnboardingPhase;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persistent record of onboarding progress.
///
/// Invariants: `phase` only advances forward (except `aborted`);
/// `restart_count <= 1` within a single onboarding cycle. The count is
/// never reset except by an explicit [`LedgerStore::reset`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Ledger {
    /// Current onboarding phase.
    #[serde(default)]
    pub phase: OnboardingPhase,
    /// Per-capability steps, in configured capability order.
    #[serde(default)]
    pub steps: Vec<CapabilityStep>,
    /// Number of automatic restarts performed this onboarding cycle.
    #[serde(default)]
    pub restart_count: u32,
}

impl Ledger {
    /// Create a fresh ledger with one `unknown` step per configured
    /// capability, in table order.
    #[must_use]
    pub fn from_config(config: &OnboardingConfig) -> Self {
        Self {
            phase: OnboardingPhase::Init,
            steps: config
                .steps
                .iter()
                .map(|spec| CapabilityStep::new(spec.kind, spec.trigger, spec.hard))
                .collect(),
            restart_count: 0,
        }
    }

    /// Reconcile a loaded ledger with the current configuration.
    ///
    /// Capabilities added to the config since the ledger was written get a
    /// fresh `unknown` step; steps for capabilities removed from the config
    /// are kept (their history stays on record) but will not be run.
    pub fn sync_with_config(&mut self, config: &OnboardingConfig) {
        for spec in &config.steps {
            if self.step(spec.kind).is_none() {
                debug!(kind = %spec.kind, "adding capability step from config");
                self.steps
                    .push(CapabilityStep::new(spec.kind, spec.trigger, spec.hard));
            }
        }
    }

    /// Look up the step for a capability.
    #[must_use]
    pub fn step(&self, kind: CapabilityKind) -> Option<&CapabilityStep> {
        self.steps.iter().find(|s| s.kind == kind)
    }

    /// Mutable step lookup.
    pub fn step_mut(&mut self, kind: CapabilityKind) -> Option<&mut CapabilityStep> {
        self.steps.iter_mut().find(|s| s.kind == kind)
    }

    /// Move to a new phase, enforcing forward-only transitions.
    ///
    /// # Errors
    ///
    /// Returns [`OnboardingError::Ledger`] if the transition is illegal.
    pub fn set_phase(&mut self, to: OnboardingPhase) -> Result<()> {
        if !self.phase.can_transition(to) {
            return Err(OnboardingError::Ledger(format!(
                "illegal phase transition: {} -> {}",
                self.phase, to
            )));
        }
        if self.phase != to {
            debug!(from = %self.phase, to = %to, "phase transition");
            self.phase = to;
        }
        Ok(())
    }

    /// Leave `aborted` and resume the cycle at the derived pre-abort phase.
    ///
    /// The phase machine is otherwise forward-only; this is the one
    /// sanctioned backward edge, taken when a new process lifetime picks up
    /// a cycle the user quit. Legal only from `aborted` and only into a
    /// non-terminal phase.
    ///
    /// # Errors
    ///
    /// Returns [`OnboardingError::Ledger`] if the ledger is not aborted or
    /// the target phase is terminal.
    pub fn resume_from_abort(&mut self, to: OnboardingPhase) -> Result<()> {
        if self.phase != OnboardingPhase::Aborted || to.is_terminal() {
            return Err(OnboardingError::Ledger(format!(
                "illegal abort resume: {} -> {}",
                self.phase, to
            )));
        }
        debug!(to = %to, "resuming aborted onboarding cycle");
        self.phase = to;
        Ok(())
    }

    /// Whether every step has settled (terminal or waiting on a restart).
    #[must_use]
    pub fn all_steps_settled(&self) -> bool {
        self.steps.iter().all(|s| s.state.is_settled())
    }

    /// Whether every hard capability has settled.
    #[must_use]
    pub fn all_hard_settled(&self) -> bool {
        self.steps
            .iter()
            .filter(|s| s.hard)
            .all(|s| s.state.is_settled())
    }

    /// Capabilities that settled as `needs_restart` and are owed a
    /// post-restart re-check.
    #[must_use]
    pub fn needs_restart_kinds(&self) -> Vec<CapabilityKind> {
        self.steps
            .iter()
            .filter(|s| s.state == StepState::NeedsRestart)
            .map(|s| s.kind)
            .collect()
    }

    /// Hard capabilities that ended denied or timed out.
    ///
    /// Non-empty means the app starts in degraded mode. This is always
    /// derived from step states on demand, never cached as a boolean that
    /// could go stale relative to the ledger.
    #[must_use]
    pub fn degraded_kinds(&self) -> Vec<CapabilityKind> {
        self.steps
            .iter()
            .filter(|s| s.is_hard_unresolved())
            .map(|s| s.kind)
            .collect()
    }
}

/// File-backed ledger store with atomic write-then-rename persistence.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    /// Create a store backed by the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store at the default ledger path for this app identity.
    #[must_use]
    pub fn at_default_path() -> Self {
        Self::new(crate::paths::ledger_file())
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted ledger, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`OnboardingError::Ledger`] if the file exists but cannot be
    /// read or parsed. The caller decides whether to treat that as a fresh
    /// start; this function never deletes the file.
    pub fn load(&self) -> Result<Option<Ledger>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(OnboardingError::Ledger(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };
        let ledger: Ledger = serde_json::from_str(&content).map_err(|e| {
            OnboardingError::Ledger(format!("failed to parse {}: {e}", self.path.display()))
        })?;
        Ok(Some(ledger))
    }

    /// Load the persisted ledger or create a fresh one from the config,
    /// reconciling either way.
    ///
    /// A corrupt ledger file is replaced with a fresh ledger (with a
    /// warning) rather than blocking startup: the previous persisted state
    /// is unrecoverable at that point, and re-running settled consent
    /// dialogs is harmless (the OS answers immediately for already-decided
    /// capabilities).
    pub fn load_or_create(&self, config: &OnboardingConfig) -> Ledger {
        match self.load() {
            Ok(Some(mut ledger)) => {
                ledger.sync_with_config(config);
                ledger
            }
            Ok(None) => Ledger::from_config(config),
            Err(e) => {
                warn!(error = %e, "ledger unreadable; starting a fresh onboarding cycle");
                Ledger::from_config(config)
            }
        }
    }

    /// Persist the ledger atomically: write to a sibling temp file, then
    /// rename over the target. A crash at any point leaves either the old
    /// or the new ledger on disk, never a partial write.
    ///
    /// # Errors
    ///
    /// Returns [`OnboardingError::Ledger`] on serialization or I/O failure.
    /// On failure the previous persisted state remains authoritative.
    pub fn save(&self, ledger: &Ledger) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(ledger)
            .map_err(|e| OnboardingError::Ledger(format!("serialize ledger: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json.as_bytes()).map_err(|e| {
            OnboardingError::Ledger(format!("write {}: {e}", tmp.display()))
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            OnboardingError::Ledger(format!(
                "rename {} -> {}: {e}",
                tmp.display(),
                self.path.display()
            ))
        })?;
        Ok(())
    }

    /// Delete the persisted ledger (developer/support reset).
    ///
    /// Normal flow never deletes the ledger; this is the explicit wipe that
    /// also resets the `restart_count` invariant for a new onboarding cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn reset(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OnboardingError::Ledger(format!(
                "remove {}: {e}",
                self.path.display()
            ))),
        }
    }
}
