//! Sequences capability steps, drives phase transitions, and decides
//! if/when a restart is required.
//!
//! The orchestrator is the single serializing owner of the ledger: every
//! mutation goes through it, and every decision is re-derived from the
//! persisted state rather than from a cached boolean. Steps run strictly
//! sequentially with an inter-step pause, because overlapping OS consent
//! dialogs are disallowed.

use crate::capability::{CapabilityKind, StepState};
use crate::config::{OnboardingConfig, RestartPolicy};
use crate::error::Result;
use crate::guard::InstanceGuard;
use crate::ledger::{Ledger, LedgerStore};
use crate::phase::OnboardingPhase;
use crate::probe::{CapabilityProbe, ProbeStatus};
use crate::restart::{RelaunchSpawner, RestartCoordinator, RestartIntent, RestartOutcome};
use crate::step_runner::StepRunner;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// The readiness signal published once onboarding completes.
///
/// Consumed by capability-gated subsystems to decide whether to start
/// immediately, start degraded, or keep waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateSignal {
    /// Hard capabilities that ended denied or timed out. Empty means full
    /// functionality; non-empty means start in degraded mode.
    pub degraded: Vec<CapabilityKind>,
}

impl GateSignal {
    /// Whether every hard capability resolved cleanly.
    #[must_use]
    pub fn is_fully_granted(&self) -> bool {
        self.degraded.is_empty()
    }
}

/// Receiver half of the startup gate.
///
/// Cloneable; every subscriber observes the same single completion signal.
#[derive(Debug, Clone)]
pub struct StartupGate {
    rx: watch::Receiver<Option<GateSignal>>,
}

impl StartupGate {
    /// The signal, if onboarding has already completed.
    #[must_use]
    pub fn current(&self) -> Option<GateSignal> {
        self.rx.borrow().clone()
    }

    /// Wait until onboarding completes and return the signal.
    ///
    /// Returns `None` only if the orchestrator was dropped without ever
    /// completing (e.g. abort).
    pub async fn wait_ready(&mut self) -> Option<GateSignal> {
        loop {
            if let Some(signal) = self.rx.borrow().clone() {
                return Some(signal);
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone();
            }
        }
    }
}

/// Drives the whole onboarding flow for one process lifetime.
pub struct Orchestrator {
    config: OnboardingConfig,
    store: LedgerStore,
    probe: Box<dyn CapabilityProbe>,
    intent: RestartIntent,
    spawner: Box<dyn RelaunchSpawner>,
    gate_tx: watch::Sender<Option<GateSignal>>,
    gate_rx: watch::Receiver<Option<GateSignal>>,
}

impl Orchestrator {
    /// Create an orchestrator over the durable state and collaborators.
    #[must_use]
    pub fn new(
        config: OnboardingConfig,
        store: LedgerStore,
        probe: Box<dyn CapabilityProbe>,
        intent: RestartIntent,
        spawner: Box<dyn RelaunchSpawner>,
    ) -> Self {
        let (gate_tx, gate_rx) = watch::channel(None);
        Self {
            config,
            store,
            probe,
            intent,
            spawner,
            gate_tx,
            gate_rx,
        }
    }

    /// Subscribe to the startup gate.
    #[must_use]
    pub fn gate(&self) -> StartupGate {
        StartupGate {
            rx: self.gate_rx.clone(),
        }
    }

    /// Handle on the persisted quit intent, for wiring to the app's quit
    /// path.
    #[must_use]
    pub fn intent(&self) -> &RestartIntent {
        &self.intent
    }

    /// Run onboarding to a resting phase.
    ///
    /// Returns the final phase for this process lifetime:
    /// - [`OnboardingPhase::Completed`] — gate published, app may start.
    /// - [`OnboardingPhase::RestartPending`] — a relaunch helper was
    ///   spawned; the caller must exit promptly.
    /// - [`OnboardingPhase::Aborted`] — user quit won; the caller exits
    ///   without relaunching.
    ///
    /// Re-invoking on a completed ledger re-emits the gate signal without
    /// mutating steps or the restart count.
    ///
    /// # Errors
    ///
    /// Returns an error only for unrecoverable ledger persistence failures
    /// at phase boundaries; per-step write failures are contained to the
    /// step they interrupt.
    pub async fn run(&mut self) -> Result<OnboardingPhase> {
        let mut ledger = self.store.load_or_create(&self.config);
        info!(phase = %ledger.phase, restart_count = ledger.restart_count, "onboarding starting");

        // Clean startup: the previous cycle's quit intent is spent.
        self.intent.clear();

        // A persisted completion is announced again, never re-run.
        if ledger.phase == OnboardingPhase::Completed {
            self.publish_gate(&ledger);
            return Ok(OnboardingPhase::Completed);
        }

        if ledger.phase == OnboardingPhase::Aborted {
            let resume = self.resume_phase_after_abort(&ledger);
            info!(resume = %resume, "resuming aborted onboarding");
            ledger.resume_from_abort(resume)?;
            self.store.save(&ledger)?;
        }

        loop {
            match ledger.phase {
                OnboardingPhase::Init => {
                    ledger.set_phase(OnboardingPhase::RunningSteps)?;
                    self.store.save(&ledger)?;
                }
                OnboardingPhase::RunningSteps => {
                    if self.run_steps(&mut ledger).await? {
                        // Abort observed between steps.
                        ledger.set_phase(OnboardingPhase::Aborted)?;
                        self.store.save(&ledger)?;
                        return Ok(OnboardingPhase::Aborted);
                    }
                    if self.restart_owed(&ledger) {
                        ledger.set_phase(OnboardingPhase::RestartPending)?;
                        self.store.save(&ledger)?;
                    } else {
                        ledger.set_phase(OnboardingPhase::Completed)?;
                        self.store.save(&ledger)?;
                    }
                }
                OnboardingPhase::RestartPending => {
                    if ledger.restart_count >= 1 {
                        // Fresh process after the relaunch.
                        ledger.set_phase(OnboardingPhase::PostRestartVerify)?;
                        self.store.save(&ledger)?;
                        continue;
                    }
                    let coordinator = RestartCoordinator::new(
                        &self.store,
                        &self.intent,
                        self.spawner.as_ref(),
                        self.config.relaunch_delay(),
                    );
                    match coordinator.maybe_restart(&mut ledger)? {
                        RestartOutcome::Scheduled => {
                            // Phase stays restart_pending on disk; the
                            // post-restart process takes it from there.
                            return Ok(OnboardingPhase::RestartPending);
                        }
                        RestartOutcome::Aborted => {
                            ledger.set_phase(OnboardingPhase::Aborted)?;
                            self.store.save(&ledger)?;
                            return Ok(OnboardingPhase::Aborted);
                        }
                        RestartOutcome::None | RestartOutcome::Executed => {
                            // Restart budget spent without a scheduled
                            // relaunch; verify what we have.
                            ledger.set_phase(OnboardingPhase::PostRestartVerify)?;
                            self.store.save(&ledger)?;
                        }
                    }
                }
                OnboardingPhase::PostRestartVerify => {
                    self.verify_after_restart(&mut ledger);
                    self.store.save(&ledger)?;
                    ledger.set_phase(OnboardingPhase::Completed)?;
                    self.store.save(&ledger)?;
                }
                OnboardingPhase::Completed => {
                    self.publish_gate(&ledger);
                    info!(degraded = ?ledger.degraded_kinds(), "onboarding complete");
                    return Ok(OnboardingPhase::Completed);
                }
                OnboardingPhase::Aborted => {
                    return Ok(OnboardingPhase::Aborted);
                }
            }
        }
    }

    /// Run every pending step in configured order. Returns `true` if a
    /// quit intent was observed between steps.
    async fn run_steps(&mut self, ledger: &mut Ledger) -> Result<bool> {
        let runner = StepRunner::new(
            self.probe.as_ref(),
            self.config.advance_on_timeout,
            self.config.poll_interval(),
        );
        let specs: Vec<_> = self.config.steps.clone();
        let mut first = true;
        for spec in specs {
            if self.intent.abort_requested() {
                warn!("quit observed during running_steps");
                return Ok(true);
            }
            let already_settled = ledger
                .step(spec.kind)
                .is_some_and(|s| s.state.is_settled());
            if already_settled {
                continue;
            }
            if !first {
                // Keep consent dialogs from overlapping.
                tokio::time::sleep(self.config.inter_step_pause()).await;
            }
            first = false;
            let timeout = std::time::Duration::from_secs(spec.timeout_secs);
            match runner.run(ledger, &self.store, spec.kind, timeout).await {
                Ok(outcome) => {
                    let hard_unresolved = ledger
                        .step(spec.kind)
                        .is_some_and(|s| s.is_hard_unresolved());
                    if hard_unresolved {
                        warn!(kind = %spec.kind, state = %outcome.state, "hard capability unresolved; app will run degraded");
                    }
                }
                Err(e) => {
                    // Fatal for this step only; the last persisted ledger
                    // remains authoritative for it.
                    error!(kind = %spec.kind, error = %e, "step failed to persist; continuing");
                }
            }
        }
        Ok(false)
    }

    /// Whether the settled ledger owes a restart.
    fn restart_owed(&self, ledger: &Ledger) -> bool {
        if ledger.restart_count >= 1 {
            return false;
        }
        if !ledger.needs_restart_kinds().is_empty() {
            return true;
        }
        self.config.restart_policy == RestartPolicy::AfterHardSettled && ledger.all_hard_settled()
    }

    /// Re-check steps expected to change after the restart. Read-mostly:
    /// steps already granted or denied are left untouched.
    fn verify_after_restart(&self, ledger: &mut Ledger) {
        let pending = ledger.needs_restart_kinds();
        for kind in pending {
            let verified = match self.probe.status(kind) {
                Ok(ProbeStatus::Granted) => StepState::Granted,
                Ok(ProbeStatus::Denied) => StepState::Denied,
                Ok(ProbeStatus::Undetermined | ProbeStatus::NeedsSettings) => {
                    // Still unresolved after the one permitted restart.
                    if self.config.advance_on_timeout {
                        StepState::Granted
                    } else {
                        StepState::TimedOut
                    }
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "post-restart probe failed");
                    StepState::TimedOut
                }
            };
            info!(kind = %kind, state = %verified, "post-restart verification");
            if let Some(step) = ledger.step_mut(kind) {
                step.state = verified;
            }
        }
    }

    fn publish_gate(&self, ledger: &Ledger) {
        let signal = GateSignal {
            degraded: ledger.degraded_kinds(),
        };
        // Watch semantics make re-announcement idempotent for subscribers.
        let _ = self.gate_tx.send(Some(signal));
    }

    fn resume_phase_after_abort(&self, ledger: &Ledger) -> OnboardingPhase {
        if ledger.all_steps_settled() && self.restart_owed(ledger) {
            OnboardingPhase::RestartPending
        } else if ledger.all_steps_settled() && ledger.restart_count >= 1 {
            OnboardingPhase::PostRestartVerify
        } else {
            OnboardingPhase::RunningSteps
        }
    }
}

/// Guard-aware convenience: acquire the instance lock, then build the
/// orchestrator with the production probe and spawner.
///
/// Returns `None` if another live instance holds the lock; the caller
/// should exit without touching the ledger.
///
/// # Errors
///
/// Returns an error if the lock file itself cannot be read or written.
pub fn acquire_and_build(
    config: OnboardingConfig,
    store: LedgerStore,
    guard: &InstanceGuard,
) -> Result<Option<Orchestrator>> {
    match guard.try_acquire()? {
        crate::guard::AcquireOutcome::Busy => Ok(None),
        crate::guard::AcquireOutcome::Acquired => Ok(Some(Orchestrator::new(
            config,
            store,
            crate::probe::create_probe(),
            RestartIntent::at_default_path(),
            Box::new(crate::restart::ProcessSpawner),
        ))),
    }
}
