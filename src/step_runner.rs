//! Drives one capability through its acquisition state machine:
//! trigger → bounded wait → settle.
//!
//! Two trigger modes exist. An *interactive* capability gets an in-app OS
//! consent dialog: the runner issues the request, then polls the probe
//! until the capability settles or the wait budget elapses. A
//! *settings-only* capability has no dialog: the runner opens the OS
//! settings pane once, issues a best-effort pre-probe so the app registers
//! as a candidate in that pane, and settles as soon as the registration is
//! visible — not necessarily as `granted`.
//!
//! Every terminal transition is persisted to the ledger before the runner
//! returns, so a crash between steps loses at most the in-flight step.

use crate::capability::{CapabilityKind, StepState, TriggerMode, epoch_seconds};
use crate::error::Result;
use crate::ledger::{Ledger, LedgerStore};
use crate::probe::{CapabilityProbe, ProbeStatus};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why a step settled in its final state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonCode {
    /// The OS reported the capability granted.
    Granted,
    /// The user explicitly denied the capability.
    Denied,
    /// The grant only takes effect after an app restart.
    RestartRequired,
    /// Registered in the settings pane; grant pending user action there.
    SettingsPending,
    /// The wait budget elapsed with no decision.
    TimedOut,
    /// The wait budget elapsed and the advance-on-timeout policy treated
    /// the capability as granted.
    TimedOutAdvanced,
}

/// Final state and reason for one completed step run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    /// The state the step settled in.
    pub state: StepState,
    /// Why it settled there.
    pub reason: ReasonCode,
}

/// Runs one capability step against a probe, persisting progress.
pub struct StepRunner<'a> {
    probe: &'a dyn CapabilityProbe,
    /// Treat an expired wait budget as granted instead of `timed_out`.
    advance_on_timeout: bool,
    poll_interval: Duration,
}

impl<'a> StepRunner<'a> {
    /// Create a runner over the given probe and policy.
    #[must_use]
    pub fn new(
        probe: &'a dyn CapabilityProbe,
        advance_on_timeout: bool,
        poll_interval: Duration,
    ) -> Self {
        Self {
            probe,
            advance_on_timeout,
            poll_interval,
        }
    }

    /// Drive the step for `kind` to a settled state.
    ///
    /// Mutates the step inside `ledger` and persists through `store` after
    /// the trigger and after the final transition. The wait is bounded by
    /// `timeout`; there is no unbounded block.
    ///
    /// # Errors
    ///
    /// Returns an error only when the ledger cannot be persisted
    /// ([`crate::error::OnboardingError::Ledger`]); the previous persisted
    /// state remains authoritative and the step is treated as not run.
    pub async fn run(
        &self,
        ledger: &mut Ledger,
        store: &LedgerStore,
        kind: CapabilityKind,
        timeout: Duration,
    ) -> Result<StepOutcome> {
        let trigger = {
            let Some(step) = ledger.step_mut(kind) else {
                return Err(crate::error::OnboardingError::Ledger(format!(
                    "no ledger step for capability {kind}"
                )));
            };
            let now = epoch_seconds();
            step.state = StepState::Triggered;
            step.triggered_at = Some(now);
            step.deadline_at = Some(now + timeout.as_secs());
            step.trigger
        };
        store.save(ledger)?;

        info!(kind = %kind, trigger = %trigger, "capability step triggered");
        let outcome = match trigger {
            TriggerMode::Interactive => self.run_interactive(kind, timeout).await,
            TriggerMode::SettingsOnly => self.run_settings_only(kind, timeout).await,
        };

        if let Some(step) = ledger.step_mut(kind) {
            step.state = outcome.state;
        }
        store.save(ledger)?;
        info!(kind = %kind, state = %outcome.state, reason = ?outcome.reason, "capability step settled");
        Ok(outcome)
    }

    /// Issue the consent-dialog request and poll until settle or deadline.
    async fn run_interactive(&self, kind: CapabilityKind, timeout: Duration) -> StepOutcome {
        if let Err(e) = self.probe.request(kind) {
            warn!(kind = %kind, error = %e, "capability request failed; polling anyway");
        }

        let deadline = Instant::now() + timeout;
        loop {
            match self.probe.status(kind) {
                Ok(ProbeStatus::Granted) => {
                    return StepOutcome {
                        state: StepState::Granted,
                        reason: ReasonCode::Granted,
                    };
                }
                Ok(ProbeStatus::Denied) => {
                    return StepOutcome {
                        state: StepState::Denied,
                        reason: ReasonCode::Denied,
                    };
                }
                Ok(ProbeStatus::NeedsSettings) => {
                    // The grant path has moved outside the app; a restart
                    // is owed once the user acts there.
                    return StepOutcome {
                        state: StepState::NeedsRestart,
                        reason: ReasonCode::RestartRequired,
                    };
                }
                Ok(ProbeStatus::Undetermined) => {}
                Err(e) => {
                    warn!(kind = %kind, error = %e, "capability status query failed");
                }
            }
            if Instant::now() >= deadline {
                return self.timeout_outcome(kind);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Open the settings pane once and pre-probe until the app registers.
    async fn run_settings_only(&self, kind: CapabilityKind, timeout: Duration) -> StepOutcome {
        // Pre-probe first: the access attempt is what makes the app appear
        // as a candidate in the settings pane.
        if let Err(e) = self.probe.request(kind) {
            warn!(kind = %kind, error = %e, "pre-probe failed");
        }
        if let Err(e) = self.probe.open_settings(kind) {
            warn!(kind = %kind, error = %e, "failed to open settings pane");
        }

        let deadline = Instant::now() + timeout;
        loop {
            match self.probe.status(kind) {
                Ok(ProbeStatus::Granted) => {
                    return StepOutcome {
                        state: StepState::Granted,
                        reason: ReasonCode::Granted,
                    };
                }
                Ok(ProbeStatus::Denied) => {
                    return StepOutcome {
                        state: StepState::Denied,
                        reason: ReasonCode::Denied,
                    };
                }
                Ok(ProbeStatus::NeedsSettings) => {
                    // Registered in the pane. The toggle itself happens
                    // outside the app and takes effect after relaunch.
                    debug!(kind = %kind, "registered in settings pane");
                    return StepOutcome {
                        state: StepState::NeedsRestart,
                        reason: ReasonCode::SettingsPending,
                    };
                }
                Ok(ProbeStatus::Undetermined) => {}
                Err(e) => {
                    warn!(kind = %kind, error = %e, "pre-probe status query failed");
                }
            }
            if Instant::now() >= deadline {
                return self.timeout_outcome(kind);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn timeout_outcome(&self, kind: CapabilityKind) -> StepOutcome {
        if self.advance_on_timeout {
            warn!(kind = %kind, "wait budget elapsed; advance-on-timeout treats as granted");
            StepOutcome {
                state: StepState::Granted,
                reason: ReasonCode::TimedOutAdvanced,
            }
        } else {
            warn!(kind = %kind, "wait budget elapsed; capability unresolved");
            StepOutcome {
                state: StepState::TimedOut,
                reason: ReasonCode::TimedOut,
            }
        }
    }
}
