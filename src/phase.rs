//! Onboarding phase state machine.
//!
//! The orchestrator moves the persisted ledger through these phases:
//!
//! ```text
//! Init → RunningSteps → RestartPending → PostRestartVerify → Completed
//! ```
//!
//! `Aborted` is reachable from any non-terminal phase when a user-initiated
//! quit is observed. All other transitions are strictly forward; a ledger
//! loaded from disk can never be moved backwards.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The phases of the permission onboarding flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingPhase {
    /// Ledger loaded; deciding where to resume.
    #[default]
    Init,
    /// Driving capability steps in configured order.
    RunningSteps,
    /// All steps settled; a restart is owed and not yet performed.
    RestartPending,
    /// Fresh process after the restart; confirming restart efficacy.
    PostRestartVerify,
    /// Onboarding finished; completion signal published.
    Completed,
    /// User quit mid-flow; no further mutation except recording the abort.
    Aborted,
}

impl OnboardingPhase {
    /// Whether this phase ends the onboarding flow.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Whether moving from `self` to `to` is a legal transition.
    ///
    /// Phases only advance forward; `Aborted` is reachable from any
    /// non-terminal phase; re-asserting the current phase is allowed
    /// (idempotent persistence after a crash-resume).
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        if self == to {
            return true;
        }
        if to == Self::Aborted {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Self::Init, Self::RunningSteps)
                | (Self::Init, Self::RestartPending)
                | (Self::Init, Self::PostRestartVerify)
                | (Self::Init, Self::Completed)
                | (Self::RunningSteps, Self::RestartPending)
                | (Self::RunningSteps, Self::Completed)
                | (Self::RestartPending, Self::PostRestartVerify)
                | (Self::PostRestartVerify, Self::Completed)
        )
    }

    /// Return the canonical wire-format string for this phase.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::RunningSteps => "running_steps",
            Self::RestartPending => "restart_pending",
            Self::PostRestartVerify => "post_restart_verify",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }

    /// Parse a phase from its wire-format string.
    ///
    /// Returns `None` if the input does not match any known phase.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "init" => Some(Self::Init),
            "running_steps" => Some(Self::RunningSteps),
            "restart_pending" => Some(Self::RestartPending),
            "post_restart_verify" => Some(Self::PostRestartVerify),
            "completed" => Some(Self::Completed),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }
}

impl fmt::Display for OnboardingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
