//! Capability kinds and per-capability onboarding step records.
//!
//! Each OS-mediated permission (microphone, screen recording, etc.) is
//! represented by a [`CapabilityKind`] variant — a closed set, so unknown
//! capability names are rejected at configuration-load time, not at runtime.
//! A [`CapabilityStep`] tracks one capability's progress through the
//! onboarding state machine and is persisted in the ledger.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A system capability the assistant requests access to during onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Microphone access for voice input (required for core functionality).
    Microphone,
    /// Camera access for visual features.
    Camera,
    /// Screen recording for screen-aware assistance.
    ScreenRecording,
    /// Input monitoring for global hotkeys.
    InputMonitoring,
    /// Accessibility for desktop automation.
    Accessibility,
    /// Apple Contacts for personalization (name, email).
    Contacts,
    /// Full-disk access for document features.
    FullDiskAccess,
    /// Notification delivery permission.
    Notifications,
}

impl CapabilityKind {
    /// Return all capability variants.
    pub fn all() -> &'static [CapabilityKind] {
        &[
            CapabilityKind::Microphone,
            CapabilityKind::Camera,
            CapabilityKind::ScreenRecording,
            CapabilityKind::InputMonitoring,
            CapabilityKind::Accessibility,
            CapabilityKind::Contacts,
            CapabilityKind::FullDiskAccess,
            CapabilityKind::Notifications,
        ]
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CapabilityKind::Microphone => "microphone",
            CapabilityKind::Camera => "camera",
            CapabilityKind::ScreenRecording => "screen_recording",
            CapabilityKind::InputMonitoring => "input_monitoring",
            CapabilityKind::Accessibility => "accessibility",
            CapabilityKind::Contacts => "contacts",
            CapabilityKind::FullDiskAccess => "full_disk_access",
            CapabilityKind::Notifications => "notifications",
        };
        f.write_str(s)
    }
}

impl FromStr for CapabilityKind {
    type Err = CapabilityParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "microphone" => Ok(CapabilityKind::Microphone),
            "camera" => Ok(CapabilityKind::Camera),
            "screen_recording" | "screenrecording" => Ok(CapabilityKind::ScreenRecording),
            "input_monitoring" | "inputmonitoring" => Ok(CapabilityKind::InputMonitoring),
            "accessibility" => Ok(CapabilityKind::Accessibility),
            "contacts" => Ok(CapabilityKind::Contacts),
            "full_disk_access" | "fulldiskaccess" => Ok(CapabilityKind::FullDiskAccess),
            "notifications" => Ok(CapabilityKind::Notifications),
            _ => Err(CapabilityParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an unknown capability kind string.
#[derive(Debug, Clone)]
pub struct CapabilityParseError(pub String);

impl fmt::Display for CapabilityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown capability kind: {:?}", self.0)
    }
}

impl std::error::Error for CapabilityParseError {}

/// How a capability's consent flow is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// The OS shows an in-app consent dialog when the capability is requested.
    Interactive,
    /// No consent dialog exists; the only grant path is a manual toggle in
    /// the OS settings pane.
    SettingsOnly,
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerMode::Interactive => "interactive",
            TriggerMode::SettingsOnly => "settings_only",
        })
    }
}

/// Per-capability state within the onboarding state machine.
///
/// `NeedsRestart` is a non-terminal signal consumed by the orchestrator;
/// every other non-`Unknown`/`Triggered` state is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Not yet attempted.
    #[default]
    Unknown,
    /// Request issued; waiting for the capability to settle.
    Triggered,
    /// Granted by the user (or already granted on a previous run).
    Granted,
    /// Explicitly denied by the user.
    Denied,
    /// Granted in a way that only takes effect after an app restart.
    NeedsRestart,
    /// Did not settle within the step's wait budget.
    TimedOut,
    /// Skipped by configuration or policy.
    Skipped,
}

impl StepState {
    /// Whether this state ends the step's lifecycle.
    ///
    /// `NeedsRestart` is deliberately non-terminal: the post-restart
    /// verification pass re-checks it.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepState::Granted | StepState::Denied | StepState::TimedOut | StepState::Skipped
        )
    }

    /// Whether this state means the step no longer needs to be run
    /// during `running_steps` (terminal, or waiting on a restart).
    #[must_use]
    pub fn is_settled(self) -> bool {
        self.is_terminal() || self == StepState::NeedsRestart
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepState::Unknown => "unknown",
            StepState::Triggered => "triggered",
            StepState::Granted => "granted",
            StepState::Denied => "denied",
            StepState::NeedsRestart => "needs_restart",
            StepState::TimedOut => "timed_out",
            StepState::Skipped => "skipped",
        })
    }
}

/// One capability's onboarding record, persisted in the ledger.
///
/// Created with [`StepState::Unknown`] when first referenced; mutated only
/// by the step runner that owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityStep {
    /// Which capability this step covers.
    pub kind: CapabilityKind,
    /// How the consent flow is triggered.
    pub trigger: TriggerMode,
    /// Current FSM state.
    #[serde(default)]
    pub state: StepState,
    /// Epoch seconds when the request was issued.
    #[serde(default)]
    pub triggered_at: Option<u64>,
    /// Epoch seconds bounding the wait window.
    #[serde(default)]
    pub deadline_at: Option<u64>,
    /// Whether this capability blocks app functionality if ultimately denied.
    pub hard: bool,
}

impl CapabilityStep {
    /// Create a fresh, unattempted step.
    #[must_use]
    pub fn new(kind: CapabilityKind, trigger: TriggerMode, hard: bool) -> Self {
        Self {
            kind,
            trigger,
            state: StepState::Unknown,
            triggered_at: None,
            deadline_at: None,
            hard,
        }
    }

    /// Whether this hard capability ended unresolved (denied or timed out).
    ///
    /// Drives the degraded-mode decision: a hard capability that ends here
    /// degrades the app instead of failing onboarding outright.
    #[must_use]
    pub fn is_hard_unresolved(&self) -> bool {
        self.hard && matches!(self.state, StepState::Denied | StepState::TimedOut)
    }
}

/// Current epoch time in seconds (returns 0 on clock error).
#[must_use]
pub fn epoch_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
