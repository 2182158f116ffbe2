//! Platform-specific capability probing.
//!
//! Provides a cross-platform [`CapabilityProbe`] trait for querying and
//! requesting OS-mediated permissions. On macOS the native consent dialogs
//! and TCC checks live in the embedding shell; the probe here handles what
//! the core can do directly (opening System Settings panes). On other
//! platforms a permissive stub is used.

use crate::capability::CapabilityKind;
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(not(target_os = "macos"))]
mod stub;
// Re-export stub for tests on all platforms.
#[cfg(test)]
#[cfg(target_os = "macos")]
#[path = "stub.rs"]
mod stub;

/// Result of querying one capability's grant status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    /// The capability is granted and usable now.
    Granted,
    /// The user explicitly denied the capability.
    Denied,
    /// No decision has been recorded yet.
    Undetermined,
    /// The capability can only be granted from the OS settings pane; the
    /// app is registered there awaiting user action.
    NeedsSettings,
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProbeStatus::Granted => "granted",
            ProbeStatus::Denied => "denied",
            ProbeStatus::Undetermined => "undetermined",
            ProbeStatus::NeedsSettings => "needs_settings",
        })
    }
}

/// Queries and requests a single named OS capability.
///
/// The probe is an external collaborator: the orchestrator never reasons
/// about individual capability semantics, only about the four
/// [`ProbeStatus`] answers.
pub trait CapabilityProbe: Send + Sync {
    /// Query the current grant status without prompting the user.
    fn status(&self, kind: CapabilityKind) -> anyhow::Result<ProbeStatus>;

    /// Issue the capability request. For interactive capabilities this is
    /// what makes the OS show its consent dialog; for settings-only
    /// capabilities this is the best-effort pre-probe that registers the
    /// app as a candidate in the settings list.
    fn request(&self, kind: CapabilityKind) -> anyhow::Result<()>;

    /// Open the OS settings pane where the user can toggle this capability.
    fn open_settings(&self, kind: CapabilityKind) -> anyhow::Result<()>;
}

/// Create the platform-appropriate capability probe.
///
/// Returns a macOS implementation on Apple platforms, or a permissive stub
/// on all other platforms (no TCC-style gating exists there).
pub fn create_probe() -> Box<dyn CapabilityProbe> {
    #[cfg(target_os = "macos")]
    {
        Box::new(macos::MacOsCapabilityProbe::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        Box::new(stub::StubCapabilityProbe)
    }
}
