//! macOS capability probe.
//!
//! The embedding shell owns the actual TCC queries and consent dialogs and
//! overrides this probe with a full implementation over the host bridge.
//! What the core can do directly is open the System Settings privacy pane
//! for a capability, which also registers the app as a candidate in that
//! pane's list.

use super::{CapabilityProbe, ProbeStatus};
use crate::capability::CapabilityKind;
use anyhow::Context;
use std::process::Command;

/// Deep-link URL into the System Settings privacy pane for a capability.
fn settings_pane_url(kind: CapabilityKind) -> &'static str {
    match kind {
        CapabilityKind::Microphone => {
            "x-apple.systempreferences:com.apple.preference.security?Privacy_Microphone"
        }
        CapabilityKind::Camera => {
            "x-apple.systempreferences:com.apple.preference.security?Privacy_Camera"
        }
        CapabilityKind::ScreenRecording => {
            "x-apple.systempreferences:com.apple.preference.security?Privacy_ScreenCapture"
        }
        CapabilityKind::InputMonitoring => {
            "x-apple.systempreferences:com.apple.preference.security?Privacy_ListenEvent"
        }
        CapabilityKind::Accessibility => {
            "x-apple.systempreferences:com.apple.preference.security?Privacy_Accessibility"
        }
        CapabilityKind::Contacts => {
            "x-apple.systempreferences:com.apple.preference.security?Privacy_Contacts"
        }
        CapabilityKind::FullDiskAccess => {
            "x-apple.systempreferences:com.apple.preference.security?Privacy_AllFiles"
        }
        CapabilityKind::Notifications => {
            "x-apple.systempreferences:com.apple.notifications-Settings.extension"
        }
    }
}

/// Capability probe for macOS.
pub struct MacOsCapabilityProbe;

impl MacOsCapabilityProbe {
    /// Create a new macOS probe.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for MacOsCapabilityProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityProbe for MacOsCapabilityProbe {
    fn status(&self, _kind: CapabilityKind) -> anyhow::Result<ProbeStatus> {
        // TCC status queries live in the embedding shell; without it the
        // answer is always undecided.
        Ok(ProbeStatus::Undetermined)
    }

    fn request(&self, _kind: CapabilityKind) -> anyhow::Result<()> {
        // The consent dialog is shown by the OS on first real access,
        // which the embedding shell performs.
        Ok(())
    }

    fn open_settings(&self, kind: CapabilityKind) -> anyhow::Result<()> {
        let url = settings_pane_url(kind);
        Command::new("/usr/bin/open")
            .arg(url)
            .status()
            .with_context(|| format!("open settings pane for {kind}"))?;
        Ok(())
    }
}
