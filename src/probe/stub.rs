//! Permissive no-op probe for platforms without OS-level capability gating.

use super::{CapabilityProbe, ProbeStatus};
use crate::capability::CapabilityKind;

/// Probe used on platforms where capabilities are not OS-gated.
///
/// Everything reports granted so onboarding completes immediately.
pub struct StubCapabilityProbe;

impl CapabilityProbe for StubCapabilityProbe {
    fn status(&self, _kind: CapabilityKind) -> anyhow::Result<ProbeStatus> {
        Ok(ProbeStatus::Granted)
    }

    fn request(&self, _kind: CapabilityKind) -> anyhow::Result<()> {
        Ok(())
    }

    fn open_settings(&self, _kind: CapabilityKind) -> anyhow::Result<()> {
        Ok(())
    }
}
