//! Shared test utilities used across unit and integration tests.
//!
//! The onboarding flow is exercised headlessly with a [`ScriptedProbe`]
//! that answers capability queries from a pre-programmed script instead of
//! talking to the OS.

use crate::capability::CapabilityKind;
use crate::probe::{CapabilityProbe, ProbeStatus};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Create a unique temporary directory for test isolation.
///
/// The directory name includes `prefix`, the process ID, and a nanosecond
/// timestamp so parallel tests never collide.
pub fn temp_test_root(prefix: &str, name: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let dir = std::env::temp_dir().join(format!(
        "selkie-{prefix}-{name}-{}-{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).expect("create temp test dir");
    dir
}

/// A capability probe that answers from a per-capability script.
///
/// Each `status()` call consumes the next scripted answer; the final answer
/// is sticky. Capabilities without a script answer with the configured
/// default. Every `request` and `open_settings` call is recorded for
/// assertions.
///
/// Clones share state, so a test can hand one clone to the orchestrator
/// and keep another for assertions.
#[derive(Clone)]
pub struct ScriptedProbe {
    inner: Arc<ScriptedProbeInner>,
}

struct ScriptedProbeInner {
    scripts: Mutex<HashMap<CapabilityKind, VecDeque<ProbeStatus>>>,
    default: ProbeStatus,
    requests: Mutex<Vec<CapabilityKind>>,
    settings_opens: Mutex<Vec<CapabilityKind>>,
}

impl ScriptedProbe {
    /// Create a probe whose unscripted answer is `default`.
    #[must_use]
    pub fn new(default: ProbeStatus) -> Self {
        Self {
            inner: Arc::new(ScriptedProbeInner {
                scripts: Mutex::new(HashMap::new()),
                default,
                requests: Mutex::new(Vec::new()),
                settings_opens: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Script the sequence of answers for one capability (builder-style).
    #[must_use]
    pub fn script(self, kind: CapabilityKind, answers: &[ProbeStatus]) -> Self {
        self.inner
            .scripts
            .lock()
            .expect("scripts lock")
            .insert(kind, answers.iter().copied().collect());
        self
    }

    /// Capabilities that have been requested, in call order.
    pub fn requested(&self) -> Vec<CapabilityKind> {
        self.inner.requests.lock().expect("requests lock").clone()
    }

    /// Capabilities whose settings pane was opened, in call order.
    pub fn settings_opened(&self) -> Vec<CapabilityKind> {
        self.inner.settings_opens.lock().expect("settings lock").clone()
    }
}

impl CapabilityProbe for ScriptedProbe {
    fn status(&self, kind: CapabilityKind) -> anyhow::Result<ProbeStatus> {
        let mut scripts = self.inner.scripts.lock().expect("scripts lock");
        let Some(queue) = scripts.get_mut(&kind) else {
            return Ok(self.inner.default);
        };
        match queue.len() {
            0 => Ok(self.inner.default),
            1 => Ok(queue[0]),
            _ => Ok(queue.pop_front().expect("non-empty queue")),
        }
    }

    fn request(&self, kind: CapabilityKind) -> anyhow::Result<()> {
        self.inner.requests.lock().expect("requests lock").push(kind);
        Ok(())
    }

    fn open_settings(&self, kind: CapabilityKind) -> anyhow::Result<()> {
        self.inner
            .settings_opens
            .lock()
            .expect("settings lock")
            .push(kind);
        Ok(())
    }
}
