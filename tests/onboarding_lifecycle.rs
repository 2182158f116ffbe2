//! Integration tests: full onboarding lifecycle across simulated process
//! lifetimes.
//!
//! Each "process lifetime" is a fresh `Orchestrator` over the same ledger
//! file, exercising the end-to-end flow from the initial phase through
//! restart hand-off to final completion, verifying that state transitions
//! are persisted to disk and correctly resumed by subsequent lifetimes.

use selkie::capability::{CapabilityKind, StepState, TriggerMode};
use selkie::config::{OnboardingConfig, RestartPolicy, StepSpec};
use selkie::ledger::LedgerStore;
use selkie::orchestrator::Orchestrator;
use selkie::phase::OnboardingPhase;
use selkie::probe::ProbeStatus;
use selkie::restart::{RelaunchSpawner, RestartIntent};
use selkie::test_utils::ScriptedProbe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct CountingSpawner(Arc<AtomicUsize>);

impl RelaunchSpawner for CountingSpawner {
    fn spawn_helper(&self, _delay: Duration) -> selkie::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn spec(kind: CapabilityKind, trigger: TriggerMode, hard: bool) -> StepSpec {
    StepSpec {
        kind,
        trigger,
        // One-second budgets keep timeout paths fast with millisecond polls.
        timeout_secs: 1,
        hard,
    }
}

fn fast_config(steps: Vec<StepSpec>, advance_on_timeout: bool) -> OnboardingConfig {
    OnboardingConfig {
        steps,
        advance_on_timeout,
        inter_step_pause_ms: 1,
        poll_interval_ms: 1,
        lock_grace_secs: 1,
        relaunch_delay_ms: 1,
        restart_policy: RestartPolicy::OnDemand,
    }
}

struct Lifetime {
    orchestrator: Orchestrator,
    spawns: Arc<AtomicUsize>,
}

/// Build one simulated process lifetime over the shared temp dir.
fn lifetime(dir: &tempfile::TempDir, config: OnboardingConfig, probe: ScriptedProbe) -> Lifetime {
    let spawns = Arc::new(AtomicUsize::new(0));
    let orchestrator = Orchestrator::new(
        config,
        LedgerStore::new(dir.path().join("onboarding.json")),
        Box::new(probe),
        RestartIntent::new(dir.path().join("restart-abort.marker")),
        Box::new(CountingSpawner(Arc::clone(&spawns))),
    );
    Lifetime {
        orchestrator,
        spawns,
    }
}

fn load_ledger(dir: &tempfile::TempDir) -> selkie::Ledger {
    LedgerStore::new(dir.path().join("onboarding.json"))
        .load()
        .expect("load ledger")
        .expect("ledger exists")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// The canonical mixed-outcome scenario: mic granted, screen times out
/// under advance-on-timeout, accessibility needs a restart. Phase sequence
/// must be init → running_steps → restart_pending → post_restart_verify →
/// completed with exactly one restart.
#[tokio::test]
async fn mixed_outcomes_drive_full_phase_sequence() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = fast_config(
        vec![
            spec(CapabilityKind::Microphone, TriggerMode::Interactive, true),
            spec(CapabilityKind::ScreenRecording, TriggerMode::Interactive, false),
            spec(CapabilityKind::Accessibility, TriggerMode::SettingsOnly, false),
        ],
        true,
    );

    // Lifetime 1: mic grants, screen never settles (timeout → granted via
    // policy), accessibility registers in the settings pane.
    let probe = ScriptedProbe::new(ProbeStatus::Undetermined)
        .script(CapabilityKind::Microphone, &[ProbeStatus::Granted])
        .script(CapabilityKind::Accessibility, &[ProbeStatus::NeedsSettings]);
    let mut first = lifetime(&dir, config.clone(), probe);
    let phase = first.orchestrator.run().await.expect("first lifetime");

    assert_eq!(phase, OnboardingPhase::RestartPending);
    assert_eq!(first.spawns.load(Ordering::SeqCst), 1);

    let ledger = load_ledger(&dir);
    assert_eq!(ledger.phase, OnboardingPhase::RestartPending);
    assert_eq!(ledger.restart_count, 1);
    assert_eq!(
        ledger.step(CapabilityKind::Microphone).unwrap().state,
        StepState::Granted
    );
    assert_eq!(
        ledger.step(CapabilityKind::ScreenRecording).unwrap().state,
        StepState::Granted,
        "advance-on-timeout settles as granted"
    );
    assert_eq!(
        ledger.step(CapabilityKind::Accessibility).unwrap().state,
        StepState::NeedsRestart
    );

    // Lifetime 2: post-restart process verifies accessibility now granted.
    let probe = ScriptedProbe::new(ProbeStatus::Undetermined)
        .script(CapabilityKind::Accessibility, &[ProbeStatus::Granted]);
    let mut second = lifetime(&dir, config, probe);
    let phase = second.orchestrator.run().await.expect("second lifetime");

    assert_eq!(phase, OnboardingPhase::Completed);
    assert_eq!(second.spawns.load(Ordering::SeqCst), 0, "at most one restart");

    let ledger = load_ledger(&dir);
    assert_eq!(ledger.phase, OnboardingPhase::Completed);
    assert_eq!(ledger.restart_count, 1);
    assert_eq!(
        ledger.step(CapabilityKind::Accessibility).unwrap().state,
        StepState::Granted
    );

    let signal = second.orchestrator.gate().current().expect("gate open");
    assert!(signal.is_fully_granted());
}

#[tokio::test]
async fn strict_timeout_leaves_capability_unresolved() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = fast_config(
        vec![spec(CapabilityKind::ScreenRecording, TriggerMode::Interactive, false)],
        false,
    );
    let probe = ScriptedProbe::new(ProbeStatus::Undetermined);
    let mut run = lifetime(&dir, config, probe);

    let phase = run.orchestrator.run().await.expect("run");
    assert_eq!(phase, OnboardingPhase::Completed);

    let ledger = load_ledger(&dir);
    assert_eq!(
        ledger.step(CapabilityKind::ScreenRecording).unwrap().state,
        StepState::TimedOut
    );
    // Soft capability: unresolved but not degraded.
    let signal = run.orchestrator.gate().current().expect("gate open");
    assert!(signal.is_fully_granted());
}

#[tokio::test]
async fn hard_timeout_opens_gate_degraded() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = fast_config(
        vec![spec(CapabilityKind::Microphone, TriggerMode::Interactive, true)],
        false,
    );
    let probe = ScriptedProbe::new(ProbeStatus::Undetermined);
    let mut run = lifetime(&dir, config, probe);

    let phase = run.orchestrator.run().await.expect("run");
    assert_eq!(phase, OnboardingPhase::Completed, "degraded, not failed");

    let signal = run.orchestrator.gate().current().expect("gate open");
    assert_eq!(signal.degraded, vec![CapabilityKind::Microphone]);
}

#[tokio::test]
async fn completed_ledger_short_circuits_with_reannouncement() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = fast_config(
        vec![spec(CapabilityKind::Microphone, TriggerMode::Interactive, true)],
        false,
    );
    let probe = ScriptedProbe::new(ProbeStatus::Granted);
    let mut first = lifetime(&dir, config.clone(), probe.clone());
    first.orchestrator.run().await.expect("first run");
    let before = load_ledger(&dir);

    // Re-entry: probe would deny everything, but must never be consulted.
    let probe = ScriptedProbe::new(ProbeStatus::Denied);
    let mut second = lifetime(&dir, config, probe.clone());
    let phase = second.orchestrator.run().await.expect("re-entry");

    assert_eq!(phase, OnboardingPhase::Completed);
    assert!(second.orchestrator.gate().current().is_some());
    assert!(probe.requested().is_empty(), "no step re-run on re-entry");

    let after = load_ledger(&dir);
    assert_eq!(after.restart_count, before.restart_count);
    let before_states: Vec<_> = before.steps.iter().map(|s| s.state).collect();
    let after_states: Vec<_> = after.steps.iter().map(|s| s.state).collect();
    assert_eq!(after_states, before_states);
}

#[tokio::test]
async fn gate_waits_until_completion() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = fast_config(
        vec![spec(CapabilityKind::Microphone, TriggerMode::Interactive, true)],
        false,
    );
    let probe = ScriptedProbe::new(ProbeStatus::Granted);
    let mut run = lifetime(&dir, config, probe);

    let mut gate = run.orchestrator.gate();
    assert!(gate.current().is_none(), "gate closed before run");

    run.orchestrator.run().await.expect("run");
    let signal = gate.wait_ready().await.expect("gate opens");
    assert!(signal.is_fully_granted());
}

#[tokio::test]
async fn after_hard_settled_policy_owes_restart_without_needs_restart() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = fast_config(
        vec![spec(CapabilityKind::Microphone, TriggerMode::Interactive, true)],
        false,
    );
    config.restart_policy = RestartPolicy::AfterHardSettled;

    let probe = ScriptedProbe::new(ProbeStatus::Granted);
    let mut first = lifetime(&dir, config.clone(), probe);
    let phase = first.orchestrator.run().await.expect("run");

    assert_eq!(phase, OnboardingPhase::RestartPending);
    assert_eq!(first.spawns.load(Ordering::SeqCst), 1);
    assert_eq!(load_ledger(&dir).restart_count, 1);

    // Post-restart lifetime completes without another relaunch.
    let probe = ScriptedProbe::new(ProbeStatus::Granted);
    let mut second = lifetime(&dir, config, probe);
    assert_eq!(
        second.orchestrator.run().await.expect("second run"),
        OnboardingPhase::Completed
    );
    assert_eq!(second.spawns.load(Ordering::SeqCst), 0);
    assert_eq!(load_ledger(&dir).restart_count, 1);
}
