//! Headless host binary for the onboarding subsystem.
//!
//! Default invocation acquires the single-instance lock, runs permission
//! onboarding to a resting phase, and exits once the startup gate opens
//! (or a restart/abort ends this process lifetime early).
//!
//! Invoked as `selkie-host relaunch-helper --delay-ms N` it becomes the
//! detached relaunch helper spawned during a restart hand-off: it waits
//! out the delay, re-checks the abort marker and the instance lock, and
//! relaunches the application only if both allow it.

use selkie::config::OnboardingConfig;
use selkie::guard::InstanceGuard;
use selkie::ledger::LedgerStore;
use selkie::orchestrator;
use selkie::phase::OnboardingPhase;
use selkie::restart::{self, RestartIntent, RestartOutcome};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    if args.next().as_deref() == Some("relaunch-helper") {
        let delay_ms = match (args.next().as_deref(), args.next()) {
            (Some("--delay-ms"), Some(ms)) => ms.parse().unwrap_or(1500),
            _ => 1500,
        };
        return run_helper(Duration::from_millis(delay_ms)).await;
    }

    run_onboarding().await
}

/// Tracing to stderr, plus a daily-rolling log file in the app log dir.
fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let file_appender =
        tracing_appender::rolling::daily(selkie::paths::logs_dir(), "selkie-host.log");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("selkie=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false),
        )
        .init();
}

async fn run_onboarding() -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "selkie-host starting");

    let config = OnboardingConfig::load_or_default(&OnboardingConfig::default_config_path())
        .map_err(|e| anyhow::anyhow!("load config: {e}"))?;
    let guard = InstanceGuard::new(selkie::paths::instance_lock_file(), config.lock_grace());
    let store = LedgerStore::at_default_path();

    let Some(mut orch) = orchestrator::acquire_and_build(config, store, &guard)? else {
        tracing::warn!("another instance is already running; exiting");
        return Ok(());
    };

    // A terminal quit records the durable abort marker, which cancels any
    // in-flight restart hand-off (the detached helper consults the marker
    // before relaunching) and aborts the run between steps.
    let intent = orch.intent().clone();
    let result = tokio::select! {
        result = orch.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("quit requested; recording abort");
            if let Err(e) = intent.request_abort() {
                tracing::error!(error = %e, "failed to record abort");
            }
            Ok(OnboardingPhase::Aborted)
        }
    };
    match result {
        Ok(OnboardingPhase::Completed) => {
            let gate = orch.gate().current();
            tracing::info!(degraded = ?gate.map(|g| g.degraded), "onboarding complete");
            guard.release();
            Ok(())
        }
        Ok(OnboardingPhase::RestartPending) => {
            // Exit promptly so the helper finds the lock released.
            tracing::info!("restart scheduled; exiting for relaunch");
            guard.release();
            Ok(())
        }
        Ok(phase) => {
            tracing::info!(phase = %phase, "onboarding ended without completion");
            guard.release();
            Ok(())
        }
        Err(e) => {
            guard.release();
            tracing::error!(error = %e, "onboarding failed");
            Err(anyhow::anyhow!("onboarding failed: {e}"))
        }
    }
}

async fn run_helper(delay: Duration) -> anyhow::Result<()> {
    tracing::info!(delay_ms = delay.as_millis() as u64, "relaunch helper starting");

    let config = OnboardingConfig::load_or_default(&OnboardingConfig::default_config_path())
        .unwrap_or_default();
    let intent = RestartIntent::at_default_path();
    let guard = InstanceGuard::new(selkie::paths::instance_lock_file(), config.lock_grace());
    let app_exe = std::env::current_exe()?;

    let outcome = restart::run_relaunch_helper(&intent, &guard, &app_exe, delay)
        .await
        .map_err(|e| anyhow::anyhow!("relaunch helper: {e}"))?;
    match outcome {
        RestartOutcome::Executed => tracing::info!("relaunch performed"),
        RestartOutcome::Aborted => tracing::info!("relaunch cancelled by user quit"),
        RestartOutcome::None => tracing::info!("relaunch skipped"),
        RestartOutcome::Scheduled => {}
    }
    Ok(())
}
