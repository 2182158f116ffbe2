//! Centralized application directory and file paths for Selkie.
//!
//! Provides a single source of truth for every filesystem path the
//! onboarding subsystem touches. Uses the [`dirs`] crate for
//! platform-appropriate directory resolution, which is sandbox-transparent
//! on macOS (returns container-relative paths under App Sandbox
//! automatically).
//!
//! # Application identity
//!
//! Debug builds use a separate identity (`selkie-dev`) so a development
//! invocation never shares a ledger or instance lock with the packaged
//! release build.
//!
//! # Environment Overrides
//!
//! All paths can be overridden for testing or custom deployments:
//! - `SELKIE_DATA_DIR` — overrides [`data_dir`]
//! - `SELKIE_CONFIG_DIR` — overrides [`config_dir`]

use std::path::PathBuf;

/// Application identity string, distinct between dev and release builds.
///
/// The identity is the per-app directory name under the platform data and
/// config roots, so dev and release ledgers/locks never collide.
#[must_use]
pub fn app_identity() -> &'static str {
    if cfg!(debug_assertions) {
        "selkie-dev"
    } else {
        "selkie"
    }
}

/// Application data root directory.
///
/// Holds the onboarding ledger, instance lock, restart-abort marker, and
/// logs. Resolves to `dirs::data_dir()/<identity>/` by default. Override
/// with the `SELKIE_DATA_DIR` environment variable.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("SELKIE_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join(app_identity()))
        .unwrap_or_else(|| PathBuf::from("/tmp").join(app_identity()).join("data"))
}

/// Application config directory.
///
/// Used for `config.toml`. Resolves to `dirs::config_dir()/<identity>/` by
/// default. Override with the `SELKIE_CONFIG_DIR` environment variable.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("SELKIE_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join(app_identity()))
        .unwrap_or_else(|| PathBuf::from("/tmp").join(app_identity()).join("config"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Onboarding ledger path (`data_dir()/onboarding.json`).
#[must_use]
pub fn ledger_file() -> PathBuf {
    data_dir().join("onboarding.json")
}

/// Single-instance lock path (`data_dir()/instance.lock`).
#[must_use]
pub fn instance_lock_file() -> PathBuf {
    data_dir().join("instance.lock")
}

/// Restart-abort marker path (`data_dir()/restart-abort.marker`).
///
/// Written the instant a user-initiated quit is observed; consulted by the
/// detached relaunch helper before its one irreversible action; cleared on
/// the next clean startup.
#[must_use]
pub fn abort_marker_file() -> PathBuf {
    data_dir().join("restart-abort.marker")
}
