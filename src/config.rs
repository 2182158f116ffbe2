//! Onboarding configuration: the ordered capability table and policy knobs.
//!
//! The capability order is itself configuration — steps run strictly in
//! table order so OS consent dialogs never overlap. Unknown capability
//! kinds and duplicate entries are rejected when the config is loaded,
//! never at runtime.

use crate::capability::{CapabilityKind, TriggerMode};
use crate::error::{OnboardingError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One row of the configured capability table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Which capability to acquire.
    pub kind: CapabilityKind,
    /// How the consent flow is triggered.
    pub trigger: TriggerMode,
    /// Wait budget for this step, in seconds.
    pub timeout_secs: u64,
    /// Whether the app is degraded if this capability is ultimately denied.
    pub hard: bool,
}

/// When the orchestrator owes a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Restart only when some step settled as `needs_restart`.
    #[default]
    OnDemand,
    /// Additionally owe a restart once every hard capability is settled,
    /// even if no step explicitly asked for one.
    AfterHardSettled,
}

/// Top-level onboarding configuration.
///
/// Serializes to `config.toml` in the app config directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnboardingConfig {
    /// Ordered capability table; insertion order is execution order.
    pub steps: Vec<StepSpec>,
    /// Policy for a step that does not settle within its wait budget:
    /// `true` treats it as granted ("advance-on-timeout"), `false` marks it
    /// `timed_out` and leaves the capability unresolved.
    ///
    /// This is an explicit switch; the strict behavior is the default and
    /// the optimistic behavior is never silently assumed.
    pub advance_on_timeout: bool,
    /// Pause between consecutive steps, so consent dialogs never overlap.
    pub inter_step_pause_ms: u64,
    /// Probe polling interval while waiting for a step to settle.
    pub poll_interval_ms: u64,
    /// Grace window for young or corrupt instance-lock files.
    pub lock_grace_secs: u64,
    /// Delay the detached helper waits before relaunching, so the current
    /// process can exit and release the instance lock first.
    pub relaunch_delay_ms: u64,
    /// When a restart is owed.
    pub restart_policy: RestartPolicy,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            steps: vec![
                StepSpec {
                    kind: CapabilityKind::Microphone,
                    trigger: TriggerMode::Interactive,
                    timeout_secs: 120,
                    hard: true,
                },
                StepSpec {
                    kind: CapabilityKind::ScreenRecording,
                    trigger: TriggerMode::Interactive,
                    timeout_secs: 120,
                    hard: false,
                },
                StepSpec {
                    kind: CapabilityKind::InputMonitoring,
                    trigger: TriggerMode::SettingsOnly,
                    timeout_secs: 60,
                    hard: true,
                },
                StepSpec {
                    kind: CapabilityKind::Accessibility,
                    trigger: TriggerMode::SettingsOnly,
                    timeout_secs: 60,
                    hard: false,
                },
                StepSpec {
                    kind: CapabilityKind::Contacts,
                    trigger: TriggerMode::Interactive,
                    timeout_secs: 60,
                    hard: false,
                },
                StepSpec {
                    kind: CapabilityKind::FullDiskAccess,
                    trigger: TriggerMode::SettingsOnly,
                    timeout_secs: 60,
                    hard: false,
                },
            ],
            advance_on_timeout: false,
            inter_step_pause_ms: 750,
            poll_interval_ms: 500,
            lock_grace_secs: 10,
            relaunch_delay_ms: 1500,
            restart_policy: RestartPolicy::OnDemand,
        }
    }
}

impl OnboardingConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields, then validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| OnboardingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or fall back to defaults if no config file exists
    /// yet.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or is invalid.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot
    /// be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| OnboardingError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the capability table: no duplicate kinds, no zero wait
    /// budgets, at least one step.
    ///
    /// # Errors
    ///
    /// Returns [`OnboardingError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(OnboardingError::Config(
                "capability table is empty".to_owned(),
            ));
        }
        let mut seen: Vec<CapabilityKind> = Vec::with_capacity(self.steps.len());
        for spec in &self.steps {
            if seen.contains(&spec.kind) {
                return Err(OnboardingError::Config(format!(
                    "duplicate capability in table: {}",
                    spec.kind
                )));
            }
            if spec.timeout_secs == 0 {
                return Err(OnboardingError::Config(format!(
                    "capability {} has a zero wait budget",
                    spec.kind
                )));
            }
            seen.push(spec.kind);
        }
        Ok(())
    }

    /// Returns the default config file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::paths::config_file()
    }

    /// Inter-step pause as a [`Duration`].
    #[must_use]
    pub fn inter_step_pause(&self) -> Duration {
        Duration::from_millis(self.inter_step_pause_ms)
    }

    /// Probe polling interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Instance-lock grace window as a [`Duration`].
    #[must_use]
    pub fn lock_grace(&self) -> Duration {
        Duration::from_secs(self.lock_grace_secs)
    }

    /// Relaunch-helper delay as a [`Duration`].
    #[must_use]
    pub fn relaunch_delay(&self) -> Duration {
        Duration::from_millis(self.relaunch_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = OnboardingConfig::default();
        config.validate().expect("default config should validate");
        assert!(!config.steps.is_empty());
        assert!(!config.advance_on_timeout, "strict timeout is the default");
        assert_eq!(config.restart_policy, RestartPolicy::OnDemand);
    }

    #[test]
    fn default_order_starts_with_microphone() {
        let config = OnboardingConfig::default();
        assert_eq!(config.steps[0].kind, CapabilityKind::Microphone);
        assert!(config.steps[0].hard);
    }

    #[test]
    fn duplicate_kind_rejected() {
        let mut config = OnboardingConfig::default();
        config.steps.push(StepSpec {
            kind: CapabilityKind::Microphone,
            trigger: TriggerMode::Interactive,
            timeout_secs: 30,
            hard: false,
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"), "{err}");
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = OnboardingConfig::default();
        config.steps[0].timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("zero wait budget"), "{err}");
    }

    #[test]
    fn empty_table_rejected() {
        let config = OnboardingConfig {
            steps: vec![],
            ..OnboardingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");

        let mut config = OnboardingConfig::default();
        config.advance_on_timeout = true;
        config.restart_policy = RestartPolicy::AfterHardSettled;
        config.save_to_file(&path).expect("save config");

        let loaded = OnboardingConfig::from_file(&path).expect("load config");
        assert!(loaded.advance_on_timeout);
        assert_eq!(loaded.restart_policy, RestartPolicy::AfterHardSettled);
        assert_eq!(loaded.steps.len(), config.steps.len());
    }

    #[test]
    fn unknown_capability_kind_rejected_at_load() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[[steps]]
kind = "telepathy"
trigger = "interactive"
timeout_secs = 30
hard = false
"#,
        )
        .expect("write config");

        let err = OnboardingConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, OnboardingError::Config(_)), "{err}");
    }

    #[test]
    fn load_or_default_without_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("missing.toml");
        let config = OnboardingConfig::load_or_default(&path).expect("fallback to defaults");
        assert_eq!(config.steps.len(), OnboardingConfig::default().steps.len());
    }
}
