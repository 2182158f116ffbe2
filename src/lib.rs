//! Selkie: desktop assistant client — permission onboarding and restart
//! orchestration.
//!
//! This crate acquires a fixed, configured set of OS-level capability
//! grants (microphone, screen recording, accessibility, …) on first run,
//! persists progress durably across process restarts, and coordinates at
//! most one automatic application restart so newly granted capabilities
//! take effect.
//!
//! # Architecture
//!
//! - **Probe** ([`probe`]): queries/requests a single named capability
//!   through a platform trait; consent dialogs belong to the OS.
//! - **Ledger** ([`ledger`]): durable, atomically-written record of
//!   per-capability state and overall phase; the single source of truth.
//! - **Instance guard** ([`guard`]): file-backed mutual exclusion between
//!   application instances, with a grace window for write races.
//! - **Step runner** ([`step_runner`]): drives one capability through
//!   trigger → bounded wait → settle.
//! - **Orchestrator** ([`orchestrator`]): sequences steps, owns phase
//!   transitions, publishes the startup gate.
//! - **Restart** ([`restart`]): the single-shot, cancellable relaunch
//!   protocol and its detached helper.

pub mod capability;
pub mod config;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod orchestrator;
pub mod paths;
pub mod phase;
pub mod probe;
pub mod restart;
pub mod step_runner;
#[doc(hidden)]
pub mod test_utils;

pub use capability::{CapabilityKind, CapabilityStep, StepState, TriggerMode};
pub use config::{OnboardingConfig, RestartPolicy, StepSpec};
pub use error::{OnboardingError, Result};
pub use guard::{AcquireOutcome, InstanceGuard, InstanceLock};
pub use ledger::{Ledger, LedgerStore};
pub use orchestrator::{GateSignal, Orchestrator, StartupGate};
pub use phase::OnboardingPhase;
pub use probe::{CapabilityProbe, ProbeStatus};
pub use restart::{RestartCoordinator, RestartIntent, RestartOutcome};
pub use step_runner::{ReasonCode, StepOutcome, StepRunner};
