//! Error types for the onboarding subsystem.

/// Top-level error type for permission onboarding and restart orchestration.
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    /// Ledger could not be read, parsed, or written. The last persisted
    /// ledger on disk remains authoritative.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Configuration is missing, malformed, or fails validation.
    #[error("config error: {0}")]
    Config(String),

    /// Instance lock file could not be read or written.
    #[error("instance lock error: {0}")]
    Lock(String),

    /// Restart sequence failure (helper spawn, marker I/O).
    #[error("restart error: {0}")]
    Restart(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, OnboardingError>;
