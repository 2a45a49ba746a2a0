#![forbid(unsafe_code)]
//! Error types for raidline.
//!
//! Defines `RaidlineError` and a `Result<T>` alias used throughout the
//! workspace.

use thiserror::Error;

/// Unified error type for all raidline operations.
#[derive(Debug, Error)]
pub enum RaidlineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("array capacity exhausted")]
    CapacityExhausted,

    #[error("bus protocol violation: {0}")]
    Protocol(String),

    #[error("cache invariant violated: {0}")]
    CacheInternal(String),

    #[error("recovery failed: {0}")]
    RecoveryFailed(String),
}

impl RaidlineError {
    /// Whether the caller could plausibly retry the failed operation.
    ///
    /// Invalid arguments and exhausted capacity are permanent for a
    /// given driver state; transport and protocol failures are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Protocol(_))
    }
}

/// Result alias using `RaidlineError`.
pub type Result<T> = std::result::Result<T, RaidlineError>;
