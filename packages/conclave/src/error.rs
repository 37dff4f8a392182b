//! Structured error types for the deliberation core.
//!
//! `ConclaveError` provides pattern-matchable errors instead of generic
//! `anyhow::Error`.
//!
//! # The Error Boundary Rule
//!
//! > **No error ever crosses the runtime's `decide` boundary.**
//!
//! - `anyhow` is internal transport at collaborator seams (backend runners,
//!   critics, precedent stores are external code and may fail arbitrarily)
//! - `ConclaveError` is the structured taxonomy inside the core
//! - The runtime folds every failure into a decision envelope with
//!   `action: "error"`; callers never see a `Result`
//!
//! Escalation is **not** an error. It travels as a distinct variant of
//! [`Deliberation`](crate::judgment::Deliberation) from the mode gate up to
//! the runtime.

use std::time::Duration;

use thiserror::Error;

/// Errors raised inside the deliberation core.
#[derive(Debug, Error)]
pub enum ConclaveError {
    /// The selected backend exists but is disabled. Non-retriable.
    #[error("no model available: {reason}")]
    NoModelAvailable { reason: String },

    /// A routing rule or config referenced a backend that is not configured.
    #[error("unknown model backend '{0}'")]
    UnknownBackend(String),

    /// The backend runner failed on every attempt the config allows.
    #[error("backend '{backend}' failed after {attempts} attempts: {last_error}")]
    BackendExhausted {
        backend: String,
        attempts: u32,
        last_error: String,
    },

    /// A hook was registered under a name outside the fixed set.
    #[error("unknown hook point '{0}'")]
    UnknownHookPoint(String),

    /// A mode name did not match any predefined profile.
    #[error("unknown mode '{0}'")]
    UnknownMode(String),

    /// Configuration failed validation at load time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The whole deliberation exceeded the runtime's decision timeout.
    #[error("deliberation timed out after {0:?}")]
    DecisionTimeout(Duration),

    /// A failure in the fusion pipeline or another internal stage. These are
    /// programming errors wrapped on their way through the hybrid core.
    #[error("hybrid core failure: {0}")]
    Core(String),
}

impl ConclaveError {
    /// Short machine-readable kind, used in error event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoModelAvailable { .. } => "no_model_available",
            Self::UnknownBackend(_) => "unknown_backend",
            Self::BackendExhausted { .. } => "router_error",
            Self::UnknownHookPoint(_) => "unknown_hook_point",
            Self::UnknownMode(_) => "unknown_mode",
            Self::InvalidConfig(_) => "invalid_config",
            Self::DecisionTimeout(_) => "timeout",
            Self::Core(_) => "hybrid_core_error",
        }
    }
}
