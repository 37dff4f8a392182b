//! Operating mode profiles.
//!
//! A mode bundles the policy knobs that govern how the fusion result is
//! treated: whether lexicographic blocks are enforced, the uncertainty
//! threshold, whether escalation is automatic, and whether the system is
//! advisory-only.

use serde::{Deserialize, Serialize};

use crate::error::ConclaveError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    pub name: String,
    pub enforce_lex: bool,
    pub allow_override: bool,
    pub auto_escalate: bool,
    pub uncertainty_threshold: f64,
    pub block_on_violation: bool,
    pub advisory_only: bool,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self::balanced()
    }
}

impl ModeConfig {
    pub fn strict() -> Self {
        Self {
            name: "strict".to_string(),
            enforce_lex: true,
            allow_override: false,
            auto_escalate: true,
            uncertainty_threshold: 0.25,
            block_on_violation: true,
            advisory_only: false,
        }
    }

    pub fn balanced() -> Self {
        Self {
            name: "balanced".to_string(),
            enforce_lex: true,
            allow_override: false,
            auto_escalate: true,
            uncertainty_threshold: 0.35,
            block_on_violation: true,
            advisory_only: false,
        }
    }

    pub fn permissive() -> Self {
        Self {
            name: "permissive".to_string(),
            enforce_lex: false,
            allow_override: true,
            auto_escalate: false,
            uncertainty_threshold: 0.50,
            block_on_violation: false,
            advisory_only: false,
        }
    }

    /// Never blocks or escalates; decisions are reported as advice.
    pub fn advisory() -> Self {
        Self {
            name: "advisory".to_string(),
            enforce_lex: false,
            allow_override: true,
            auto_escalate: false,
            uncertainty_threshold: 1.0,
            block_on_violation: false,
            advisory_only: true,
        }
    }

    pub fn appliance() -> Self {
        Self {
            name: "appliance".to_string(),
            uncertainty_threshold: 0.30,
            ..Self::balanced()
        }
    }

    pub fn distributed() -> Self {
        Self {
            name: "distributed".to_string(),
            uncertainty_threshold: 0.30,
            ..Self::balanced()
        }
    }

    /// Resolve a profile by name (case-insensitive). Unknown names are a
    /// configuration-time error.
    pub fn named(name: &str) -> Result<Self, ConclaveError> {
        match name.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::strict()),
            "balanced" => Ok(Self::balanced()),
            "permissive" => Ok(Self::permissive()),
            "advisory" => Ok(Self::advisory()),
            "appliance" => Ok(Self::appliance()),
            "distributed" => Ok(Self::distributed()),
            other => Err(ConclaveError::UnknownMode(other.to_string())),
        }
    }
}
