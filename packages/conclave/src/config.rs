//! Typed configuration for the deliberation core.
//!
//! External collaborators load these from JSON or YAML; the core only ever
//! sees the deserialized structures. `validate` runs at bootstrap so bad
//! config fails before the first request.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConclaveError;

// =============================================================================
// Router configuration
// =============================================================================

/// One model backend the router can execute against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default = "default_backend_timeout")]
    pub timeout_seconds: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A routing rule: conjunctive equality over request keys.
///
/// The first declared rule whose `match` map is a subset of the request
/// wins. An empty match map never matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    #[serde(rename = "match", alias = "if", default)]
    pub when: HashMap<String, Value>,
    pub use_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub default_model: String,
    pub models: HashMap<String, BackendConfig>,
    #[serde(default)]
    pub routing_rules: Vec<RoutingRule>,
}

impl RouterConfig {
    pub fn get_backend(&self, name: &str) -> Result<&BackendConfig, ConclaveError> {
        self.models
            .get(name)
            .ok_or_else(|| ConclaveError::UnknownBackend(name.to_string()))
    }

    /// Fail fast on config that cannot route anything sensibly.
    pub fn validate(&self) -> Result<(), ConclaveError> {
        if !self.models.contains_key(&self.default_model) {
            return Err(ConclaveError::InvalidConfig(format!(
                "default model '{}' is not configured",
                self.default_model
            )));
        }
        for (name, backend) in &self.models {
            if backend.timeout_seconds <= 0.0 {
                return Err(ConclaveError::InvalidConfig(format!(
                    "backend '{}' has non-positive timeout",
                    name
                )));
            }
        }
        for rule in &self.routing_rules {
            if !self.models.contains_key(&rule.use_model) {
                return Err(ConclaveError::InvalidConfig(format!(
                    "routing rule targets unknown model '{}'",
                    rule.use_model
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Runtime configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Mode profile name, resolved via [`ModeConfig::named`](crate::mode::ModeConfig::named).
    pub mode: String,
    pub max_concurrent_tasks: usize,
    /// Total wall-clock budget for one deliberation, in seconds.
    pub decision_timeout: f64,
    pub healthcheck_interval: f64,
    pub enable_precedent: bool,
    pub enable_telemetry: bool,
    pub enable_events: bool,
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: "balanced".to_string(),
            max_concurrent_tasks: 10,
            decision_timeout: 20.0,
            healthcheck_interval: 30.0,
            enable_precedent: true,
            enable_telemetry: true,
            enable_events: true,
            log_level: "info".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConclaveError> {
        if self.max_concurrent_tasks == 0 {
            return Err(ConclaveError::InvalidConfig(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.decision_timeout <= 0.0 {
            return Err(ConclaveError::InvalidConfig(
                "decision_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Conflict thresholds
// =============================================================================

/// Per-critic confidence thresholds for conflict checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds(pub HashMap<String, f64>);

impl Default for Thresholds {
    fn default() -> Self {
        Self(HashMap::from([
            ("rights".to_string(), 0.50),
            ("risk".to_string(), 0.60),
            ("fairness".to_string(), 0.60),
            ("truth".to_string(), 0.70),
            ("pragmatics".to_string(), 0.40),
        ]))
    }
}

impl Thresholds {
    /// Threshold for a critic. `None` disables every threshold-gated
    /// conflict for that critic, whichever direction the check compares
    /// (rights-style gates fire above the threshold, the pragmatics gate
    /// fires below it).
    pub fn get(&self, critic: &str) -> Option<f64> {
        self.0.get(critic).copied()
    }

    pub fn set(&mut self, critic: &str, value: f64) {
        self.0.insert(critic.to_string(), value);
    }

    /// Apply a named compliance profile on top of the current values.
    pub fn apply_profile(&mut self, profile: ThresholdProfile) {
        let overlay: &[(&str, f64)] = match profile {
            ThresholdProfile::EuAi => &[
                ("rights", 0.40),
                ("fairness", 0.50),
                ("risk", 0.50),
                ("truth", 0.60),
                ("pragmatics", 0.50),
            ],
            ThresholdProfile::NistHigh => &[
                ("rights", 0.45),
                ("fairness", 0.55),
                ("risk", 0.55),
                ("truth", 0.65),
                ("pragmatics", 0.45),
            ],
        };
        for (critic, value) in overlay {
            self.set(critic, *value);
        }
    }
}

/// Compliance preset overlays for conflict thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThresholdProfile {
    EuAi,
    NistHigh,
}

// =============================================================================
// Mitigation library
// =============================================================================

/// Mitigation templates for one critic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationTemplates {
    /// Suggested when the critic's conflict check fires.
    pub conflict: String,
    /// General guidance when no conflict fired.
    #[serde(rename = "default")]
    pub baseline: String,
}

/// Per-critic mitigation templates surfaced on conflict events and in
/// decision envelopes. Advisory only; never changes the gated action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationLibrary(pub HashMap<String, MitigationTemplates>);

impl Default for MitigationLibrary {
    fn default() -> Self {
        let mut map = HashMap::new();
        map.insert(
            "rights".to_string(),
            MitigationTemplates {
                conflict: "Resolve rights constraint (dignity, autonomy, non-discrimination) before proceeding.".to_string(),
                baseline: "Document informed consent; ensure protected classes are not impacted.".to_string(),
            },
        );
        map.insert(
            "risk".to_string(),
            MitigationTemplates {
                conflict: "Redesign for reversibility and reduce harm likelihood; add human-in-the-loop where possible.".to_string(),
                baseline: "Add monitoring and safe rollback; test for edge cases and failure modes before deployment.".to_string(),
            },
        );
        map.insert(
            "fairness".to_string(),
            MitigationTemplates {
                conflict: "Address distributional harm; add subgroup checks and fairness constraints.".to_string(),
                baseline: "Audit for bias; ensure similarly situated groups receive equal treatment.".to_string(),
            },
        );
        map.insert(
            "truth".to_string(),
            MitigationTemplates {
                conflict: "Provide citations, verify claims, and correct inaccuracies.".to_string(),
                baseline: "Include sources and ensure completeness; avoid omissions that mislead.".to_string(),
            },
        );
        map.insert(
            "pragmatics".to_string(),
            MitigationTemplates {
                conflict: "Clarify feasibility, resources, and operational constraints before proceeding.".to_string(),
                baseline: "Provide clear implementation steps and cost/latency constraints.".to_string(),
            },
        );
        Self(map)
    }
}

impl MitigationLibrary {
    /// The conflict-time suggestion for a critic, if one is configured.
    pub fn conflict_for(&self, critic: &str) -> Option<&str> {
        self.0.get(critic).map(|t| t.conflict.as_str())
    }
}

fn default_backend_timeout() -> f64 {
    10.0
}

fn default_max_retries() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn router_config() -> RouterConfig {
        serde_json::from_value(json!({
            "default_model": "general",
            "models": {
                "general": {"name": "general", "endpoint": "http://localhost:11434"},
                "safety": {"name": "safety", "endpoint": "http://localhost:11435", "max_retries": 2}
            },
            "routing_rules": [
                {"match": {"task": "evaluate"}, "use_model": "safety"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_backend_defaults_apply() {
        let config = router_config();
        let backend = config.get_backend("general").unwrap();
        assert_eq!(backend.timeout_seconds, 10.0);
        assert_eq!(backend.max_retries, 1);
        assert!(backend.enabled);
    }

    #[test]
    fn test_rule_accepts_if_alias() {
        let rule: RoutingRule =
            serde_json::from_value(json!({"if": {"task": "x"}, "use_model": "general"})).unwrap();
        assert_eq!(rule.when["task"], "x");
    }

    #[test]
    fn test_unknown_backend_lookup_fails() {
        let config = router_config();
        assert!(matches!(
            config.get_backend("nonexistent"),
            Err(ConclaveError::UnknownBackend(_))
        ));
    }

    #[test]
    fn test_validate_rejects_missing_default_model() {
        let mut config = router_config();
        config.default_model = "missing".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConclaveError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_rule_with_unknown_target() {
        let mut config = router_config();
        config.routing_rules.push(RoutingRule {
            when: HashMap::from([("task".to_string(), json!("y"))]),
            use_model: "ghost".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_runtime_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.mode, "balanced");
        assert_eq!(config.max_concurrent_tasks, 10);
        assert_eq!(config.decision_timeout, 20.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_runtime_config_partial_deserialization() {
        let config: RuntimeConfig =
            serde_json::from_value(json!({"mode": "strict", "max_concurrent_tasks": 4})).unwrap();
        assert_eq!(config.mode, "strict");
        assert_eq!(config.max_concurrent_tasks, 4);
        assert_eq!(config.decision_timeout, 20.0);
    }

    #[test]
    fn test_threshold_defaults_and_profiles() {
        let mut thresholds = Thresholds::default();
        assert_eq!(thresholds.get("rights"), Some(0.50));
        assert_eq!(thresholds.get("pragmatics"), Some(0.40));

        thresholds.apply_profile(ThresholdProfile::EuAi);
        assert_eq!(thresholds.get("rights"), Some(0.40));
        assert_eq!(thresholds.get("truth"), Some(0.60));
    }

    #[test]
    fn test_unknown_critic_has_no_threshold() {
        let thresholds = Thresholds::default();
        assert!(thresholds.get("novelty").is_none());
    }

    #[test]
    fn test_mitigation_library_defaults() {
        let library = MitigationLibrary::default();
        assert!(library.conflict_for("rights").unwrap().contains("rights"));
        assert!(library.conflict_for("unknown").is_none());
    }
}
