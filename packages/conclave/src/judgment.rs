//! Core value types flowing through the deliberation pipeline.
//!
//! A request fans out to critics, each producing a [`CriticJudgment`].
//! Fusion reduces the judgments to a [`FusionOutcome`] and an
//! [`UncertaintyOutcome`], which the consensus layer assembles into a
//! [`Decision`]. The mode gate then yields a [`Deliberation`]: either a
//! final decision or an escalation signal that unwinds to the runtime.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::AuditStamp;
use crate::precedent::Precedent;

/// One critic's structured judgment of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticJudgment {
    /// Desirability along this critic's axis, in `[0, 1]`.
    pub score: f64,
    /// The critic's confidence in its own judgment, in `[0, 1]`.
    pub confidence: f64,
    /// Whether this critic found a hard violation.
    pub violation: bool,
    pub rationale: String,
    pub claim: String,
    pub evidence: String,
    pub principle: String,
    pub mitigation: String,
}

impl Default for CriticJudgment {
    fn default() -> Self {
        Self {
            score: 0.0,
            confidence: 0.0,
            violation: false,
            rationale: String::new(),
            claim: String::new(),
            evidence: String::new(),
            principle: "None".to_string(),
            mitigation: String::new(),
        }
    }
}

impl CriticJudgment {
    /// Zero-filled judgment standing in for a critic that failed entirely.
    /// Fusion proceeds with partial information; the failure is visible in
    /// the rationale.
    pub fn failed(error: &impl std::fmt::Display) -> Self {
        Self {
            rationale: format!("Critic error: {error}"),
            ..Self::default()
        }
    }

    /// Clamp score and confidence into `[0, 1]`.
    pub fn clamped(mut self) -> Self {
        self.score = self.score.clamp(0.0, 1.0);
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }

    /// Whether the critic named a constitutional principle.
    pub fn has_principle(&self) -> bool {
        !self.principle.trim().is_empty() && !self.principle.trim().eq_ignore_ascii_case("none")
    }
}

/// Result of critic fusion.
///
/// `aggregate_score` is a linear scalarization `Σ weight·score`; it is NOT
/// normalized by the weight sum and NOT clipped to `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionOutcome {
    pub aggregate_score: f64,
    pub violations: Vec<String>,
    pub lex_block: bool,
    pub details: HashMap<String, CriticJudgment>,
}

/// Result of the uncertainty computation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UncertaintyOutcome {
    pub uncertainty: f64,
    pub escalate: bool,
    pub dispersion: f64,
    pub min_confidence: f64,
}

/// The action field of a decision envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Proceed,
    AllowWithMitigations,
    NeedsClarification,
    Reject,
    Escalate,
    Advice,
    Error,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::AllowWithMitigations => "allow_with_mitigations",
            Self::NeedsClarification => "needs_clarification",
            Self::Reject => "reject",
            Self::Escalate => "escalate",
            Self::Advice => "advice",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fused decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub confidence: f64,
    pub uncertainty: f64,
    pub lex_block: bool,
    pub rationale: String,
    #[serde(default)]
    pub precedent: Vec<Precedent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fusion: Option<FusionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mitigations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditStamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precedent_id: Option<String>,
}

impl Decision {
    /// Error decision: the runtime never raises, it reports.
    pub fn errored(message: impl Into<String>) -> Self {
        Self {
            action: Action::Error,
            confidence: 0.0,
            uncertainty: 0.0,
            lex_block: false,
            rationale: String::new(),
            precedent: Vec::new(),
            fusion: None,
            reason: None,
            error: Some(message.into()),
            mitigations: Vec::new(),
            audit: None,
            precedent_id: None,
        }
    }

    /// Escalation decision returned by the runtime when the mode gate
    /// signals that human supervision is required.
    pub fn escalated(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Escalate,
            reason: Some(reason.into()),
            error: None,
            ..Self::errored("")
        }
    }
}

/// Outcome of one pass through the hybrid core: either a decided envelope
/// or an explicit escalation signal. Escalation is control flow, not an
/// error, so it gets its own variant instead of an error type.
#[derive(Debug, Clone)]
pub enum Deliberation {
    Decided(Decision),
    EscalationRequired { reason: String },
}

/// What `Runtime::decide` returns: a request id plus the decision fields.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionEnvelope {
    pub id: Uuid,
    #[serde(flatten)]
    pub decision: Decision,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_judgment_defaults_are_zero_filled() {
        let judgment: CriticJudgment = serde_json::from_value(json!({})).unwrap();
        assert_eq!(judgment.score, 0.0);
        assert_eq!(judgment.confidence, 0.0);
        assert!(!judgment.violation);
        assert_eq!(judgment.principle, "None");
    }

    #[test]
    fn test_failed_judgment_carries_cause() {
        let judgment = CriticJudgment::failed(&"connection reset");
        assert_eq!(judgment.score, 0.0);
        assert_eq!(judgment.confidence, 0.0);
        assert!(!judgment.violation);
        assert!(judgment.rationale.contains("connection reset"));
    }

    #[test]
    fn test_clamping() {
        let judgment = CriticJudgment {
            score: 1.7,
            confidence: -0.2,
            ..Default::default()
        }
        .clamped();
        assert_eq!(judgment.score, 1.0);
        assert_eq!(judgment.confidence, 0.0);
    }

    #[test]
    fn test_has_principle() {
        let mut judgment = CriticJudgment::default();
        assert!(!judgment.has_principle());
        judgment.principle = "  none ".to_string();
        assert!(!judgment.has_principle());
        judgment.principle = "non-discrimination".to_string();
        assert!(judgment.has_principle());
    }

    #[test]
    fn test_action_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(Action::AllowWithMitigations).unwrap(),
            json!("allow_with_mitigations")
        );
        assert_eq!(
            serde_json::to_value(Action::NeedsClarification).unwrap(),
            json!("needs_clarification")
        );
    }

    #[test]
    fn test_envelope_flattens_decision() {
        let envelope = DecisionEnvelope {
            id: Uuid::new_v4(),
            decision: Decision::errored("timeout"),
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["action"], "error");
        assert_eq!(value["error"], "timeout");
        assert!(value.get("id").is_some());
        // Empty optionals stay out of the wire shape
        assert!(value.get("fusion").is_none());
        assert!(value.get("reason").is_none());
    }

    #[test]
    fn test_escalated_decision_shape() {
        let decision = Decision::escalated("Uncertainty threshold exceeded.");
        assert_eq!(decision.action, Action::Escalate);
        assert_eq!(
            decision.reason.as_deref(),
            Some("Uncertainty threshold exceeded.")
        );
        assert!(decision.error.is_none());
    }
}
