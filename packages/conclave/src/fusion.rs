//! Critic fusion and consensus assembly.
//!
//! Fusion is two-phase. The lexicographic phase gives designated
//! rights-critics absolute precedence: any violation there blocks the
//! request outright, no matter what every other critic scored. Only when no
//! rights violation exists does the weighted phase scalarize the remaining
//! scores into an aggregate.
//!
//! Consensus composes critic fusion with precedent retrieval and the
//! uncertainty engine to produce the decision handed to the mode gate.

use std::collections::{HashMap, HashSet};

use serde_json::json;

use crate::judgment::{Action, CriticJudgment, Decision, FusionOutcome};
use crate::precedent::{PrecedentEngine, DEFAULT_TOP_K};
use crate::telemetry::Telemetry;
use crate::event::EventBus;
use crate::uncertainty::UncertaintyEngine;

/// Lexicographic + weighted critic aggregation.
pub struct CriticFusion {
    weights: HashMap<String, f64>,
    rights_critics: HashSet<String>,
    telemetry: Telemetry,
}

impl CriticFusion {
    /// Default weights. Rights carries zero weight: it cannot be traded
    /// against the others, it can only block.
    pub fn default_weights() -> HashMap<String, f64> {
        HashMap::from([
            ("rights".to_string(), 0.0),
            ("risk".to_string(), 0.25),
            ("fairness".to_string(), 0.25),
            ("truth".to_string(), 0.25),
            ("pragmatics".to_string(), 0.25),
        ])
    }

    pub fn new(
        weights: Option<HashMap<String, f64>>,
        rights_critics: Option<HashSet<String>>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            weights: weights.unwrap_or_else(Self::default_weights),
            rights_critics: rights_critics
                .unwrap_or_else(|| HashSet::from(["rights".to_string()])),
            telemetry,
        }
    }

    /// Reduce the judgments to a [`FusionOutcome`].
    ///
    /// All judgments are retained in `details` for audit either way; on a
    /// lexicographic block they simply stop influencing the decision.
    pub async fn fuse(&self, judgments: &HashMap<String, CriticJudgment>) -> FusionOutcome {
        let span = self.telemetry.start_span("fusion.critics", json!({})).await;

        let mut violations: Vec<String> = judgments
            .iter()
            .filter(|(name, judgment)| {
                self.rights_critics.contains(name.as_str()) && judgment.violation
            })
            .map(|(name, _)| name.clone())
            .collect();
        violations.sort();

        let outcome = if violations.is_empty() {
            let aggregate_score = judgments
                .iter()
                .map(|(name, judgment)| {
                    self.weights.get(name).copied().unwrap_or(0.0) * judgment.score
                })
                .sum();
            FusionOutcome {
                aggregate_score,
                violations,
                lex_block: false,
                details: judgments.clone(),
            }
        } else {
            FusionOutcome {
                aggregate_score: 0.0,
                violations,
                lex_block: true,
                details: judgments.clone(),
            }
        };

        self.telemetry
            .end_span(
                span,
                &format!(
                    "lex_block={} aggregate={:.4}",
                    outcome.lex_block, outcome.aggregate_score
                ),
            )
            .await;
        outcome
    }
}

/// Composition of critic fusion, precedent retrieval, and uncertainty.
pub struct ConsensusFusion {
    critic_fusion: CriticFusion,
    uncertainty: UncertaintyEngine,
    precedent: Option<PrecedentEngine>,
    bus: EventBus,
    telemetry: Telemetry,
}

impl ConsensusFusion {
    pub fn new(
        critic_fusion: CriticFusion,
        uncertainty: UncertaintyEngine,
        precedent: Option<PrecedentEngine>,
        bus: EventBus,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            critic_fusion,
            uncertainty,
            precedent,
            bus,
            telemetry,
        }
    }

    /// Produce the pre-gate decision for a set of judgments.
    pub async fn decide(
        &self,
        judgments: HashMap<String, CriticJudgment>,
        vector: Option<&[f32]>,
    ) -> Decision {
        let span = self
            .telemetry
            .start_span("fusion.consensus", json!({}))
            .await;

        let critic_out = self.critic_fusion.fuse(&judgments).await;

        // Rights violation → immediate block; nothing else matters.
        if critic_out.lex_block {
            let decision = Decision {
                action: Action::Reject,
                confidence: 1.0,
                uncertainty: 0.0,
                lex_block: true,
                rationale: "Rights-critical violation detected.".to_string(),
                precedent: Vec::new(),
                fusion: Some(critic_out),
                reason: None,
                error: None,
                mitigations: Vec::new(),
                audit: None,
                precedent_id: None,
            };
            self.telemetry.end_span(span, "reject").await;
            return decision;
        }

        let precedent = match (&self.precedent, vector) {
            (Some(engine), Some(vector)) => engine.fetch_relevant(vector, DEFAULT_TOP_K).await,
            _ => Vec::new(),
        };

        let unc = self.uncertainty.compute(&judgments).await;

        let action = if unc.escalate {
            Action::Escalate
        } else {
            Action::Proceed
        };

        if unc.escalate {
            self.bus
                .emit("fusion.escalate", json!({"score": unc.uncertainty}), json!({}))
                .await;
        }

        let decision = Decision {
            action,
            confidence: critic_out.aggregate_score,
            uncertainty: unc.uncertainty,
            lex_block: false,
            rationale: "Decision derived from multi-critic fusion.".to_string(),
            precedent,
            fusion: Some(critic_out),
            reason: None,
            error: None,
            mitigations: Vec::new(),
            audit: None,
            precedent_id: None,
        };
        self.telemetry.end_span(span, action.as_str()).await;
        decision
    }
}
