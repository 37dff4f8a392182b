//! Global uncertainty scoring over the critic judgments.
//!
//! Two signals feed the score: statistical disagreement between critic
//! scores (population variance) and the weakest critic's self-reported
//! confidence. Crossing the configured threshold flips the escalation flag.

use std::collections::HashMap;

use serde_json::json;

use crate::judgment::{CriticJudgment, UncertaintyOutcome};
use crate::telemetry::Telemetry;

/// Extra uncertainty charged when any critic reports confidence below 0.3.
const LOW_CONFIDENCE_PENALTY: f64 = 0.3;
const LOW_CONFIDENCE_FLOOR: f64 = 0.3;
const DISPERSION_GAIN: f64 = 2.5;

pub struct UncertaintyEngine {
    threshold: f64,
    telemetry: Telemetry,
}

impl UncertaintyEngine {
    pub fn new(threshold: f64, telemetry: Telemetry) -> Self {
        Self {
            threshold,
            telemetry,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub async fn compute(&self, judgments: &HashMap<String, CriticJudgment>) -> UncertaintyOutcome {
        if judgments.is_empty() {
            // No critics, no signal; nothing to escalate on.
            return UncertaintyOutcome {
                uncertainty: 0.0,
                escalate: false,
                dispersion: 0.0,
                min_confidence: 0.0,
            };
        }

        let scores: Vec<f64> = judgments.values().map(|j| j.score).collect();
        let confidences: Vec<f64> = judgments.values().map(|j| j.confidence).collect();

        let dispersion = if scores.len() > 1 {
            population_variance(&scores)
        } else {
            0.0
        };

        let min_confidence = confidences.iter().copied().fold(f64::INFINITY, f64::min);
        let penalty = if min_confidence < LOW_CONFIDENCE_FLOOR {
            LOW_CONFIDENCE_PENALTY
        } else {
            0.0
        };

        let uncertainty = (dispersion * DISPERSION_GAIN + penalty).min(1.0);
        let escalate = uncertainty >= self.threshold;

        self.telemetry
            .metric("uncertainty.score", uncertainty, json!({}))
            .await;

        UncertaintyOutcome {
            uncertainty,
            escalate,
            dispersion,
            min_confidence,
        }
    }
}

fn population_variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBus;
    use crate::testing::{judgment, CollectingListener};

    fn engine(threshold: f64) -> UncertaintyEngine {
        let bus = EventBus::new();
        UncertaintyEngine::new(threshold, Telemetry::new(bus, false))
    }

    fn judgments(scores_and_confidences: &[(&str, f64, f64)]) -> HashMap<String, CriticJudgment> {
        scores_and_confidences
            .iter()
            .map(|(name, score, confidence)| {
                (name.to_string(), judgment(*score, *confidence, false))
            })
            .collect()
    }

    #[test]
    fn test_population_variance() {
        assert_eq!(population_variance(&[0.5, 0.5, 0.5]), 0.0);
        let var = population_variance(&[0.9, 0.1, 0.9, 0.1, 0.9]);
        assert!((var - 0.1536).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_agreement_yields_zero_uncertainty() {
        let outcome = engine(0.35)
            .compute(&judgments(&[
                ("rights", 0.9, 0.9),
                ("risk", 0.9, 0.9),
                ("truth", 0.9, 0.9),
            ]))
            .await;
        assert_eq!(outcome.uncertainty, 0.0);
        assert!(!outcome.escalate);
        assert_eq!(outcome.min_confidence, 0.9);
    }

    #[tokio::test]
    async fn test_disagreement_escalates_past_threshold() {
        let outcome = engine(0.35)
            .compute(&judgments(&[
                ("rights", 0.9, 0.9),
                ("risk", 0.1, 0.9),
                ("fairness", 0.9, 0.9),
                ("truth", 0.1, 0.9),
                ("pragmatics", 0.9, 0.9),
            ]))
            .await;
        assert!((outcome.dispersion - 0.1536).abs() < 1e-9);
        assert!((outcome.uncertainty - 0.384).abs() < 1e-9);
        assert!(outcome.escalate);
    }

    #[tokio::test]
    async fn test_low_confidence_penalty_without_dispersion() {
        let outcome = engine(0.35)
            .compute(&judgments(&[
                ("rights", 0.8, 0.9),
                ("risk", 0.8, 0.2),
                ("truth", 0.8, 0.9),
            ]))
            .await;
        assert_eq!(outcome.dispersion, 0.0);
        assert_eq!(outcome.uncertainty, 0.3);
        assert_eq!(outcome.min_confidence, 0.2);
        assert!(!outcome.escalate);
    }

    #[tokio::test]
    async fn test_escalation_is_threshold_inclusive() {
        // uncertainty exactly at the threshold escalates
        let outcome = engine(0.3)
            .compute(&judgments(&[("rights", 0.8, 0.2), ("risk", 0.8, 0.9)]))
            .await;
        assert_eq!(outcome.uncertainty, 0.3);
        assert!(outcome.escalate);
    }

    #[tokio::test]
    async fn test_uncertainty_is_capped_at_one() {
        let outcome = engine(0.35)
            .compute(&judgments(&[
                ("a", 0.0, 0.1),
                ("b", 1.0, 0.9),
                ("c", 0.0, 0.9),
                ("d", 1.0, 0.9),
            ]))
            .await;
        assert!(outcome.uncertainty <= 1.0);
        assert!(outcome.escalate);
    }

    #[tokio::test]
    async fn test_wider_disagreement_never_lowers_uncertainty() {
        // Same confidences throughout; only the spread of scores grows
        let engine = engine(0.35);
        let mut previous = 0.0;
        for spread in [0.0, 0.1, 0.2, 0.3, 0.4] {
            let outcome = engine
                .compute(&judgments(&[
                    ("rights", 0.5 - spread, 0.9),
                    ("risk", 0.5 + spread, 0.9),
                    ("truth", 0.5, 0.9),
                ]))
                .await;
            assert!(outcome.uncertainty >= previous);
            previous = outcome.uncertainty;
        }
    }

    #[tokio::test]
    async fn test_single_critic_has_no_dispersion() {
        let outcome = engine(0.35).compute(&judgments(&[("rights", 0.4, 0.9)])).await;
        assert_eq!(outcome.dispersion, 0.0);
        assert_eq!(outcome.uncertainty, 0.0);
    }

    #[tokio::test]
    async fn test_empty_judgments_are_inert() {
        let outcome = engine(0.35).compute(&HashMap::new()).await;
        assert_eq!(outcome.uncertainty, 0.0);
        assert!(!outcome.escalate);
    }

    #[tokio::test]
    async fn test_metric_is_emitted() {
        let bus = EventBus::new();
        let metrics = CollectingListener::shared();
        bus.subscribe("telemetry.metric", metrics.clone());
        let engine = UncertaintyEngine::new(0.35, Telemetry::new(bus, true));

        engine.compute(&judgments(&[("rights", 0.5, 0.9)])).await;

        let events = metrics.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["name"], "uncertainty.score");
    }
}
