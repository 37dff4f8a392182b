//! Concurrent critic fan-out.
//!
//! Every configured critic evaluates the request in parallel; completion,
//! failure, and streaming progress are independent per critic. A critic
//! that fails completely contributes a zero-filled judgment so fusion can
//! proceed with partial information; the fan-out never aborts the other
//! critics because one failed.
//!
//! # Per-critic lifecycle
//!
//! ```text
//! <critic>.starting (confidence 0.05)
//!     │
//!     ├─► streaming: consume chunks, emit <critic>.chunk with a running
//!     │   confidence (logprobs when present, text heuristic otherwise)
//!     │       └─► on stream failure: <critic>.conflict (low) and fall
//!     │           back to a single completion call
//!     ├─► parse accumulated text into a judgment
//!     ├─► conflict checks → <critic>.conflict (severity-tagged)
//!     └─► <critic>.complete (final confidence)
//! ```

use std::fmt;

use futures::future::join_all;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::warn;

use crate::config::{MitigationLibrary, Thresholds};
use crate::critic::{CriticRunner, CriticSet, StreamingCritic};
use crate::event::EventBus;
use crate::hook::{HookManager, HookPoint};
use crate::judgment::CriticJudgment;
use crate::parse::{heuristic_confidence, confidence_from_logprobs, parse_critic_output, PROTECTED_CLASSES};

/// Confidence reported with the starting event, before any output exists.
const STARTING_CONFIDENCE: f64 = 0.05;
/// Base for the text heuristic while a stream is in flight.
const STREAM_BASE_CONFIDENCE: f64 = 0.12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::Medium => f.write_str("medium"),
            Self::High => f.write_str("high"),
        }
    }
}

/// A conflict surfaced by one critic's checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictFinding {
    pub critic: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mitigation: Option<String>,
}

/// Everything the fan-out produced: judgments keyed by critic name (the
/// completion order is not observable downstream) plus conflict findings.
#[derive(Debug, Default)]
pub struct FanOut {
    pub judgments: HashMap<String, CriticJudgment>,
    pub conflicts: Vec<ConflictFinding>,
}

/// Drives all critics concurrently and reports their lifecycle on the bus.
pub struct CriticDriver {
    bus: EventBus,
    hooks: HookManager,
    thresholds: Thresholds,
    mitigations: MitigationLibrary,
}

impl CriticDriver {
    pub fn new(
        bus: EventBus,
        hooks: HookManager,
        thresholds: Thresholds,
        mitigations: MitigationLibrary,
    ) -> Self {
        Self {
            bus,
            hooks,
            thresholds,
            mitigations,
        }
    }

    /// Evaluate every critic against the request and backend result.
    pub async fn evaluate_all(
        &self,
        critics: &CriticSet,
        request: &Value,
        backend: &Value,
    ) -> FanOut {
        let results = join_all(
            critics
                .iter()
                .map(|(name, runner)| self.run_one(name, runner, request, backend)),
        )
        .await;

        let mut fan_out = FanOut::default();
        for (name, judgment, conflict) in results {
            fan_out.judgments.insert(name, judgment);
            if let Some(finding) = conflict {
                fan_out.conflicts.push(finding);
            }
        }
        fan_out.conflicts.sort_by(|a, b| a.critic.cmp(&b.critic));
        fan_out
    }

    async fn run_one(
        &self,
        name: &str,
        runner: &CriticRunner,
        request: &Value,
        backend: &Value,
    ) -> (String, CriticJudgment, Option<ConflictFinding>) {
        self.hooks
            .fire(HookPoint::BeforeCritic, &json!({"critic": name}))
            .await;
        self.bus
            .emit(
                &format!("{name}.starting"),
                json!({
                    "critic": name,
                    "message": format!("{name} critic starting"),
                    "confidence": STARTING_CONFIDENCE,
                }),
                json!({}),
            )
            .await;

        let judgment = match runner {
            CriticRunner::Direct(critic) => match critic.evaluate(request, backend).await {
                Ok(judgment) => judgment.clamped(),
                Err(e) => {
                    warn!(critic = %name, error = %e, "critic failed");
                    CriticJudgment::failed(&e)
                }
            },
            CriticRunner::Streaming(critic) => {
                self.run_streaming(name, critic.as_ref(), request, backend)
                    .await
            }
        };

        let conflict = self.conflict_check(name, &judgment);
        if let Some(finding) = &conflict {
            self.bus
                .emit(
                    &format!("{name}.conflict"),
                    json!({
                        "critic": finding.critic,
                        "severity": finding.severity,
                        "message": finding.message,
                        "mitigation": finding.mitigation,
                    }),
                    json!({}),
                )
                .await;
        }

        self.bus
            .emit(
                &format!("{name}.complete"),
                json!({
                    "critic": name,
                    "message": format!("{name} critic complete"),
                    "confidence": judgment.confidence,
                }),
                json!({}),
            )
            .await;
        self.hooks
            .fire(
                HookPoint::AfterCritic,
                &json!({"critic": name, "confidence": judgment.confidence}),
            )
            .await;

        (name.to_string(), judgment, conflict)
    }

    /// Consume a critic's chunk stream, falling back to a single completion
    /// call when the stream cannot be opened or fails mid-flight.
    async fn run_streaming(
        &self,
        name: &str,
        critic: &dyn StreamingCritic,
        request: &Value,
        backend: &Value,
    ) -> CriticJudgment {
        let mut collected = String::new();
        let mut stream_error: Option<String> = None;

        match critic.stream(request, backend).await {
            Ok(mut stream) => {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(chunk) => {
                            if chunk.content.is_empty() {
                                continue;
                            }
                            collected.push_str(&chunk.content);
                            let confidence = match chunk.logprobs.as_deref() {
                                Some(logprobs) if !logprobs.is_empty() => {
                                    confidence_from_logprobs(logprobs)
                                }
                                _ => heuristic_confidence(&collected, STREAM_BASE_CONFIDENCE),
                            };
                            self.bus
                                .emit(
                                    &format!("{name}.chunk"),
                                    json!({
                                        "critic": name,
                                        "content": chunk.content,
                                        "confidence": confidence,
                                    }),
                                    json!({}),
                                )
                                .await;
                        }
                        Err(e) => {
                            stream_error = Some(e.to_string());
                            break;
                        }
                    }
                }
            }
            Err(e) => stream_error = Some(e.to_string()),
        }

        if let Some(error) = stream_error {
            self.bus
                .emit(
                    &format!("{name}.conflict"),
                    json!({
                        "critic": name,
                        "severity": Severity::Low,
                        "message": format!(
                            "{name} critic stream failed, falling back to completion: {error}"
                        ),
                    }),
                    json!({}),
                )
                .await;
            match critic.complete(request, backend).await {
                Ok(text) => collected.push_str(&text),
                Err(e) => {
                    if collected.is_empty() {
                        warn!(critic = %name, error = %e, "critic fallback failed");
                        return CriticJudgment::failed(&e);
                    }
                    // Keep whatever streamed before the failure
                    warn!(critic = %name, error = %e, "critic fallback failed, parsing partial output");
                }
            }
        }

        let mut judgment = parse_critic_output(&collected);
        judgment.rationale = if judgment.claim.is_empty() {
            collected.trim().to_string()
        } else {
            judgment.claim.clone()
        };
        judgment
    }

    /// Per-critic conflict rules. These feed event emission and the
    /// advisory mitigation list; fusion does not consume them.
    ///
    /// A critic with no configured threshold trips none of the
    /// threshold-gated checks, in either gate direction.
    fn conflict_check(&self, critic: &str, judgment: &CriticJudgment) -> Option<ConflictFinding> {
        let threshold = self.thresholds.get(critic);
        let confidence = judgment.confidence;
        let claim = judgment.claim.to_lowercase();
        let evidence = judgment.evidence.to_lowercase();

        let above_threshold = threshold.is_some_and(|t| confidence > t);
        let below_threshold = threshold.is_some_and(|t| confidence < t);

        let (severity, message) = match critic {
            "rights" => {
                if judgment.has_principle() && above_threshold {
                    (Severity::High, "Potential rights violation detected.")
                } else if PROTECTED_CLASSES.iter().any(|term| claim.contains(term)) {
                    (
                        Severity::High,
                        "Protected class detected; check non-discrimination.",
                    )
                } else if !claim.contains("consent") && !evidence.contains("consent") {
                    (Severity::Medium, "Consent not evident; verify autonomy.")
                } else {
                    return None;
                }
            }
            "risk" => {
                if (judgment.has_principle() || claim.contains("harm")) && above_threshold {
                    (Severity::Medium, "Potential high-risk action detected.")
                } else {
                    return None;
                }
            }
            "fairness" => {
                if judgment.has_principle() && above_threshold {
                    (Severity::Medium, "Potential distributional harm detected.")
                } else {
                    return None;
                }
            }
            "truth" => {
                if judgment.has_principle() && above_threshold {
                    (Severity::Low, "Potential misinformation detected.")
                } else {
                    return None;
                }
            }
            "pragmatics" => {
                if below_threshold {
                    (Severity::Low, "Feasibility uncertain; clarify constraints.")
                } else {
                    return None;
                }
            }
            _ => return None,
        };

        Some(ConflictFinding {
            critic: critic.to_string(),
            severity,
            message: message.to_string(),
            mitigation: self.mitigations.conflict_for(critic).map(String::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::critic::CriticRunner;
    use crate::testing::{
        judgment, CollectingListener, FailingCritic, ScriptedCritic, ScriptedStreamCritic,
    };
    use crate::backend::BackendChunk;
    use std::sync::Arc;

    fn driver(bus: EventBus) -> CriticDriver {
        CriticDriver::new(
            bus,
            HookManager::new(),
            Thresholds::default(),
            MitigationLibrary::default(),
        )
    }

    fn direct(j: CriticJudgment) -> CriticRunner {
        CriticRunner::Direct(Arc::new(ScriptedCritic::new(j)))
    }

    #[tokio::test]
    async fn test_fan_out_collects_all_judgments() {
        let bus = EventBus::new();
        let mut critics = CriticSet::new();
        critics.insert("rights".to_string(), direct(judgment(0.2, 0.9, false)));
        critics.insert("risk".to_string(), direct(judgment(0.8, 0.9, false)));

        let fan_out = driver(bus)
            .evaluate_all(&critics, &json!({}), &json!({}))
            .await;
        assert_eq!(fan_out.judgments.len(), 2);
        assert_eq!(fan_out.judgments["risk"].score, 0.8);
    }

    #[tokio::test]
    async fn test_failing_critic_is_isolated() {
        let bus = EventBus::new();
        let mut critics = CriticSet::new();
        critics.insert(
            "risk".to_string(),
            CriticRunner::Direct(Arc::new(FailingCritic)),
        );
        critics.insert("truth".to_string(), direct(judgment(0.7, 0.9, false)));

        let fan_out = driver(bus)
            .evaluate_all(&critics, &json!({}), &json!({}))
            .await;

        let failed = &fan_out.judgments["risk"];
        assert_eq!(failed.score, 0.0);
        assert_eq!(failed.confidence, 0.0);
        assert!(!failed.violation);
        assert!(failed.rationale.starts_with("Critic error:"));
        // The healthy critic is untouched
        assert_eq!(fan_out.judgments["truth"].score, 0.7);
    }

    #[tokio::test]
    async fn test_lifecycle_events_in_order() {
        let bus = EventBus::new();
        let starting = CollectingListener::shared();
        let complete = CollectingListener::shared();
        bus.subscribe("truth.starting", starting.clone());
        bus.subscribe("truth.complete", complete.clone());

        let mut critics = CriticSet::new();
        critics.insert("truth".to_string(), direct(judgment(0.7, 0.85, false)));

        driver(bus).evaluate_all(&critics, &json!({}), &json!({})).await;

        let starts = starting.events();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].payload["confidence"], 0.05);
        let completes = complete.events();
        assert_eq!(completes.len(), 1);
        assert_eq!(completes[0].payload["confidence"], 0.85);
    }

    #[tokio::test]
    async fn test_streaming_critic_emits_chunks_and_parses() {
        let bus = EventBus::new();
        let chunks = CollectingListener::shared();
        bus.subscribe("truth.chunk", chunks.clone());

        let critic = ScriptedStreamCritic::new(vec![
            BackendChunk::text("- Claim: accurate summary\n"),
            BackendChunk::with_logprobs("- Confidence: 0.8\n", vec![-0.1, -0.2]),
        ]);
        let mut critics = CriticSet::new();
        critics.insert(
            "truth".to_string(),
            CriticRunner::Streaming(Arc::new(critic)),
        );

        let fan_out = driver(bus)
            .evaluate_all(&critics, &json!({}), &json!({}))
            .await;

        let seen = chunks.events();
        assert_eq!(seen.len(), 2);
        // Second chunk carried logprobs: exp(mean(-0.1, -0.2))
        let conf = seen[1].payload["confidence"].as_f64().unwrap();
        assert!((conf - (-0.15f64).exp()).abs() < 1e-9);

        let judgment = &fan_out.judgments["truth"];
        assert_eq!(judgment.claim, "accurate summary");
        assert_eq!(judgment.confidence, 0.8);
        assert_eq!(judgment.rationale, "accurate summary");
    }

    #[tokio::test]
    async fn test_stream_failure_falls_back_to_completion() {
        let bus = EventBus::new();
        let conflicts = CollectingListener::shared();
        bus.subscribe("truth.conflict", conflicts.clone());

        let critic = ScriptedStreamCritic::new(vec![BackendChunk::text("- Claim: partial")])
            .failing_after(1)
            .with_completion("\n- Claim: recovered claim\n- Confidence: 0.6\n");
        let mut critics = CriticSet::new();
        critics.insert(
            "truth".to_string(),
            CriticRunner::Streaming(Arc::new(critic)),
        );

        let fan_out = driver(bus)
            .evaluate_all(&critics, &json!({}), &json!({}))
            .await;

        let judgment = &fan_out.judgments["truth"];
        assert_eq!(judgment.claim, "partial");
        assert_eq!(judgment.confidence, 0.6);

        let low = conflicts.events();
        assert!(!low.is_empty());
        assert_eq!(low[0].payload["severity"], "low");
        assert!(low[0].payload["message"]
            .as_str()
            .unwrap()
            .contains("falling back"));
    }

    #[tokio::test]
    async fn test_unopenable_stream_uses_completion_only() {
        let bus = EventBus::new();
        let critic = ScriptedStreamCritic::new(vec![])
            .failing_open()
            .with_completion("- Claim: recovered\n- Confidence: 0.7\n");
        let mut critics = CriticSet::new();
        critics.insert(
            "truth".to_string(),
            CriticRunner::Streaming(Arc::new(critic)),
        );

        let fan_out = driver(bus)
            .evaluate_all(&critics, &json!({}), &json!({}))
            .await;
        assert_eq!(fan_out.judgments["truth"].claim, "recovered");
        assert_eq!(fan_out.judgments["truth"].confidence, 0.7);
    }

    #[tokio::test]
    async fn test_stream_and_fallback_both_failing_zero_fills() {
        let bus = EventBus::new();
        let critic = ScriptedStreamCritic::new(vec![]).failing_open();
        let mut critics = CriticSet::new();
        critics.insert(
            "truth".to_string(),
            CriticRunner::Streaming(Arc::new(critic)),
        );

        let fan_out = driver(bus)
            .evaluate_all(&critics, &json!({}), &json!({}))
            .await;
        let judgment = &fan_out.judgments["truth"];
        assert_eq!(judgment.score, 0.0);
        assert_eq!(judgment.confidence, 0.0);
        assert!(judgment.rationale.starts_with("Critic error:"));
    }

    #[tokio::test]
    async fn test_rights_conflict_above_threshold_is_high() {
        let bus = EventBus::new();
        let conflicts = CollectingListener::shared();
        bus.subscribe("rights.conflict", conflicts.clone());

        let mut j = judgment(0.1, 0.8, false);
        j.principle = "privacy".to_string();
        let mut critics = CriticSet::new();
        critics.insert("rights".to_string(), direct(j));

        let fan_out = driver(bus)
            .evaluate_all(&critics, &json!({}), &json!({}))
            .await;

        assert_eq!(fan_out.conflicts.len(), 1);
        assert_eq!(fan_out.conflicts[0].severity, Severity::High);
        assert!(fan_out.conflicts[0].mitigation.is_some());
        assert_eq!(conflicts.events().len(), 1);
    }

    #[tokio::test]
    async fn test_rights_protected_class_is_high() {
        let bus = EventBus::new();
        let mut j = judgment(0.5, 0.2, false);
        j.claim = "Filter applicants by religion and age".to_string();
        j.evidence = "explicit consent on file".to_string();
        let mut critics = CriticSet::new();
        critics.insert("rights".to_string(), direct(j));

        let fan_out = driver(bus)
            .evaluate_all(&critics, &json!({}), &json!({}))
            .await;
        assert_eq!(fan_out.conflicts[0].severity, Severity::High);
        assert!(fan_out.conflicts[0].message.contains("Protected class"));
    }

    #[tokio::test]
    async fn test_rights_missing_consent_is_medium() {
        let bus = EventBus::new();
        let mut j = judgment(0.5, 0.2, false);
        j.claim = "Collect location traces".to_string();
        j.evidence = "continuous background sampling".to_string();
        let mut critics = CriticSet::new();
        critics.insert("rights".to_string(), direct(j));

        let fan_out = driver(bus)
            .evaluate_all(&critics, &json!({}), &json!({}))
            .await;
        assert_eq!(fan_out.conflicts[0].severity, Severity::Medium);
        assert!(fan_out.conflicts[0].message.contains("Consent"));
    }

    #[tokio::test]
    async fn test_risk_harm_claim_gated_by_threshold() {
        let bus = EventBus::new();
        let mut j = judgment(0.5, 0.7, false);
        j.claim = "could cause physical harm".to_string();
        let mut critics = CriticSet::new();
        critics.insert("risk".to_string(), direct(j.clone()));

        let fan_out = driver(bus)
            .evaluate_all(&critics, &json!({}), &json!({}))
            .await;
        assert_eq!(fan_out.conflicts.len(), 1);
        assert_eq!(fan_out.conflicts[0].severity, Severity::Medium);

        // Below the 0.6 threshold no conflict fires
        let bus = EventBus::new();
        j.confidence = 0.5;
        let mut critics = CriticSet::new();
        critics.insert("risk".to_string(), direct(j));
        let fan_out = driver(bus)
            .evaluate_all(&critics, &json!({}), &json!({}))
            .await;
        assert!(fan_out.conflicts.is_empty());
    }

    #[tokio::test]
    async fn test_pragmatics_low_confidence_flags_feasibility() {
        let bus = EventBus::new();
        let mut critics = CriticSet::new();
        critics.insert("pragmatics".to_string(), direct(judgment(0.5, 0.2, false)));

        let fan_out = driver(bus)
            .evaluate_all(&critics, &json!({}), &json!({}))
            .await;
        assert_eq!(fan_out.conflicts.len(), 1);
        assert_eq!(fan_out.conflicts[0].severity, Severity::Low);
        assert!(fan_out.conflicts[0].message.contains("Feasibility"));
    }

    #[tokio::test]
    async fn test_missing_threshold_disables_gated_checks() {
        // Without a pragmatics threshold the below-threshold gate must not
        // fire, even at zero confidence.
        let mut thresholds = Thresholds::default();
        thresholds.0.remove("pragmatics");
        let driver = CriticDriver::new(
            EventBus::new(),
            HookManager::new(),
            thresholds,
            MitigationLibrary::default(),
        );
        let mut critics = CriticSet::new();
        critics.insert("pragmatics".to_string(), direct(judgment(0.5, 0.0, false)));

        let fan_out = driver.evaluate_all(&critics, &json!({}), &json!({})).await;
        assert!(fan_out.conflicts.is_empty());
    }
}
