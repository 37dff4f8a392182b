//! The hybrid deliberation core.
//!
//! One `deliberate` call is one full pass: route the request to a backend,
//! fan the result out to the critics, fuse the judgments, and gate the
//! fused decision through the active mode. Escalation leaves the core as an
//! explicit [`Deliberation::EscalationRequired`] variant, not an error.
//!
//! ```text
//! request ─► Router.execute ─► backend result
//!                │
//!                ▼
//!          CriticDriver.evaluate_all ─► {critic → judgment}
//!                │
//!                ▼
//!          ConsensusFusion.decide ─► pre-gate decision
//!                │
//!                ▼
//!            mode gate ─► Decided(decision) | EscalationRequired
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::audit::{build_tags, AuditStamp};
use crate::backend::{response_embedding, BackendRunner};
use crate::critic::CriticSet;
use crate::driver::CriticDriver;
use crate::error::ConclaveError;
use crate::event::EventBus;
use crate::fusion::ConsensusFusion;
use crate::hook::{HookManager, HookPoint};
use crate::judgment::{Action, Decision, Deliberation};
use crate::mode::ModeConfig;
use crate::precedent::{PrecedentRecord, PrecedentStore};
use crate::router::Router;
use crate::telemetry::Telemetry;

pub struct HybridCore {
    router: Router,
    critics: CriticSet,
    driver: CriticDriver,
    fusion: ConsensusFusion,
    mode: ModeConfig,
    runner: Arc<dyn BackendRunner>,
    store: Option<Arc<dyn PrecedentStore>>,
    bus: EventBus,
    hooks: HookManager,
    telemetry: Telemetry,
}

impl HybridCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Router,
        critics: CriticSet,
        driver: CriticDriver,
        fusion: ConsensusFusion,
        mode: ModeConfig,
        runner: Arc<dyn BackendRunner>,
        store: Option<Arc<dyn PrecedentStore>>,
        bus: EventBus,
        hooks: HookManager,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            router,
            critics,
            driver,
            fusion,
            mode,
            runner,
            store,
            bus,
            hooks,
            telemetry,
        }
    }

    pub fn mode(&self) -> &ModeConfig {
        &self.mode
    }

    /// Perform a full deliberation for one request.
    pub async fn deliberate(&self, request: &Value) -> Result<Deliberation, ConclaveError> {
        let span = self
            .telemetry
            .start_span("hybrid.deliberate", json!({}))
            .await;

        let result = self.deliberate_inner(request).await;

        match &result {
            Ok(Deliberation::Decided(decision)) => {
                self.telemetry.end_span(span, decision.action.as_str()).await;
            }
            Ok(Deliberation::EscalationRequired { .. }) => {
                self.bus
                    .emit(
                        "hybrid.escalation_forced",
                        json!({"request": request}),
                        json!({}),
                    )
                    .await;
                self.telemetry.end_span(span, "escalation_required").await;
            }
            Err(e) => {
                self.bus
                    .emit("hybrid.error", json!({"error": e.to_string()}), json!({}))
                    .await;
                self.telemetry.end_span(span, "error").await;
            }
        }
        result
    }

    async fn deliberate_inner(&self, request: &Value) -> Result<Deliberation, ConclaveError> {
        self.hooks
            .fire(HookPoint::BeforeRouter, &json!({"request": request}))
            .await;
        let backend = self
            .router
            .execute(request, self.runner.as_ref(), request.clone())
            .await?;
        self.hooks
            .fire(HookPoint::AfterRouter, &json!({"request": request}))
            .await;

        let fan_out = self
            .driver
            .evaluate_all(&self.critics, request, &backend)
            .await;

        self.hooks
            .fire(
                HookPoint::BeforeFusion,
                &json!({"critics": fan_out.judgments}),
            )
            .await;
        let vector = response_embedding(&backend);
        let mut decision = self
            .fusion
            .decide(fan_out.judgments, vector.as_deref())
            .await;
        self.hooks
            .fire(HookPoint::AfterFusion, &json!({"action": decision.action}))
            .await;

        // Advisory enrichment: surface the conflict mitigations without
        // touching the gated action.
        for finding in &fan_out.conflicts {
            if let Some(mitigation) = &finding.mitigation {
                if !decision.mitigations.contains(mitigation) {
                    decision.mitigations.push(mitigation.clone());
                }
            }
        }
        decision.audit = Some(AuditStamp::for_request(request));

        let mut outcome = self.apply_mode(decision);
        if let Deliberation::Decided(decision) = &mut outcome {
            self.persist_precedent(request, decision, vector).await;
        }
        Ok(outcome)
    }

    /// Govern how the fusion result is treated under the active mode.
    fn apply_mode(&self, decision: Decision) -> Deliberation {
        if decision.lex_block && self.mode.enforce_lex {
            return Deliberation::Decided(Decision {
                action: Action::Reject,
                reason: Some("rights_violation".to_string()),
                ..decision
            });
        }

        if self.mode.advisory_only {
            return Deliberation::Decided(Decision {
                action: Action::Advice,
                ..decision
            });
        }

        if decision.action == Action::Escalate && self.mode.auto_escalate {
            return Deliberation::EscalationRequired {
                reason: "Uncertainty threshold exceeded.".to_string(),
            };
        }

        Deliberation::Decided(decision)
    }

    /// Best-effort precedent persistence. A store failure never alters the
    /// decision; it is logged and forgotten.
    async fn persist_precedent(
        &self,
        request: &Value,
        decision: &mut Decision,
        embedding: Option<Vec<f32>>,
    ) {
        let Some(store) = &self.store else {
            return;
        };
        let critics = decision
            .fusion
            .as_ref()
            .map(|f| f.details.clone())
            .unwrap_or_default();
        let record = PrecedentRecord {
            id: String::new(),
            request: request.clone(),
            action: decision.action,
            confidence: decision.confidence,
            uncertainty: decision.uncertainty,
            mitigations: decision.mitigations.clone(),
            tags: build_tags(&critics, decision.action),
            critics,
            timestamp: Utc::now(),
            audit_id: decision.audit.as_ref().map(|a| a.audit_id.clone()),
            audit_hash: decision.audit.as_ref().map(|a| a.input_hash.clone()),
            embedding,
        };
        match store.store(record).await {
            Ok(id) => decision.precedent_id = Some(id),
            Err(e) => warn!(error = %e, "failed to persist precedent record"),
        }
    }
}
