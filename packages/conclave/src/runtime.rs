//! The operational shell around the hybrid core.
//!
//! `decide` is the public API. It admits requests through a FIFO semaphore,
//! bounds each deliberation with a total timeout, keeps the process-wide
//! counters consistent, and folds every outcome (decision, escalation,
//! error, timeout) into a decision envelope. It never returns an error to
//! the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{RwLock, Semaphore};
use tokio::time::timeout;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::core::HybridCore;
use crate::error::ConclaveError;
use crate::event::EventBus;
use crate::hook::{HookManager, HookPoint};
use crate::judgment::{Decision, DecisionEnvelope, Deliberation};
use crate::telemetry::Telemetry;

/// One entry in the request log.
#[derive(Debug, Clone, Serialize)]
pub struct LoggedRequest {
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Ephemeral process-wide execution counters. Mutated only by the runtime
/// shell; readers get a consistent [`StateSnapshot`].
pub struct RuntimeState {
    boot_time: DateTime<Utc>,
    active_tasks: AtomicUsize,
    completed_tasks: AtomicU64,
    failed_tasks: AtomicU64,
    last_healthcheck: RwLock<DateTime<Utc>>,
    request_log: RwLock<HashMap<Uuid, LoggedRequest>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub boot_time: DateTime<Utc>,
    pub active_tasks: usize,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub last_healthcheck: DateTime<Utc>,
    pub logged_requests: usize,
}

impl Default for RuntimeState {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            boot_time: now,
            active_tasks: AtomicUsize::new(0),
            completed_tasks: AtomicU64::new(0),
            failed_tasks: AtomicU64::new(0),
            last_healthcheck: RwLock::new(now),
            request_log: RwLock::new(HashMap::new()),
        }
    }
}

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn log_request(&self, id: Uuid, payload: Value) {
        self.request_log.write().await.insert(
            id,
            LoggedRequest {
                payload,
                timestamp: Utc::now(),
            },
        );
    }

    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::SeqCst)
    }

    fn increment_active(&self) {
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        // Saturating: decide only decrements what it incremented, but a
        // stray zero must never wrap.
        let _ = self
            .active_tasks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn complete(&self) {
        self.completed_tasks.fetch_add(1, Ordering::SeqCst);
    }

    fn fail(&self) {
        self.failed_tasks.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            boot_time: self.boot_time,
            active_tasks: self.active_tasks.load(Ordering::SeqCst),
            completed_tasks: self.completed_tasks.load(Ordering::SeqCst),
            failed_tasks: self.failed_tasks.load(Ordering::SeqCst),
            last_healthcheck: *self.last_healthcheck.read().await,
            logged_requests: self.request_log.read().await.len(),
        }
    }
}

/// Public entry point for deliberation requests.
pub struct Runtime {
    core: HybridCore,
    config: RuntimeConfig,
    state: Arc<RuntimeState>,
    semaphore: Arc<Semaphore>,
    bus: EventBus,
    hooks: HookManager,
    telemetry: Telemetry,
}

impl Runtime {
    pub fn new(
        core: HybridCore,
        config: RuntimeConfig,
        bus: EventBus,
        hooks: HookManager,
        telemetry: Telemetry,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks));
        Self {
            core,
            config,
            state: Arc::new(RuntimeState::new()),
            semaphore,
            bus,
            hooks,
            telemetry,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn hooks(&self) -> &HookManager {
        &self.hooks
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    /// Deliberate on one request and return a decision envelope.
    ///
    /// Callers beyond the concurrency cap wait in FIFO order. Failures of
    /// any kind (backend exhaustion, internal errors, the decision
    /// timeout) come back as `action: "error"`, never as a panic or `Err`.
    pub async fn decide(&self, request: Value) -> DecisionEnvelope {
        let id = Uuid::new_v4();
        self.state.log_request(id, request.clone()).await;

        self.bus
            .emit(
                "runtime.request.received",
                json!({"id": id, "request": request}),
                json!({}),
            )
            .await;
        self.hooks
            .fire(
                HookPoint::BeforeRuntimeStep,
                &json!({"id": id, "request": request}),
            )
            .await;

        let span = self
            .telemetry
            .start_span("runtime.decide", json!({"req_id": id}))
            .await;

        let permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                // Only possible if the semaphore was closed; treat as a
                // runtime error rather than unwinding.
                self.state.fail();
                self.telemetry.end_span(span, "error").await;
                return DecisionEnvelope {
                    id,
                    decision: Decision::errored("runtime unavailable"),
                };
            }
        };

        self.state.increment_active();
        let budget = Duration::from_secs_f64(self.config.decision_timeout);
        let outcome = timeout(budget, self.core.deliberate(&request)).await;

        let decision = match outcome {
            Ok(Ok(Deliberation::Decided(decision))) => {
                self.state.complete();
                self.hooks
                    .fire(
                        HookPoint::AfterRuntimeStep,
                        &json!({"id": id, "action": decision.action}),
                    )
                    .await;
                self.bus
                    .emit(
                        "runtime.request.completed",
                        json!({"id": id, "action": decision.action}),
                        json!({}),
                    )
                    .await;
                self.telemetry.end_span(span, decision.action.as_str()).await;
                decision
            }
            Ok(Ok(Deliberation::EscalationRequired { reason })) => {
                self.state.fail();
                info!(request_id = %id, "deliberation escalated");
                self.telemetry
                    .trace("runtime.escalation", json!({"id": id}))
                    .await;
                self.bus
                    .emit("runtime.request.escalation", json!({"id": id}), json!({}))
                    .await;
                self.telemetry.end_span(span, "escalation_required").await;
                Decision::escalated(reason)
            }
            Ok(Err(e)) => {
                self.state.fail();
                error!(request_id = %id, error = %e, "deliberation failed");
                self.telemetry
                    .trace("runtime.error", json!({"id": id, "error": e.to_string()}))
                    .await;
                self.bus
                    .emit(
                        "runtime.request.error",
                        json!({"id": id, "error": e.to_string(), "kind": e.kind()}),
                        json!({}),
                    )
                    .await;
                self.telemetry.end_span(span, "error").await;
                Decision::errored(e.to_string())
            }
            Err(_) => {
                self.state.fail();
                let e = ConclaveError::DecisionTimeout(budget);
                error!(request_id = %id, "deliberation timed out");
                self.bus
                    .emit(
                        "runtime.request.error",
                        json!({"id": id, "error": e.to_string(), "kind": e.kind()}),
                        json!({}),
                    )
                    .await;
                self.telemetry.end_span(span, "timeout").await;
                let mut decision = Decision::errored(e.to_string());
                decision.reason = Some("timeout".to_string());
                decision
            }
        };

        self.state.decrement_active();
        drop(permit);

        DecisionEnvelope { id, decision }
    }

    /// Refresh the health timestamp and return a consistent state snapshot.
    pub async fn healthcheck(&self) -> StateSnapshot {
        *self.state.last_healthcheck.write().await = Utc::now();
        self.state.snapshot().await
    }
}
