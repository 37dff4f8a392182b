//! Rule-based backend routing and execution.
//!
//! Routing is first-match over the declared rules: a rule matches when
//! every key/value pair in its `match` map equals the corresponding request
//! key. No rule matching falls back to the default model.
//!
//! Execution wraps the opaque backend runner with per-attempt timeouts and
//! plain retries (no backoff). Load balancing, circuit breaking, and
//! health-based fallback do not live here; a fallback chain can be layered
//! by wrapping the runner.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::{debug, error};

use crate::backend::BackendRunner;
use crate::config::{BackendConfig, RouterConfig, RoutingRule};
use crate::error::ConclaveError;
use crate::event::EventBus;
use crate::telemetry::Telemetry;

/// Whether a rule's conjunctive match map is a subset of the request.
/// Empty maps never match.
fn rule_matches(rule: &RoutingRule, request: &Value) -> bool {
    if rule.when.is_empty() {
        return false;
    }
    rule.when
        .iter()
        .all(|(key, expected)| request.get(key) == Some(expected))
}

/// Model name selected by the first matching rule, if any.
fn evaluate_rules<'a>(rules: &'a [RoutingRule], request: &Value) -> Option<&'a str> {
    rules
        .iter()
        .find(|rule| rule_matches(rule, request))
        .map(|rule| rule.use_model.as_str())
}

/// Selects a backend for each request and executes the runner against it.
#[derive(Clone)]
pub struct Router {
    config: RouterConfig,
    bus: EventBus,
    telemetry: Telemetry,
}

impl Router {
    pub fn new(config: RouterConfig, bus: EventBus, telemetry: Telemetry) -> Self {
        Self {
            config,
            bus,
            telemetry,
        }
    }

    /// Determine the backend model to use for a request.
    pub fn route(&self, request: &Value) -> &str {
        evaluate_rules(&self.config.routing_rules, request)
            .unwrap_or(self.config.default_model.as_str())
    }

    /// Execute a routed model call with retries and per-attempt timeouts.
    pub async fn execute(
        &self,
        request: &Value,
        runner: &dyn BackendRunner,
        context: Value,
    ) -> Result<Value, ConclaveError> {
        let span = self.telemetry.start_span("router.execute", context).await;

        let model = self.route(request).to_string();
        let backend = match self.config.get_backend(&model) {
            Ok(backend) => backend,
            Err(e) => {
                error!(model = %model, "routed to unconfigured backend");
                self.bus
                    .emit("router.error", json!({"error": e.to_string()}), json!({}))
                    .await;
                self.telemetry.end_span(span, "error").await;
                return Err(e);
            }
        };

        if !backend.enabled {
            self.bus
                .emit(
                    "router.no_model_available",
                    json!({"model": model, "request": request}),
                    json!({}),
                )
                .await;
            self.telemetry.end_span(span, "fallback_no_model").await;
            return Err(ConclaveError::NoModelAvailable {
                reason: format!("model '{}' is disabled", model),
            });
        }

        debug!(model = %model, "routing request");
        match self.run_backend(backend, runner, request).await {
            Ok(response) => {
                self.telemetry
                    .end_span(span, &format!("{response}"))
                    .await;
                Ok(response)
            }
            Err(e) => {
                error!(model = %model, error = %e, "backend execution failed");
                self.bus
                    .emit("router.error", json!({"error": e.to_string()}), json!({}))
                    .await;
                self.telemetry.end_span(span, "error").await;
                Err(e)
            }
        }
    }

    /// Retry loop: up to `max_retries + 1` attempts, each bounded by the
    /// backend's timeout. No backoff between attempts.
    async fn run_backend(
        &self,
        backend: &BackendConfig,
        runner: &dyn BackendRunner,
        request: &Value,
    ) -> Result<Value, ConclaveError> {
        let attempts = backend.max_retries + 1;
        let per_attempt = Duration::from_secs_f64(backend.timeout_seconds);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match timeout(per_attempt, runner.run(&backend.name, request)).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("attempt timed out after {:?}", per_attempt);
                }
            }
            // The final failure is terminal; it surfaces below instead.
            if attempt < attempts {
                self.bus
                    .emit(
                        "router.backend_retry",
                        json!({"backend": backend.name, "error": last_error}),
                        json!({}),
                    )
                    .await;
            }
        }

        Err(ConclaveError::BackendExhausted {
            backend: backend.name.clone(),
            attempts,
            last_error,
        })
    }
}
