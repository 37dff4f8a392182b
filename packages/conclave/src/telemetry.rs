//! Telemetry emission over the event bus.
//!
//! Spans, metrics, and traces are published as regular events
//! (`telemetry.span.start`, `telemetry.span.end`, `telemetry.metric`,
//! `telemetry.trace`) so dashboards and debugging tools can subscribe
//! without a dedicated pipeline. When telemetry is disabled in config the
//! emitters become no-ops; process logging stays on `tracing` either way.
//!
//! `log_record` is an advisory bridge for pushing log-shaped payloads onto
//! the bus (`log.record`). It is an explicit call, not a logging-handler
//! capture, and nothing in the core depends on it.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::time::Instant;
use uuid::Uuid;

use crate::event::EventBus;

/// Maximum length of a span's result summary.
const RESULT_SUMMARY_MAX: usize = 500;

/// An open span. Created by [`Telemetry::start_span`], closed by
/// [`Telemetry::end_span`].
#[derive(Debug, Clone)]
pub struct Span {
    pub span_id: Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub context: Value,
    begun: Instant,
}

/// Emits spans, metrics, and traces onto the event bus.
#[derive(Debug, Clone)]
pub struct Telemetry {
    bus: EventBus,
    enabled: bool,
}

impl Telemetry {
    pub fn new(bus: EventBus, enabled: bool) -> Self {
        Self { bus, enabled }
    }

    /// Open a span and announce it on the bus.
    pub async fn start_span(&self, name: &str, context: Value) -> Span {
        let span = Span {
            span_id: Uuid::new_v4(),
            name: name.to_string(),
            started_at: Utc::now(),
            context,
            begun: Instant::now(),
        };

        if self.enabled {
            self.bus
                .emit(
                    "telemetry.span.start",
                    json!({
                        "span_id": span.span_id,
                        "name": span.name,
                        "context": span.context,
                        "timestamp": span.started_at,
                    }),
                    json!({}),
                )
                .await;
        }
        span
    }

    /// Close a span, reporting its duration and a truncated result summary.
    pub async fn end_span(&self, span: Span, result: &str) {
        if !self.enabled {
            return;
        }
        let duration = span.begun.elapsed();
        self.bus
            .emit(
                "telemetry.span.end",
                json!({
                    "span_id": span.span_id,
                    "name": span.name,
                    "duration_ms": duration.as_millis() as u64,
                    "result_summary": truncate(result, RESULT_SUMMARY_MAX),
                }),
                json!({}),
            )
            .await;
    }

    /// Emit a named metric value.
    pub async fn metric(&self, name: &str, value: f64, tags: Value) {
        if !self.enabled {
            return;
        }
        self.bus
            .emit(
                "telemetry.metric",
                json!({"name": name, "value": value, "tags": tags}),
                json!({}),
            )
            .await;
    }

    /// Emit a free-form trace message.
    pub async fn trace(&self, message: &str, details: Value) {
        if !self.enabled {
            return;
        }
        self.bus
            .emit(
                "telemetry.trace",
                json!({"message": message, "details": details}),
                json!({}),
            )
            .await;
    }

    /// Advisory log bridge: push a log-shaped record onto the bus.
    pub async fn log_record(&self, level: &str, message: &str) {
        if !self.enabled {
            return;
        }
        self.bus
            .emit(
                "log.record",
                json!({"level": level, "message": message, "timestamp": Utc::now()}),
                json!({}),
            )
            .await;
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    // Back off to a char boundary so multi-byte text cannot split a char.
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CollectingListener;

    #[tokio::test]
    async fn test_span_start_and_end_emit_events() {
        let bus = EventBus::new();
        let starts = CollectingListener::shared();
        let ends = CollectingListener::shared();
        bus.subscribe("telemetry.span.start", starts.clone());
        bus.subscribe("telemetry.span.end", ends.clone());

        let telemetry = Telemetry::new(bus, true);
        let span = telemetry.start_span("router.execute", json!({})).await;
        let span_id = span.span_id;
        telemetry.end_span(span, "ok").await;

        assert_eq!(starts.events().len(), 1);
        let end_events = ends.events();
        assert_eq!(end_events.len(), 1);
        assert_eq!(
            end_events[0].payload["span_id"],
            json!(span_id.to_string())
        );
        assert_eq!(end_events[0].payload["result_summary"], "ok");
    }

    #[tokio::test]
    async fn test_result_summary_is_truncated() {
        let bus = EventBus::new();
        let ends = CollectingListener::shared();
        bus.subscribe("telemetry.span.end", ends.clone());

        let telemetry = Telemetry::new(bus, true);
        let span = telemetry.start_span("fusion.consensus", json!({})).await;
        telemetry.end_span(span, &"x".repeat(2000)).await;

        let summary = ends.events()[0].payload["result_summary"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(summary.len(), 500);
    }

    #[tokio::test]
    async fn test_disabled_telemetry_emits_nothing() {
        let bus = EventBus::new();
        let listener = CollectingListener::shared();
        bus.subscribe("telemetry.metric", listener.clone());
        bus.subscribe("telemetry.span.start", listener.clone());

        let telemetry = Telemetry::new(bus, false);
        let span = telemetry.start_span("quiet", json!({})).await;
        telemetry.end_span(span, "done").await;
        telemetry.metric("uncertainty.score", 0.2, json!({})).await;

        assert!(listener.events().is_empty());
    }

    #[tokio::test]
    async fn test_metric_payload_shape() {
        let bus = EventBus::new();
        let listener = CollectingListener::shared();
        bus.subscribe("telemetry.metric", listener.clone());

        Telemetry::new(bus, true)
            .metric("uncertainty.score", 0.4, json!({"mode": "balanced"}))
            .await;

        let events = listener.events();
        assert_eq!(events[0].payload["name"], "uncertainty.score");
        assert_eq!(events[0].payload["value"], 0.4);
        assert_eq!(events[0].payload["tags"]["mode"], "balanced");
    }

    #[tokio::test]
    async fn test_log_record_bridge() {
        let bus = EventBus::new();
        let listener = CollectingListener::shared();
        bus.subscribe("log.record", listener.clone());

        Telemetry::new(bus, true)
            .log_record("warn", "backend latency degraded")
            .await;

        let events = listener.events();
        assert_eq!(events[0].payload["level"], "warn");
        assert_eq!(events[0].payload["message"], "backend latency degraded");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "é".repeat(400); // 2 bytes per char, 800 bytes
        let out = truncate(&s, 501);
        assert!(out.len() <= 501);
        assert!(out.chars().all(|c| c == 'é'));
    }
}
