//! In-process async event bus.
//!
//! Every stage of a deliberation (runtime admission, routing, critic
//! streaming, fusion, telemetry) publishes named events here so an observer
//! can watch the pipeline unfold.
//!
//! # Guarantees
//!
//! - **Wait-for-all**: `emit` returns only after every listener has run
//! - **Isolation**: a failing listener never prevents other listeners from
//!   running and never propagates to the emitter
//! - **Per-listener ordering**: a listener is never re-entered before its
//!   previous invocation completes; events from a single emitter arrive in
//!   emission order
//! - **No backfill**: listeners registered after an emit do not see it
//!
//! Cross-listener ordering is unspecified: listeners for one event run
//! concurrently.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use tracing::{debug, warn};
use uuid::Uuid;

/// A structured event dispatched across subsystems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID.
    pub id: Uuid,
    /// Dotted event-type name, e.g. `runtime.request.received`.
    pub name: String,
    /// Wall-clock emission time.
    pub timestamp: DateTime<Utc>,
    /// Event-specific data.
    pub payload: Value,
    /// Optional headers (actor, request id, etc.).
    pub metadata: Value,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value, metadata: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            timestamp: Utc::now(),
            payload,
            metadata,
        }
    }
}

/// A subscriber callback. Listeners are external code; failures are isolated
/// and logged, never surfaced to the emitter.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<()>;
}

/// Adapter turning an async closure into an [`EventListener`].
pub struct FnListener<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> EventListener for FnListener<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<()>> + Send,
{
    async fn handle(&self, event: &Event) -> Result<()> {
        (self.f)(event.clone()).await
    }
}

type ListenerTable = DashMap<String, Vec<Arc<dyn EventListener>>>;

/// Central async event bus.
///
/// Cloneable; clones share the same listener table. Registration is
/// additive and safe under concurrent subscribe/emit: `broadcast` works on
/// a copy-on-read snapshot of the listener list.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<ListenerTable>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for a given event name. Registration is visible
    /// to every subsequent `emit`.
    pub fn subscribe(&self, event_name: &str, listener: Arc<dyn EventListener>) {
        self.listeners
            .entry(event_name.to_string())
            .or_default()
            .push(listener);
        debug!(event = %event_name, "listener subscribed");
    }

    /// Register an async closure as a listener.
    pub fn subscribe_fn<F, Fut>(&self, event_name: &str, f: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.subscribe(event_name, Arc::new(FnListener { f }));
    }

    /// Create and dispatch an event to all registered listeners, waiting for
    /// all of them to complete.
    pub async fn emit(&self, event_name: &str, payload: Value, metadata: Value) -> Event {
        let event = Event::new(event_name, payload, metadata);
        self.broadcast(&event).await;
        event
    }

    /// Dispatch a pre-constructed event to all listeners concurrently.
    ///
    /// Listeners run as spawned tasks: a delivery already in progress
    /// completes even if the emitting task is cancelled mid-broadcast.
    pub async fn broadcast(&self, event: &Event) {
        let snapshot: SmallVec<[Arc<dyn EventListener>; 4]> = match self.listeners.get(&event.name)
        {
            Some(entry) => entry.iter().cloned().collect(),
            None => return,
        };

        let handles: Vec<_> = snapshot
            .into_iter()
            .map(|listener| {
                let event = event.clone();
                tokio::spawn(async move { Self::safe_invoke(listener.as_ref(), &event).await })
            })
            .collect();
        join_all(handles).await;
    }

    /// Number of listeners registered for an event name.
    pub fn listener_count(&self, event_name: &str) -> usize {
        self.listeners
            .get(event_name)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    async fn safe_invoke(listener: &dyn EventListener, event: &Event) {
        if let Err(e) = listener.handle(event).await {
            warn!(event = %event.name, error = %e, "event listener failed");
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("event_names", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CollectingListener;
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_reaches_subscriber() {
        let bus = EventBus::new();
        let listener = CollectingListener::shared();
        bus.subscribe("router.error", listener.clone());

        let event = bus
            .emit("router.error", json!({"error": "boom"}), json!({}))
            .await;

        assert_eq!(event.name, "router.error");
        let seen = listener.events();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payload["error"], "boom");
    }

    #[tokio::test]
    async fn test_emit_without_listeners_is_noop() {
        let bus = EventBus::new();
        // Should not panic or block
        bus.emit("nobody.listening", json!({}), json!({})).await;
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_block_others() {
        let bus = EventBus::new();
        bus.subscribe_fn("fusion.escalate", |_| async { anyhow::bail!("listener bug") });
        let listener = CollectingListener::shared();
        bus.subscribe("fusion.escalate", listener.clone());

        bus.emit("fusion.escalate", json!({"score": 0.4}), json!({}))
            .await;

        assert_eq!(listener.events().len(), 1);
    }

    #[tokio::test]
    async fn test_single_emitter_order_is_preserved_per_listener() {
        let bus = EventBus::new();
        let listener = CollectingListener::shared();
        bus.subscribe("tick", listener.clone());

        for i in 0..10 {
            bus.emit("tick", json!({"n": i}), json!({})).await;
        }

        let ns: Vec<i64> = listener
            .events()
            .iter()
            .map(|e| e.payload["n"].as_i64().unwrap())
            .collect();
        assert_eq!(ns, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_backfill() {
        let bus = EventBus::new();
        bus.emit("tick", json!({"n": 1}), json!({})).await;

        let listener = CollectingListener::shared();
        bus.subscribe("tick", listener.clone());
        bus.emit("tick", json!({"n": 2}), json!({})).await;

        let seen = listener.events();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payload["n"], 2);
    }

    #[tokio::test]
    async fn test_clone_shares_listener_table() {
        let bus = EventBus::new();
        let other = bus.clone();
        let listener = CollectingListener::shared();
        other.subscribe("tick", listener.clone());

        bus.emit("tick", json!({}), json!({})).await;
        assert_eq!(listener.events().len(), 1);
    }

    #[tokio::test]
    async fn test_listener_count() {
        let bus = EventBus::new();
        assert_eq!(bus.listener_count("tick"), 0);
        bus.subscribe("tick", CollectingListener::shared());
        bus.subscribe("tick", CollectingListener::shared());
        assert_eq!(bus.listener_count("tick"), 2);
    }
}
