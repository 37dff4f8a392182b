//! Precedent retrieval and storage.
//!
//! Precedents are previously decided cases retrieved by vector similarity
//! from an external store. They are advisory input only: retrieval is
//! best-effort, and neither an absent store, a missing vector, nor a store
//! failure ever fails the deliberation.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::warn;

use crate::event::EventBus;
use crate::judgment::{Action, CriticJudgment};
use crate::telemetry::Telemetry;

/// Default number of precedents fetched per deliberation.
pub const DEFAULT_TOP_K: usize = 5;

/// A previously decided case returned by similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Precedent {
    pub id: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

/// The record persisted after a completed deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecedentRecord {
    pub id: String,
    pub request: Value,
    pub action: Action,
    pub confidence: f64,
    pub uncertainty: f64,
    #[serde(default)]
    pub mitigations: Vec<String>,
    #[serde(default)]
    pub critics: std::collections::HashMap<String, CriticJudgment>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// The external storage seam. Both methods may fail; callers isolate.
#[async_trait]
pub trait PrecedentStore: Send + Sync {
    async fn search_embeddings(&self, vector: &[f32], top_k: usize) -> Result<Vec<Precedent>>;

    /// Persist a record and return its id (stores may assign their own).
    async fn store(&self, record: PrecedentRecord) -> Result<String>;
}

/// Best-effort wrapper over the store.
pub struct PrecedentEngine {
    store: Arc<dyn PrecedentStore>,
    bus: EventBus,
    telemetry: Telemetry,
}

impl PrecedentEngine {
    pub fn new(store: Arc<dyn PrecedentStore>, bus: EventBus, telemetry: Telemetry) -> Self {
        Self {
            store,
            bus,
            telemetry,
        }
    }

    /// Fetch similar cases. Store failures are logged and reported as a
    /// `precedent.error` event; the result degrades to empty.
    pub async fn fetch_relevant(&self, vector: &[f32], top_k: usize) -> Vec<Precedent> {
        let span = self
            .telemetry
            .start_span("precedent.fetch", json!({"top_k": top_k}))
            .await;

        match self.store.search_embeddings(vector, top_k).await {
            Ok(results) => {
                self.telemetry
                    .end_span(span, &format!("count={}", results.len()))
                    .await;
                results
            }
            Err(e) => {
                warn!(error = %e, "precedent storage error");
                self.bus
                    .emit("precedent.error", json!({"error": e.to_string()}), json!({}))
                    .await;
                self.telemetry.end_span(span, "error").await;
                Vec::new()
            }
        }
    }
}

/// In-memory store: similarity search over records that carry embeddings,
/// recency order for those that do not. Suitable for tests and single
/// process setups; durable stores live behind the same trait elsewhere.
#[derive(Default)]
pub struct MemoryPrecedentStore {
    records: RwLock<Vec<PrecedentRecord>>,
}

impl MemoryPrecedentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl PrecedentStore for MemoryPrecedentStore {
    async fn search_embeddings(&self, vector: &[f32], top_k: usize) -> Result<Vec<Precedent>> {
        let records = self.records.read().await;
        let mut scored: Vec<(f32, &PrecedentRecord)> = records
            .iter()
            .map(|record| {
                let similarity = record
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(vector, e))
                    .unwrap_or(0.0);
                (similarity, record)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(similarity, record)| Precedent {
                id: record.id.clone(),
                outcome: record.action.to_string(),
                confidence: record.confidence,
                tags: record.tags.clone(),
                similarity: Some(similarity),
            })
            .collect())
    }

    async fn store(&self, mut record: PrecedentRecord) -> Result<String> {
        if record.id.is_empty() {
            record.id = format!("EC-{}", record.timestamp.timestamp());
        }
        let id = record.id.clone();
        self.records.write().await.push(record);
        Ok(id)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CollectingListener, FailingPrecedentStore};

    fn record(id: &str, embedding: Option<Vec<f32>>) -> PrecedentRecord {
        PrecedentRecord {
            id: id.to_string(),
            request: json!({"input": "previous case"}),
            action: Action::Proceed,
            confidence: 0.7,
            uncertainty: 0.1,
            mitigations: Vec::new(),
            critics: Default::default(),
            tags: vec!["outcome:proceed".to_string()],
            timestamp: Utc::now(),
            audit_id: None,
            audit_hash: None,
            embedding,
        }
    }

    #[tokio::test]
    async fn test_memory_store_ranks_by_similarity() {
        let store = MemoryPrecedentStore::new();
        store
            .store(record("far", Some(vec![0.0, 1.0])))
            .await
            .unwrap();
        store
            .store(record("near", Some(vec![1.0, 0.0])))
            .await
            .unwrap();

        let results = store.search_embeddings(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].id, "near");
        assert_eq!(results[1].id, "far");
    }

    #[tokio::test]
    async fn test_memory_store_respects_top_k() {
        let store = MemoryPrecedentStore::new();
        for i in 0..10 {
            store
                .store(record(&format!("case-{i}"), Some(vec![i as f32, 1.0])))
                .await
                .unwrap();
        }
        let results = store.search_embeddings(&[1.0, 0.0], 3).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_memory_store_assigns_missing_ids() {
        let store = MemoryPrecedentStore::new();
        let id = store.store(record("", None)).await.unwrap();
        assert!(id.starts_with("EC-"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_engine_returns_results() {
        let store = Arc::new(MemoryPrecedentStore::new());
        store
            .store(record("case-1", Some(vec![1.0, 0.0])))
            .await
            .unwrap();
        let bus = EventBus::new();
        let engine = PrecedentEngine::new(store, bus.clone(), Telemetry::new(bus, false));

        let results = engine.fetch_relevant(&[1.0, 0.0], DEFAULT_TOP_K).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, "proceed");
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_empty() {
        let bus = EventBus::new();
        let errors = CollectingListener::shared();
        bus.subscribe("precedent.error", errors.clone());
        let engine = PrecedentEngine::new(
            Arc::new(FailingPrecedentStore),
            bus.clone(),
            Telemetry::new(bus, false),
        );

        let results = engine.fetch_relevant(&[0.5, 0.5], DEFAULT_TOP_K).await;
        assert!(results.is_empty());
        assert_eq!(errors.events().len(), 1);
    }

    #[test]
    fn test_cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
