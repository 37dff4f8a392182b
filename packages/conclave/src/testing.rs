//! Test doubles for the deliberation core.
//!
//! Scripted critics, backend runners with programmable failure behavior,
//! and a collecting event listener. Available to downstream crates with the
//! `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! conclave = { version = "0.1", features = ["testing"] }
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use serde_json::Value;

use crate::backend::{BackendChunk, BackendRunner, ChunkStream};
use crate::critic::{Critic, StreamingCritic};
use crate::event::{Event, EventListener};
use crate::judgment::CriticJudgment;
use crate::precedent::{Precedent, PrecedentRecord, PrecedentStore};

/// Judgment literal with the fields tests care about.
pub fn judgment(score: f64, confidence: f64, violation: bool) -> CriticJudgment {
    CriticJudgment {
        score,
        confidence,
        violation,
        ..Default::default()
    }
}

// =============================================================================
// Critics
// =============================================================================

/// Returns the same judgment every time.
pub struct ScriptedCritic {
    judgment: CriticJudgment,
}

impl ScriptedCritic {
    pub fn new(judgment: CriticJudgment) -> Self {
        Self { judgment }
    }

    pub fn scoring(score: f64, confidence: f64) -> Self {
        Self::new(judgment(score, confidence, false))
    }
}

#[async_trait]
impl Critic for ScriptedCritic {
    async fn evaluate(&self, _request: &Value, _backend: &Value) -> Result<CriticJudgment> {
        Ok(self.judgment.clone())
    }
}

/// Always fails.
pub struct FailingCritic;

#[async_trait]
impl Critic for FailingCritic {
    async fn evaluate(&self, _request: &Value, _backend: &Value) -> Result<CriticJudgment> {
        bail!("scripted critic failure")
    }
}

/// Never returns; used to exercise timeouts and cancellation.
pub struct HangingCritic;

#[async_trait]
impl Critic for HangingCritic {
    async fn evaluate(&self, _request: &Value, _backend: &Value) -> Result<CriticJudgment> {
        futures::future::pending().await
    }
}

/// Returns a judgment after a fixed delay; used by concurrency tests.
pub struct SlowCritic {
    judgment: CriticJudgment,
    delay: Duration,
}

impl SlowCritic {
    pub fn new(judgment: CriticJudgment, delay: Duration) -> Self {
        Self { judgment, delay }
    }
}

#[async_trait]
impl Critic for SlowCritic {
    async fn evaluate(&self, _request: &Value, _backend: &Value) -> Result<CriticJudgment> {
        tokio::time::sleep(self.delay).await;
        Ok(self.judgment.clone())
    }
}

/// Streams scripted chunks, optionally failing at a chosen point, with an
/// optional scripted completion for the fallback path.
pub struct ScriptedStreamCritic {
    chunks: Vec<BackendChunk>,
    fail_after: Option<usize>,
    fail_open: bool,
    completion: Option<String>,
}

impl ScriptedStreamCritic {
    pub fn new(chunks: Vec<BackendChunk>) -> Self {
        Self {
            chunks,
            fail_after: None,
            fail_open: false,
            completion: None,
        }
    }

    /// Yield `n` chunks, then fail the stream.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Fail to open the stream at all.
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn with_completion(mut self, text: impl Into<String>) -> Self {
        self.completion = Some(text.into());
        self
    }
}

#[async_trait]
impl StreamingCritic for ScriptedStreamCritic {
    async fn stream(&self, _request: &Value, _backend: &Value) -> Result<ChunkStream> {
        if self.fail_open {
            bail!("scripted stream open failure")
        }
        let mut items: Vec<Result<BackendChunk>> = self
            .chunks
            .iter()
            .take(self.fail_after.unwrap_or(self.chunks.len()))
            .cloned()
            .map(Ok)
            .collect();
        if self.fail_after.is_some() {
            items.push(Err(anyhow!("scripted stream failure")));
        }
        Ok(stream::iter(items).boxed())
    }

    async fn complete(&self, _request: &Value, _backend: &Value) -> Result<String> {
        self.completion
            .clone()
            .ok_or_else(|| anyhow!("no completion scripted"))
    }
}

// =============================================================================
// Backend runners
// =============================================================================

/// Always returns the same response, counting calls.
pub struct StaticRunner {
    response: Value,
    calls: AtomicU32,
}

impl StaticRunner {
    pub fn new(response: Value) -> Self {
        Self {
            response,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendRunner for StaticRunner {
    async fn run(&self, _model: &str, _request: &Value) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// Fails the first `failures` calls, then succeeds.
pub struct FlakyRunner {
    failures_remaining: AtomicU32,
    response: Value,
    calls: AtomicU32,
}

impl FlakyRunner {
    pub fn new(failures: u32, response: Value) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
            response,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendRunner for FlakyRunner {
    async fn run(&self, _model: &str, _request: &Value) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let still_failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if still_failing {
            bail!("scripted backend failure")
        }
        Ok(self.response.clone())
    }
}

/// Never returns; used to exercise per-attempt timeouts.
pub struct HangingRunner;

#[async_trait]
impl BackendRunner for HangingRunner {
    async fn run(&self, _model: &str, _request: &Value) -> Result<Value> {
        futures::future::pending().await
    }
}

// =============================================================================
// Precedent store
// =============================================================================

/// Both operations fail; exercises the best-effort paths.
pub struct FailingPrecedentStore;

#[async_trait]
impl PrecedentStore for FailingPrecedentStore {
    async fn search_embeddings(&self, _vector: &[f32], _top_k: usize) -> Result<Vec<Precedent>> {
        bail!("scripted storage failure")
    }

    async fn store(&self, _record: PrecedentRecord) -> Result<String> {
        bail!("scripted storage failure")
    }
}

// =============================================================================
// Listeners
// =============================================================================

/// Records every event it observes.
#[derive(Default)]
pub struct CollectingListener {
    events: Mutex<Vec<Event>>,
}

impl CollectingListener {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("listener mutex poisoned").clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.name).collect()
    }
}

#[async_trait]
impl EventListener for CollectingListener {
    async fn handle(&self, event: &Event) -> Result<()> {
        self.events
            .lock()
            .expect("listener mutex poisoned")
            .push(event.clone());
        Ok(())
    }
}
