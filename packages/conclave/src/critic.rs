//! Critic capabilities.
//!
//! A critic evaluates a request along one axis (rights, risk, fairness,
//! truth, pragmatics, ...). Critics are discovered by name at runtime: the
//! hybrid core holds a `name → runner` map, and the fan-out driver treats
//! each entry independently.
//!
//! Two capabilities exist. A [`Critic`] produces a finished judgment in one
//! call. A [`StreamingCritic`] yields model output chunk by chunk; the
//! driver accumulates the text, tracks a running confidence estimate, and
//! parses the final judgment itself. The [`CriticRunner`] tag picks the
//! path per critic.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::backend::ChunkStream;
use crate::judgment::CriticJudgment;

/// The five critics wired by default. The set itself is configuration;
/// nothing in the core depends on these names beyond defaults.
pub const DEFAULT_CRITICS: &[&str] = &["rights", "risk", "fairness", "truth", "pragmatics"];

/// A non-streaming critic: one call, one judgment.
#[async_trait]
pub trait Critic: Send + Sync {
    async fn evaluate(&self, request: &Value, backend: &Value) -> Result<CriticJudgment>;
}

/// A streaming critic: yields chunks, with a non-streaming completion as
/// the fallback path when the stream fails.
#[async_trait]
pub trait StreamingCritic: Send + Sync {
    /// Open the chunk stream for this request.
    async fn stream(&self, request: &Value, backend: &Value) -> Result<ChunkStream>;

    /// Single-shot completion used when streaming fails. Returns the raw
    /// critic text; the driver parses it.
    async fn complete(&self, request: &Value, backend: &Value) -> Result<String>;
}

/// Tagged capability: how the fan-out driver should run one critic.
#[derive(Clone)]
pub enum CriticRunner {
    Direct(Arc<dyn Critic>),
    Streaming(Arc<dyn StreamingCritic>),
}

/// The critic table the hybrid core deliberates with.
pub type CriticSet = HashMap<String, CriticRunner>;
