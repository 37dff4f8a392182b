//! # Conclave
//!
//! A constitutional deliberation engine: every request is judged by a
//! panel of independent critics in parallel, and their judgments are fused
//! into a single decision under a lexicographic safety rule, a principled
//! uncertainty score, and a mode gate.
//!
//! ## Core Concepts
//!
//! Conclave separates **judgment** from **authority**:
//! - Critics judge: each evaluates one axis (rights, risk, fairness,
//!   truth, pragmatics) and nothing else
//! - Fusion decides: lexicographic precedence first, weighted
//!   scalarization second, uncertainty on top
//! - Modes define authority: whether blocks are enforced, whether
//!   escalation is automatic, whether the system may only advise
//!
//! The key invariant: **a rights violation dominates every other signal**.
//! No weighted score, however high, outruns a lexicographic block.
//!
//! ## Architecture
//!
//! ```text
//! caller
//!     │
//!     ▼ decide()
//! Runtime ── semaphore admission, decision timeout, state counters
//!     │
//!     ▼ deliberate()
//! HybridCore
//!     │
//!     ├─► Router.execute ──► backend runner (external)
//!     │
//!     ├─► CriticDriver ──► critics fan out in parallel
//!     │        │               streaming events per critic
//!     │        ▼
//!     │   {critic → judgment}
//!     │
//!     ├─► ConsensusFusion
//!     │        ├─► CriticFusion     (lex block | weighted aggregate)
//!     │        ├─► PrecedentEngine  (best-effort vector retrieval)
//!     │        └─► UncertaintyEngine
//!     │
//!     └─► mode gate ──► Decided(decision) | EscalationRequired
//!
//! EventBus ◄── every stage publishes lifecycle events
//! ```
//!
//! ## Guarantees
//!
//! - **`decide` never raises**: every failure folds into an envelope with
//!   an `action` field
//! - **Critic isolation**: one failing critic degrades to a zero-filled
//!   judgment; the others are unaffected
//! - **Listener isolation**: a failing subscriber never reaches the emitter
//! - **Bounded admission**: at most `max_concurrent_tasks` deliberations
//!   run at once; the rest wait in FIFO order
//!
//! Escalation is control flow, not an error: it travels as an explicit
//! outcome variant from the mode gate to the runtime.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use conclave::{CriticRunner, EngineBuilder, RouterConfig, RuntimeConfig};
//!
//! let router_config: RouterConfig = serde_json::from_str(config_json)?;
//!
//! let runtime = EngineBuilder::new(router_config, Arc::new(MyBackend))
//!     .with_runtime_config(RuntimeConfig::default())
//!     .with_critic("rights", CriticRunner::Streaming(Arc::new(rights_critic)))
//!     .with_critic("risk", CriticRunner::Streaming(Arc::new(risk_critic)))
//!     .build()?;
//!
//! runtime.bus().subscribe_fn("fusion.escalate", |event| async move {
//!     println!("escalated: {}", event.payload);
//!     Ok(())
//! });
//!
//! let envelope = runtime.decide(serde_json::json!({"input": "may I?"})).await;
//! println!("{} ({})", envelope.decision.action, envelope.id);
//! ```

// Core modules
mod audit;
mod backend;
mod bootstrap;
mod config;
mod core;
mod critic;
mod driver;
mod error;
mod event;
mod fusion;
mod hook;
mod judgment;
mod mode;
mod parse;
mod precedent;
mod router;
mod runtime;
mod telemetry;
mod uncertainty;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export the bus and hook seams
pub use crate::event::{Event, EventBus, EventListener, FnListener};
pub use crate::hook::{FnHook, Hook, HookManager, HookPoint};
pub use crate::telemetry::{Span, Telemetry};

// Re-export configuration
pub use crate::config::{
    BackendConfig, MitigationLibrary, MitigationTemplates, RouterConfig, RoutingRule,
    RuntimeConfig, ThresholdProfile, Thresholds,
};
pub use crate::mode::ModeConfig;

// Re-export the collaborator seams
pub use crate::backend::{
    response_content, response_embedding, BackendChunk, BackendRunner, ChunkStream,
};
pub use crate::critic::{Critic, CriticRunner, CriticSet, StreamingCritic, DEFAULT_CRITICS};
pub use crate::precedent::{
    MemoryPrecedentStore, Precedent, PrecedentEngine, PrecedentRecord, PrecedentStore,
    DEFAULT_TOP_K,
};

// Re-export the pipeline
pub use crate::audit::{build_tags, AuditStamp};
pub use crate::bootstrap::EngineBuilder;
pub use crate::core::HybridCore;
pub use crate::driver::{ConflictFinding, CriticDriver, FanOut, Severity};
pub use crate::error::ConclaveError;
pub use crate::fusion::{ConsensusFusion, CriticFusion};
pub use crate::judgment::{
    Action, CriticJudgment, Decision, DecisionEnvelope, Deliberation, FusionOutcome,
    UncertaintyOutcome,
};
pub use crate::parse::{
    confidence_from_logprobs, heuristic_confidence, parse_critic_output, LOW_CONFIDENCE_MARKERS,
    PROTECTED_CLASSES, UNCERTAINTY_TERMS,
};
pub use crate::router::Router;
pub use crate::runtime::{LoggedRequest, Runtime, RuntimeState, StateSnapshot};
pub use crate::uncertainty::UncertaintyEngine;
