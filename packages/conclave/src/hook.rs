//! Lifecycle hooks around the major deliberation stages.
//!
//! Unlike the event bus, hooks fire at a **fixed set of named points**:
//! registering under any other name fails synchronously. Hooks receive a
//! copy of the context map; their writes are discarded. Systems that need
//! to aggregate observations should subscribe to the event bus instead.
//!
//! Hook failures are isolated and logged, never surfaced to the caller.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::error::ConclaveError;

/// The closed set of hook points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    BeforeRouter,
    AfterRouter,
    BeforeCritic,
    AfterCritic,
    BeforeFusion,
    AfterFusion,
    BeforeRuntimeStep,
    AfterRuntimeStep,
}

impl HookPoint {
    pub const ALL: [HookPoint; 8] = [
        HookPoint::BeforeRouter,
        HookPoint::AfterRouter,
        HookPoint::BeforeCritic,
        HookPoint::AfterCritic,
        HookPoint::BeforeFusion,
        HookPoint::AfterFusion,
        HookPoint::BeforeRuntimeStep,
        HookPoint::AfterRuntimeStep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeRouter => "before_router",
            Self::AfterRouter => "after_router",
            Self::BeforeCritic => "before_critic",
            Self::AfterCritic => "after_critic",
            Self::BeforeFusion => "before_fusion",
            Self::AfterFusion => "after_fusion",
            Self::BeforeRuntimeStep => "before_runtime_step",
            Self::AfterRuntimeStep => "after_runtime_step",
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookPoint {
    type Err = ConclaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ConclaveError::UnknownHookPoint(s.to_string()))
    }
}

/// A hook callback. Each invocation receives its own copy of the context.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn run(&self, context: Value) -> Result<()>;
}

/// Adapter turning an async closure into a [`Hook`].
pub struct FnHook<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Hook for FnHook<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<()>> + Send,
{
    async fn run(&self, context: Value) -> Result<()> {
        (self.f)(context).await
    }
}

/// Registration table and dispatcher for the fixed hook points.
#[derive(Clone, Default)]
pub struct HookManager {
    hooks: Arc<DashMap<HookPoint, Vec<Arc<dyn Hook>>>>,
}

impl HookManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook at a known point.
    pub fn register(&self, point: HookPoint, hook: Arc<dyn Hook>) {
        self.hooks.entry(point).or_default().push(hook);
        debug!(hook = %point, "hook registered");
    }

    /// Register a hook by point name. Unknown names fail synchronously.
    pub fn register_named(&self, name: &str, hook: Arc<dyn Hook>) -> Result<(), ConclaveError> {
        let point = name.parse::<HookPoint>()?;
        self.register(point, hook);
        Ok(())
    }

    /// Register an async closure at a known point.
    pub fn register_fn<F, Fut>(&self, point: HookPoint, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.register(point, Arc::new(FnHook { f }));
    }

    /// Invoke every hook registered at `point` concurrently, each with its
    /// own copy of `context`, and wait for all of them.
    ///
    /// Hooks run as spawned tasks: an invocation already in progress
    /// completes even if the firing task is cancelled.
    pub async fn fire(&self, point: HookPoint, context: &Value) {
        let snapshot: SmallVec<[Arc<dyn Hook>; 4]> = match self.hooks.get(&point) {
            Some(entry) => entry.iter().cloned().collect(),
            None => return,
        };

        let handles: Vec<_> = snapshot
            .into_iter()
            .map(|hook| {
                let context = context.clone();
                tokio::spawn(async move { Self::safe_invoke(hook.as_ref(), point, context).await })
            })
            .collect();
        join_all(handles).await;
    }

    async fn safe_invoke(hook: &dyn Hook, point: HookPoint, context: Value) {
        if let Err(e) = hook.run(context).await {
            warn!(hook = %point, error = %e, "hook failed");
        }
    }
}

impl fmt::Debug for HookManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookManager")
            .field("points_in_use", &self.hooks.len())
            .finish()
    }
}
