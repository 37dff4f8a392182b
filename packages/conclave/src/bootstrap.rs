//! Wiring: build a fully initialized runtime from configs and seams.
//!
//! The bus, hook manager, and telemetry are plain values constructed here
//! and threaded through the pipeline; there are no process-wide
//! singletons. Tests build a fresh stack per case; production wires one
//! long-lived instance at startup.
//!
//! ```ignore
//! let runtime = EngineBuilder::new(router_config, Arc::new(MyRunner))
//!     .with_runtime_config(runtime_config)
//!     .with_critic("rights", CriticRunner::Streaming(Arc::new(rights)))
//!     .with_precedent_store(Arc::new(store))
//!     .build()?;
//!
//! let envelope = runtime.decide(json!({"input": "may I?"})).await;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::backend::BackendRunner;
use crate::config::{MitigationLibrary, RouterConfig, RuntimeConfig, ThresholdProfile, Thresholds};
use crate::core::HybridCore;
use crate::critic::{CriticRunner, CriticSet};
use crate::driver::CriticDriver;
use crate::error::ConclaveError;
use crate::event::EventBus;
use crate::fusion::{ConsensusFusion, CriticFusion};
use crate::hook::HookManager;
use crate::mode::ModeConfig;
use crate::precedent::{PrecedentEngine, PrecedentStore};
use crate::router::Router;
use crate::runtime::Runtime;
use crate::telemetry::Telemetry;
use crate::uncertainty::UncertaintyEngine;

pub struct EngineBuilder {
    runtime_config: RuntimeConfig,
    router_config: RouterConfig,
    runner: Arc<dyn BackendRunner>,
    critics: CriticSet,
    store: Option<Arc<dyn PrecedentStore>>,
    weights: Option<HashMap<String, f64>>,
    rights_critics: Option<HashSet<String>>,
    thresholds: Thresholds,
    mitigations: MitigationLibrary,
    bus: Option<EventBus>,
    hooks: Option<HookManager>,
}

impl EngineBuilder {
    pub fn new(router_config: RouterConfig, runner: Arc<dyn BackendRunner>) -> Self {
        Self {
            runtime_config: RuntimeConfig::default(),
            router_config,
            runner,
            critics: CriticSet::new(),
            store: None,
            weights: None,
            rights_critics: None,
            thresholds: Thresholds::default(),
            mitigations: MitigationLibrary::default(),
            bus: None,
            hooks: None,
        }
    }

    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    pub fn with_critic(mut self, name: impl Into<String>, critic: CriticRunner) -> Self {
        self.critics.insert(name.into(), critic);
        self
    }

    pub fn with_critics(mut self, critics: CriticSet) -> Self {
        self.critics = critics;
        self
    }

    pub fn with_precedent_store(mut self, store: Arc<dyn PrecedentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the fusion weights. Must be non-negative; they are not
    /// required to sum to one.
    pub fn with_weights(mut self, weights: HashMap<String, f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Override which critics get lexicographic precedence.
    pub fn with_rights_critics(mut self, critics: HashSet<String>) -> Self {
        self.rights_critics = Some(critics);
        self
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_threshold_profile(mut self, profile: ThresholdProfile) -> Self {
        self.thresholds.apply_profile(profile);
        self
    }

    pub fn with_mitigations(mut self, mitigations: MitigationLibrary) -> Self {
        self.mitigations = mitigations;
        self
    }

    /// Share an existing bus instead of creating a fresh one. Useful when
    /// listeners must be registered before the first request.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_hooks(mut self, hooks: HookManager) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn build(self) -> Result<Runtime, ConclaveError> {
        self.runtime_config.validate()?;
        self.router_config.validate()?;
        if let Some(weights) = &self.weights {
            if let Some((name, weight)) = weights.iter().find(|(_, w)| **w < 0.0) {
                return Err(ConclaveError::InvalidConfig(format!(
                    "weight for critic '{name}' is negative ({weight})"
                )));
            }
        }
        let mode = ModeConfig::named(&self.runtime_config.mode)?;

        let bus = self.bus.unwrap_or_default();
        let hooks = self.hooks.unwrap_or_default();
        let telemetry = Telemetry::new(bus.clone(), self.runtime_config.enable_telemetry);

        let router = Router::new(self.router_config, bus.clone(), telemetry.clone());
        let driver = CriticDriver::new(
            bus.clone(),
            hooks.clone(),
            self.thresholds,
            self.mitigations,
        );

        let store = if self.runtime_config.enable_precedent {
            self.store
        } else {
            None
        };
        let precedent = store
            .clone()
            .map(|s| PrecedentEngine::new(s, bus.clone(), telemetry.clone()));

        let fusion = ConsensusFusion::new(
            CriticFusion::new(self.weights, self.rights_critics, telemetry.clone()),
            UncertaintyEngine::new(mode.uncertainty_threshold, telemetry.clone()),
            precedent,
            bus.clone(),
            telemetry.clone(),
        );

        let core = HybridCore::new(
            router,
            self.critics,
            driver,
            fusion,
            mode,
            self.runner,
            store,
            bus.clone(),
            hooks.clone(),
            telemetry.clone(),
        );

        Ok(Runtime::new(
            core,
            self.runtime_config,
            bus,
            hooks,
            telemetry,
        ))
    }
}
