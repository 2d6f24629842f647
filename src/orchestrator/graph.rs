//! Compiled-graph backend.

use crate::config::{FeatureFlags, PipelineMode, PipelineSettings};
use crate::context::RunContext;
use crate::dag::{ExecutionPlan, plan};
use crate::errors::PlanningError;
use crate::orchestrator::{
    BackendKind, BackendStatus, Coordinator, GroupExecution, Orchestrator, PipelineResult,
};
use async_trait::async_trait;
use policyflow_common::DocumentState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PlanKey {
    mode: PipelineMode,
    features: FeatureFlags,
    parallel: bool,
}

impl PlanKey {
    fn of(settings: &PipelineSettings) -> Self {
        Self {
            mode: settings.mode,
            features: settings.features,
            parallel: settings.parallel_processing,
        }
    }
}

type Compiled = Result<Arc<ExecutionPlan>, PlanningError>;

/// Compiles the plan for its construction-time settings once and reuses it.
///
/// Runs with a different mode, flag set or parallel toggle compile their own
/// plan on first use; that plan is cached too. A planning error is cached
/// like a plan, so a broken catalog fails every run the same way.
pub struct GraphBackend {
    coordinator: Coordinator,
    plans: Mutex<HashMap<PlanKey, Compiled>>,
}

impl GraphBackend {
    pub fn new(coordinator: Coordinator, settings: &PipelineSettings) -> Self {
        let key = PlanKey::of(settings);
        let compiled = Self::compile(&coordinator, key);
        if let Err(err) = &compiled {
            tracing::warn!(error = %err, "Default plan failed to compile");
        }
        Self {
            coordinator,
            plans: Mutex::new(HashMap::from([(key, compiled)])),
        }
    }

    fn compile(coordinator: &Coordinator, key: PlanKey) -> Compiled {
        plan(coordinator.catalog(), key.mode, &key.features, key.parallel).map(Arc::new)
    }

    fn compiled(&self, settings: &PipelineSettings) -> Compiled {
        let key = PlanKey::of(settings);
        let mut plans = self.plans.lock().unwrap_or_else(|e| e.into_inner());
        plans
            .entry(key)
            .or_insert_with(|| {
                tracing::debug!(mode = %key.mode, parallel = key.parallel, "Compiling plan");
                Self::compile(&self.coordinator, key)
            })
            .clone()
    }

    fn compiled_count(&self) -> usize {
        self.plans.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Orchestrator for GraphBackend {
    async fn execute(&self, ctx: &RunContext, state: DocumentState) -> PipelineResult {
        let plan = self.compiled(&ctx.settings);
        self.coordinator
            .run(ctx, state, plan, GroupExecution::Concurrent)
            .await
    }

    fn status(&self) -> BackendStatus {
        BackendStatus {
            backend: BackendKind::Graph,
            graph_available: true,
            registered_stages: self
                .coordinator
                .catalog()
                .names()
                .into_iter()
                .map(String::from)
                .collect(),
            compiled_plans: self.compiled_count(),
        }
    }
}
