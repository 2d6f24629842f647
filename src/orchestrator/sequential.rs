//! Sequential fallback backend.

use crate::context::RunContext;
use crate::dag::plan;
use crate::orchestrator::{
    BackendKind, BackendStatus, Coordinator, GroupExecution, Orchestrator, PipelineResult,
    graph_available,
};
use async_trait::async_trait;
use policyflow_common::DocumentState;
use std::sync::Arc;

/// Derives the plan from the catalog on every call and awaits stages one at
/// a time. Each group is still merged as a unit.
pub struct SequentialBackend {
    coordinator: Coordinator,
}

impl SequentialBackend {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl Orchestrator for SequentialBackend {
    async fn execute(&self, ctx: &RunContext, state: DocumentState) -> PipelineResult {
        let settings = &ctx.settings;
        let plan = plan(
            self.coordinator.catalog(),
            settings.mode,
            &settings.features,
            settings.parallel_processing,
        )
        .map(Arc::new);
        self.coordinator
            .run(ctx, state, plan, GroupExecution::OneAtATime)
            .await
    }

    fn status(&self) -> BackendStatus {
        BackendStatus {
            backend: BackendKind::Sequential,
            graph_available: graph_available(),
            registered_stages: self
                .coordinator
                .catalog()
                .names()
                .into_iter()
                .map(String::from)
                .collect(),
            compiled_plans: 0,
        }
    }
}
