//! Document run orchestration.
//!
//! [`Orchestrator`] is the contract the batch layer and the CLI program
//! against. Two backends implement it:
//!
//! - `GraphBackend` compiles the execution plan up front and reuses it
//!   (available with the `graph` cargo feature, on by default)
//! - [`SequentialBackend`] re-plans from the catalog on every run and awaits
//!   stages one at a time
//!
//! For the same catalog, settings and initial state both yield the same
//! completed stages, the same final state content and the same terminal state.

mod coordinator;
#[cfg(feature = "graph")]
mod graph;
mod sequential;
mod state;

pub use coordinator::{Coordinator, GroupExecution};
#[cfg(feature = "graph")]
pub use graph::GraphBackend;
pub use sequential::SequentialBackend;
pub use state::{ExecutionTimer, PipelineResult, RunPhase, TerminalState};

use crate::config::PipelineSettings;
use crate::context::RunContext;
use async_trait::async_trait;
use policyflow_common::DocumentState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Graph,
    Sequential,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph => f.write_str("graph"),
            Self::Sequential => f.write_str("sequential"),
        }
    }
}

/// What a backend reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub backend: BackendKind,
    /// Whether this build carries the compiled-graph backend
    pub graph_available: bool,
    pub registered_stages: Vec<String>,
    /// Plans compiled and cached so far
    pub compiled_plans: usize,
}

/// Runs one document end to end.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn execute(&self, ctx: &RunContext, state: DocumentState) -> PipelineResult;

    fn status(&self) -> BackendStatus;
}

/// Whether the compiled-graph backend was built in.
pub fn graph_available() -> bool {
    cfg!(feature = "graph")
}

/// The graph backend when it was built in, otherwise the sequential fallback.
pub fn select_backend(
    coordinator: Coordinator,
    settings: &PipelineSettings,
) -> Arc<dyn Orchestrator> {
    #[cfg(feature = "graph")]
    {
        tracing::debug!("Using compiled graph backend");
        Arc::new(GraphBackend::new(coordinator, settings))
    }
    #[cfg(not(feature = "graph"))]
    {
        let _ = settings;
        tracing::debug!("Graph backend not built; using sequential fallback");
        Arc::new(SequentialBackend::new(coordinator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StageCatalog;
    use crate::catalog::tests::noop;
    use crate::resource::Unthrottled;
    use crate::telemetry::LogTracer;

    #[test]
    fn test_select_backend_matches_build() {
        let catalog = Arc::new(StageCatalog::policy_pipeline(|_| noop()).unwrap());
        let coordinator = Coordinator::new(catalog, Arc::new(LogTracer), Arc::new(Unthrottled));
        let backend = select_backend(coordinator, &PipelineSettings::default());
        let status = backend.status();

        assert_eq!(status.graph_available, graph_available());
        let expected = if graph_available() {
            BackendKind::Graph
        } else {
            BackendKind::Sequential
        };
        assert_eq!(status.backend, expected);
        assert_eq!(status.registered_stages.len(), 6);
    }
}
