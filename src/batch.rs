//! Bounded-concurrency batch runs.

use crate::context::RunContext;
use crate::orchestrator::{ExecutionTimer, Orchestrator, PipelineResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info};

/// Runs many documents through one orchestrator, at most `max_concurrent`
/// at a time.
pub struct BatchCoordinator {
    orchestrator: Arc<dyn Orchestrator>,
}

impl BatchCoordinator {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Execute every context and return one result per context, in input order.
    ///
    /// Each run is its own task with its own state. A run that panics yields a
    /// failed result; the other runs are unaffected. A limit of 0 is treated
    /// as 1.
    pub async fn run_all(
        &self,
        contexts: Vec<RunContext>,
        max_concurrent: usize,
    ) -> Vec<PipelineResult> {
        let limit = max_concurrent.max(1);
        info!(documents = contexts.len(), max_concurrent = limit, "Batch started");

        let timer = ExecutionTimer::start();
        let semaphore = Arc::new(Semaphore::new(limit));

        let handles: Vec<_> = contexts
            .into_iter()
            .map(|ctx| {
                let semaphore = semaphore.clone();
                let orchestrator = self.orchestrator.clone();
                let fallback = ctx.initial_state();
                let handle = tokio::spawn(async move {
                    // The semaphore is never closed.
                    let _permit = semaphore.acquire_owned().await.ok();
                    let state = ctx.initial_state();
                    orchestrator.execute(&ctx, state).await
                });
                (handle, fallback)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (index, (handle, fallback)) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(result) => results.push(result),
                Err(err) => {
                    error!(index, error = %err, "Batch run aborted");
                    results.push(PipelineResult::aborted(
                        fallback,
                        format!("run aborted: {}", err),
                        Duration::ZERO,
                    ));
                }
            }
        }

        info!(
            documents = results.len(),
            succeeded = results.iter().filter(|r| r.success).count(),
            elapsed_ms = timer.elapsed().as_millis() as u64,
            "Batch finished"
        );
        results
    }
}

/// Totals over a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage
    pub success_rate: f64,
    pub total_processing_secs: f64,
    pub average_processing_secs: f64,
}

impl BatchSummary {
    pub fn from_results(results: &[PipelineResult]) -> Self {
        if results.is_empty() {
            return Self::default();
        }
        let total_files = results.len();
        let successful = results.iter().filter(|r| r.success).count();
        let total_processing_secs: f64 = results.iter().map(|r| r.elapsed.as_secs_f64()).sum();
        Self {
            total_files,
            successful,
            failed: total_files - successful,
            success_rate: successful as f64 / total_files as f64 * 100.0,
            total_processing_secs,
            average_processing_secs: total_processing_secs / total_files as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineSettings;
    use crate::context::DocumentInput;
    use crate::orchestrator::{BackendKind, BackendStatus, TerminalState};
    use async_trait::async_trait;
    use policyflow_common::DocumentState;

    /// Succeeds unless the policy id is "panic", in which case it panics.
    struct Scripted;

    #[async_trait]
    impl Orchestrator for Scripted {
        async fn execute(&self, ctx: &RunContext, state: DocumentState) -> PipelineResult {
            if ctx.document.policy_id == "panic" {
                panic!("handler bug");
            }
            let mut result = PipelineResult::aborted(state, "unused", Duration::from_millis(10));
            result.success = true;
            result.error_message = None;
            result.terminal = TerminalState::Completed;
            result
        }

        fn status(&self) -> BackendStatus {
            BackendStatus {
                backend: BackendKind::Sequential,
                graph_available: false,
                registered_stages: Vec::new(),
                compiled_plans: 0,
            }
        }
    }

    fn ctx(policy_id: &str) -> RunContext {
        RunContext::new(
            DocumentInput::new(format!("{policy_id}.pdf"), policy_id),
            PipelineSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_results_in_input_order_and_panic_isolated() {
        let batch = BatchCoordinator::new(Arc::new(Scripted));
        let results = batch
            .run_all(vec![ctx("a"), ctx("panic"), ctx("c")], 2)
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].final_state.policy_id, "a");
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[1].error_message.as_deref().unwrap().starts_with("run aborted"));
        assert_eq!(results[1].final_state.policy_id, "panic");
        assert!(results[2].success);
    }

    #[tokio::test]
    async fn test_zero_limit_still_runs() {
        let batch = BatchCoordinator::new(Arc::new(Scripted));
        let results = batch.run_all(vec![ctx("a")], 0).await;
        assert!(results[0].success);
    }

    #[test]
    fn test_summary() {
        let ok = |id: &str| {
            let mut r = PipelineResult::aborted(
                DocumentState::new("x.pdf", id),
                "x",
                Duration::from_secs(2),
            );
            r.success = true;
            r
        };
        let bad = PipelineResult::aborted(DocumentState::new("y.pdf", "3"), "x", Duration::from_secs(4));

        let summary = BatchSummary::from_results(&[ok("1"), ok("2"), bad]);
        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        assert!((summary.success_rate - 66.666).abs() < 0.01);
        assert_eq!(summary.total_processing_secs, 8.0);
        assert!((summary.average_processing_secs - 8.0 / 3.0).abs() < 1e-9);

        assert_eq!(BatchSummary::from_results(&[]), BatchSummary::default());
    }
}
