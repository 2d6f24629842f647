//! Drives one document run from plan to result.
//!
//! Both backends hand their plan to the same [`Coordinator`]; they differ
//! only in where the plan comes from and in whether a group's stages are
//! awaited together or one after another. Either way every stage of a group
//! sees the same base state and the group is merged once, after it drains.

use crate::catalog::{StageCatalog, StageDescriptor};
use crate::config::ResourceBudget;
use crate::context::RunContext;
use crate::dag::ExecutionPlan;
use crate::errors::{PipelineError, PlanningError};
use crate::merge::merge;
use crate::orchestrator::state::{ExecutionTimer, PipelineResult, RunPhase, TerminalState};
use crate::resource::ResourceMonitor;
use crate::runner::{StageOutcome, StageRunner, StageScope};
use crate::telemetry::{MetricsCollector, WorkflowHandle, WorkflowTracer};
use futures::future::join_all;
use policyflow_common::{ChunkType, DocumentState, ProcessingStatus};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How the stages of a multi-stage group are awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupExecution {
    /// Join all stages of the group at once when parallel processing is on.
    Concurrent,
    /// Await each stage before starting the next.
    OneAtATime,
}

/// Shared collaborators of a run.
#[derive(Clone)]
pub struct Coordinator {
    catalog: Arc<StageCatalog>,
    tracer: Arc<dyn WorkflowTracer>,
    monitor: Arc<dyn ResourceMonitor>,
}

/// Why the group loop stopped early.
enum Stop {
    Fatal(PipelineError),
    Timeout,
}

impl Coordinator {
    pub fn new(
        catalog: Arc<StageCatalog>,
        tracer: Arc<dyn WorkflowTracer>,
        monitor: Arc<dyn ResourceMonitor>,
    ) -> Self {
        Self {
            catalog,
            tracer,
            monitor,
        }
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    /// Execute `plan` for `ctx`, starting from `state`.
    pub async fn run(
        &self,
        ctx: &RunContext,
        mut state: DocumentState,
        plan: Result<Arc<ExecutionPlan>, PlanningError>,
        execution: GroupExecution,
    ) -> PipelineResult {
        let timer = ExecutionTimer::start();
        let settings = &ctx.settings;
        let metrics = MetricsCollector::new();
        let workflow = self.tracer.begin_workflow(
            &state.workflow_id,
            "policy_pipeline",
            &json!({
                "file_name": state.file_name,
                "policy_id": state.policy_id,
                "mode": settings.mode,
                "parallel": settings.parallel_processing,
            }),
        );
        let mut phase = RunPhase::Planning;

        let plan = match plan {
            Ok(plan) => plan,
            Err(err) => {
                let err = PipelineError::from(err);
                warn!(workflow_id = %state.workflow_id, error = %err, "Planning failed");
                return self.finish(
                    state,
                    Vec::new(),
                    Vec::new(),
                    Some((TerminalState::Failed, "planning".to_string(), err.to_string())),
                    &metrics,
                    &[],
                    &workflow,
                    &timer,
                );
            }
        };

        if let Err(err) = state.transition(ProcessingStatus::Processing, "planning") {
            let stage = state.current_stage().to_string();
            return self.finish(
                state,
                Vec::new(),
                Vec::new(),
                Some((TerminalState::Failed, stage, err.to_string())),
                &metrics,
                &[],
                &workflow,
                &timer,
            );
        }

        let cancel = CancellationToken::new();
        let deadline = settings.timeout();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                cancel.cancel();
            })
        };

        let runner = StageRunner::new(self.tracer.clone());
        let scope = StageScope {
            workflow: &workflow,
            cancel: &cancel,
            metrics: &metrics,
            settings,
        };

        let total = plan.group_count();
        let mut stages_completed: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut stop: Option<Stop> = None;

        for (index, group) in plan.groups().iter().enumerate() {
            if cancel.is_cancelled() {
                stop = Some(Stop::Timeout);
                break;
            }
            phase = RunPhase::Running { group: index };
            debug!(workflow_id = %state.workflow_id, ?phase, stages = ?group.stages, "Starting group");

            if let Some(warning) = self.wait_for_resources(&settings.resources, &cancel).await {
                warnings.push(warning);
            }

            let descriptors: Vec<&StageDescriptor> = group
                .stages
                .iter()
                .filter_map(|name| self.catalog.get(name))
                .collect();

            let concurrent = execution == GroupExecution::Concurrent
                && settings.parallel_processing
                && descriptors.len() > 1;

            let outcomes: Vec<StageOutcome> = if concurrent {
                join_all(descriptors.iter().map(|d| runner.run(scope, d, &state))).await
            } else {
                let mut outcomes = Vec::with_capacity(descriptors.len());
                for descriptor in &descriptors {
                    outcomes.push(runner.run(scope, descriptor, &state).await);
                }
                outcomes
            };

            // Only groups merged before the deadline count, even if every
            // stage returned inside its grace period.
            if cancel.is_cancelled() || outcomes.iter().any(StageOutcome::is_timed_out) {
                stop = Some(Stop::Timeout);
                break;
            }

            if let Some(fatal) = outcomes.iter().find(|o| o.is_fatal()) {
                stop = Some(Stop::Fatal(PipelineError::FatalStage {
                    stage: fatal.stage.clone(),
                    message: fatal.error_message().unwrap_or_default().to_string(),
                }));
                break;
            }

            for outcome in outcomes.iter().filter(|o| !o.is_success()) {
                let warning = PipelineError::NonFatalStage {
                    stage: outcome.stage.clone(),
                    message: outcome.error_message().unwrap_or_default().to_string(),
                }
                .to_string();
                warn!(workflow_id = %state.workflow_id, "{}", warning);
                state.push_diagnostic(warning.clone());
                warnings.push(warning);
            }

            state = merge(state, &outcomes);
            for outcome in outcomes.iter().filter(|o| o.is_success()) {
                if let Err(err) = state.transition(ProcessingStatus::Processing, &outcome.stage) {
                    warn!(error = %err, "Could not advance current stage");
                }
                stages_completed.push(outcome.stage.clone());
            }

            ctx.report_progress(
                &format!(
                    "Group {}/{} done: {}",
                    index + 1,
                    total,
                    group.stages.join(", ")
                ),
                (index + 1) as f64 / total as f64 * 100.0,
            );
        }

        watcher.abort();

        let failure = match stop {
            None => None,
            Some(Stop::Fatal(err)) => {
                let stage = match &err {
                    PipelineError::FatalStage { stage, .. } => stage.clone(),
                    _ => state.current_stage().to_string(),
                };
                Some((TerminalState::Failed, stage, err.to_string()))
            }
            Some(Stop::Timeout) => {
                let err = PipelineError::Timeout {
                    seconds: settings.timeout_seconds,
                };
                let stage = state.current_stage().to_string();
                Some((TerminalState::TimedOut, stage, err.to_string()))
            }
        };

        let order = plan.stage_order();
        debug!(workflow_id = %state.workflow_id, ?phase, "Group loop finished");
        self.finish(
            state,
            stages_completed,
            warnings,
            failure,
            &metrics,
            &order,
            &workflow,
            &timer,
        )
    }

    /// Poll the resource monitor, sleeping between polls while it asks for a
    /// pause. Gives up after `max_pause_retries` sleeps and returns a warning.
    async fn wait_for_resources(
        &self,
        budget: &ResourceBudget,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let mut decision = self.monitor.should_pause();
        let mut retries = 0;

        while decision.pause {
            if retries >= budget.max_pause_retries {
                let warning = PipelineError::ResourceExhausted {
                    attempts: retries,
                    reason: decision.reason,
                }
                .to_string();
                warn!("{}; proceeding anyway", warning);
                return Some(warning);
            }
            retries += 1;
            info!(
                reason = %decision.reason,
                retry = retries,
                "Resources constrained, pausing {}ms",
                budget.pause_interval_ms
            );
            tokio::select! {
                _ = tokio::time::sleep(budget.pause_interval()) => {}
                _ = cancel.cancelled() => return None,
            }
            decision = self.monitor.should_pause();
        }

        None
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        mut state: DocumentState,
        stages_completed: Vec<String>,
        warnings: Vec<String>,
        failure: Option<(TerminalState, String, String)>,
        metrics: &MetricsCollector,
        order: &[&str],
        workflow: &WorkflowHandle,
        timer: &ExecutionTimer,
    ) -> PipelineResult {
        let (terminal, error_message) = match failure {
            None => {
                log_chunk_statistics(&state);
                if let Err(err) = state.transition(ProcessingStatus::Completed, "completed") {
                    warn!(error = %err, "Could not mark run completed");
                }
                (TerminalState::Completed, None)
            }
            Some((terminal, stage, message)) => {
                if let Err(err) = state.fail(&stage, message.clone()) {
                    state.push_diagnostic(err.to_string());
                }
                (terminal, Some(message))
            }
        };

        let performance_metrics = metrics.report(order);
        self.tracer.log_metrics(workflow, &performance_metrics.to_map());

        let elapsed = timer.elapsed();
        let phase = RunPhase::from(terminal);
        info!(
            workflow_id = %state.workflow_id,
            ?phase,
            stages = stages_completed.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Run finished"
        );

        PipelineResult {
            success: terminal == TerminalState::Completed,
            workflow_id: state.workflow_id.clone(),
            file_path: state.file_path.clone(),
            elapsed,
            stages_completed,
            final_state: state,
            error_message,
            warnings,
            terminal,
            performance_metrics,
        }
    }
}

fn log_chunk_statistics(state: &DocumentState) {
    let counts = state.chunk_type_counts();
    let count = |t| counts.get(&t).copied().unwrap_or(0);
    let embedded = state
        .processed_chunks
        .iter()
        .filter(|c| c.has_embedding())
        .count();
    info!(
        workflow_id = %state.workflow_id,
        total = state.total_chunks(),
        text = count(ChunkType::Text),
        table = count(ChunkType::Table),
        image = count(ChunkType::Image),
        embedded,
        "Chunk statistics"
    );
}
