//! Instrumented invocation of a single stage handler.
//!
//! The runner is the only place a handler is called. It never returns an
//! error: every invocation ends in a [`StageOutcome`] so the coordinator can
//! apply failure policy uniformly.

use crate::catalog::{StageContext, StageDescriptor};
use crate::config::PipelineSettings;
use crate::errors::StageError;
use crate::telemetry::{self, MetricsCollector, SpanStatus, StageMetrics, WorkflowHandle, WorkflowTracer};
use futures::FutureExt;
use policyflow_common::{DocumentState, StageDelta};
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// How a stage failure affects the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Fatal,
    NonFatal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageStatus {
    Completed { delta: StageDelta },
    Failed { class: FailureClass, message: String },
    TimedOut,
}

/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub stage: String,
    pub namespace: String,
    pub status: StageStatus,
    pub duration: Duration,
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, StageStatus::Completed { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.status,
            StageStatus::Failed {
                class: FailureClass::Fatal,
                ..
            }
        )
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self.status, StageStatus::TimedOut)
    }

    pub fn delta(&self) -> Option<&StageDelta> {
        match &self.status {
            StageStatus::Completed { delta } => Some(delta),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            StageStatus::Failed { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Run-wide handles a stage invocation needs.
#[derive(Clone, Copy)]
pub struct StageScope<'a> {
    pub workflow: &'a WorkflowHandle,
    pub cancel: &'a CancellationToken,
    pub metrics: &'a MetricsCollector,
    pub settings: &'a PipelineSettings,
}

pub struct StageRunner {
    tracer: Arc<dyn WorkflowTracer>,
}

impl StageRunner {
    pub fn new(tracer: Arc<dyn WorkflowTracer>) -> Self {
        Self { tracer }
    }

    /// Invoke `descriptor`'s handler on a private copy of `state`.
    ///
    /// Once the run is cancelled the handler gets `settings.stage_grace` to
    /// return; after that its future is dropped and the stage times out. A
    /// handler that panics, or returns [`StageError::Cancelled`] before the
    /// deadline, is reported as a failure of its class.
    pub async fn run(
        &self,
        scope: StageScope<'_>,
        descriptor: &StageDescriptor,
        state: &DocumentState,
    ) -> StageOutcome {
        let span = self.tracer.begin_stage(
            scope.workflow,
            &descriptor.name,
            &telemetry::input_snapshot(state),
        );
        let started = Instant::now();

        if scope.cancel.is_cancelled() {
            return self.finish(scope, descriptor, span, started, None);
        }

        let ctx = StageContext {
            workflow_id: scope.workflow.workflow_id.clone(),
            stage: descriptor.name.clone(),
            namespace: descriptor.namespace.clone(),
            mode: scope.settings.mode,
            features: scope.settings.features,
            cancel: scope.cancel.clone(),
        };

        let handler = descriptor.handler.clone();
        let invocation = AssertUnwindSafe(handler.execute(ctx, state.clone()))
            .catch_unwind()
            .map(|caught| caught.unwrap_or_else(|_| Err(StageError::failed("stage handler panicked"))))
            .instrument(tracing::info_span!(
                "stage",
                workflow_id = %scope.workflow.workflow_id,
                stage = %descriptor.name
            ));
        tokio::pin!(invocation);

        let result = tokio::select! {
            biased;
            result = &mut invocation => Some(result),
            _ = scope.cancel.cancelled() => {
                tokio::time::timeout(scope.settings.stage_grace(), &mut invocation)
                    .await
                    .ok()
            }
        };

        self.finish(scope, descriptor, span, started, result)
    }

    fn finish(
        &self,
        scope: StageScope<'_>,
        descriptor: &StageDescriptor,
        span: telemetry::StageSpan,
        started: Instant,
        result: Option<Result<StageDelta, StageError>>,
    ) -> StageOutcome {
        let duration = started.elapsed();

        let (status, span_status, output) = match result {
            Some(Ok(delta)) => {
                let items = delta.item_count();
                scope
                    .metrics
                    .record(StageMetrics::new(&descriptor.name, duration, items, true));
                let output = telemetry::sanitize(&json!({
                    "items": items,
                    "chunks": delta.chunks.len(),
                    "embeddings": delta.embeddings.len(),
                    "artifact": delta.artifact,
                }));
                (StageStatus::Completed { delta }, SpanStatus::Completed, output)
            }
            // A handler reporting cancellation only counts as a timeout when
            // the run deadline actually fired.
            Some(Err(err))
                if !(matches!(err, StageError::Cancelled) && scope.cancel.is_cancelled()) =>
            {
                scope
                    .metrics
                    .record(StageMetrics::new(&descriptor.name, duration, 0, false));
                let class = if descriptor.fatal {
                    FailureClass::Fatal
                } else {
                    FailureClass::NonFatal
                };
                let message = err.to_string();
                (
                    StageStatus::Failed {
                        class,
                        message: message.clone(),
                    },
                    SpanStatus::Failed(message.clone()),
                    json!({ "error": message }),
                )
            }
            Some(Err(_)) | None => {
                scope
                    .metrics
                    .record(StageMetrics::new(&descriptor.name, duration, 0, false));
                (StageStatus::TimedOut, SpanStatus::TimedOut, json!({}))
            }
        };

        self.tracer.end_stage(span, &output, duration, &span_status);

        StageOutcome {
            stage: descriptor.name.clone(),
            namespace: descriptor.namespace.clone(),
            status,
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StageHandler;
    use crate::telemetry::LogTracer;
    use async_trait::async_trait;
    use chrono::Utc;
    use policyflow_common::ProcessedChunk;

    struct Emit;

    #[async_trait]
    impl StageHandler for Emit {
        async fn execute(
            &self,
            ctx: StageContext,
            mut state: DocumentState,
        ) -> Result<StageDelta, StageError> {
            // Writes to the private copy must not leak back.
            state.policy_id = "mutated".into();
            Ok(StageDelta::new().with_chunks(vec![
                ProcessedChunk::text(&ctx.stage, 0, Some(1), "premium"),
                ProcessedChunk::text(&ctx.stage, 1, Some(1), "deductible"),
            ]))
        }
    }

    struct Broken;

    #[async_trait]
    impl StageHandler for Broken {
        async fn execute(&self, _: StageContext, _: DocumentState) -> Result<StageDelta, StageError> {
            Err(StageError::failed("no ruling lines found"))
        }
    }

    struct Quits;

    #[async_trait]
    impl StageHandler for Quits {
        async fn execute(&self, _: StageContext, _: DocumentState) -> Result<StageDelta, StageError> {
            Err(StageError::Cancelled)
        }
    }

    struct Cooperates;

    #[async_trait]
    impl StageHandler for Cooperates {
        async fn execute(&self, ctx: StageContext, _: DocumentState) -> Result<StageDelta, StageError> {
            ctx.cancel.cancelled().await;
            Err(StageError::Cancelled)
        }
    }

    struct Panics;

    #[async_trait]
    impl StageHandler for Panics {
        async fn execute(&self, _: StageContext, _: DocumentState) -> Result<StageDelta, StageError> {
            panic!("boom")
        }
    }

    struct Hangs;

    #[async_trait]
    impl StageHandler for Hangs {
        async fn execute(&self, _: StageContext, _: DocumentState) -> Result<StageDelta, StageError> {
            std::future::pending().await
        }
    }

    struct Fixture {
        workflow: WorkflowHandle,
        cancel: CancellationToken,
        metrics: MetricsCollector,
        settings: PipelineSettings,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                workflow: WorkflowHandle {
                    workflow_id: "wf-1".into(),
                    name: "test".into(),
                    started_at: Utc::now(),
                },
                cancel: CancellationToken::new(),
                metrics: MetricsCollector::new(),
                settings: PipelineSettings::default().with_stage_grace_ms(20),
            }
        }

        fn scope(&self) -> StageScope<'_> {
            StageScope {
                workflow: &self.workflow,
                cancel: &self.cancel,
                metrics: &self.metrics,
                settings: &self.settings,
            }
        }
    }

    fn runner() -> StageRunner {
        StageRunner::new(Arc::new(LogTracer))
    }

    #[tokio::test]
    async fn test_success_records_metrics() {
        let fx = Fixture::new();
        let state = DocumentState::new("a.pdf", "1");
        let descriptor = StageDescriptor::new("text_extraction", Arc::new(Emit));

        let outcome = runner().run(fx.scope(), &descriptor, &state).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.delta().unwrap().chunks.len(), 2);
        assert_eq!(state.policy_id, "1");
        let metrics = fx.metrics.snapshot();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].items_processed, 2);
        assert!(metrics[0].success);
    }

    #[tokio::test]
    async fn test_failure_classified_by_descriptor() {
        let fx = Fixture::new();
        let state = DocumentState::new("a.pdf", "1");

        let non_fatal = StageDescriptor::new("table_extraction", Arc::new(Broken));
        let outcome = runner().run(fx.scope(), &non_fatal, &state).await;
        assert_eq!(
            outcome.status,
            StageStatus::Failed {
                class: FailureClass::NonFatal,
                message: "no ruling lines found".into()
            }
        );

        let fatal = StageDescriptor::new("pdf_analysis", Arc::new(Broken)).fatal(true);
        let outcome = runner().run(fx.scope(), &fatal, &state).await;
        assert!(outcome.is_fatal());
        assert_eq!(fx.metrics.snapshot().iter().filter(|m| !m.success).count(), 2);
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let fx = Fixture::new();
        let descriptor = StageDescriptor::new("image_extraction", Arc::new(Panics));
        let outcome = runner()
            .run(fx.scope(), &descriptor, &DocumentState::new("a.pdf", "1"))
            .await;
        assert_eq!(outcome.error_message(), Some("stage handler panicked"));
        assert!(!outcome.is_fatal());
    }

    #[tokio::test]
    async fn test_cancellation_times_out_after_grace() {
        let fx = Fixture::new();
        let descriptor = StageDescriptor::new("embedding_generation", Arc::new(Hangs));
        let cancel = fx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let outcome = runner()
            .run(fx.scope(), &descriptor, &DocumentState::new("a.pdf", "1"))
            .await;

        assert!(outcome.is_timed_out());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_handler_cancellation_without_deadline_is_a_failure() {
        let fx = Fixture::new();
        let state = DocumentState::new("a.pdf", "1");

        let non_fatal = StageDescriptor::new("image_extraction", Arc::new(Quits));
        let outcome = runner().run(fx.scope(), &non_fatal, &state).await;
        assert_eq!(
            outcome.status,
            StageStatus::Failed {
                class: FailureClass::NonFatal,
                message: "stage observed cancellation".into()
            }
        );

        let fatal = StageDescriptor::new("pdf_analysis", Arc::new(Quits)).fatal(true);
        let outcome = runner().run(fx.scope(), &fatal, &state).await;
        assert!(outcome.is_fatal());
        assert!(!outcome.is_timed_out());
    }

    #[tokio::test]
    async fn test_cooperative_cancellation_after_deadline_times_out() {
        let fx = Fixture::new();
        let descriptor = StageDescriptor::new("embedding_generation", Arc::new(Cooperates));
        let cancel = fx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });

        let outcome = runner()
            .run(fx.scope(), &descriptor, &DocumentState::new("a.pdf", "1"))
            .await;
        assert!(outcome.is_timed_out());
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_handler() {
        let fx = Fixture::new();
        fx.cancel.cancel();
        let descriptor = StageDescriptor::new("text_extraction", Arc::new(Emit));
        let outcome = runner()
            .run(fx.scope(), &descriptor, &DocumentState::new("a.pdf", "1"))
            .await;
        assert!(outcome.is_timed_out());
    }
}
