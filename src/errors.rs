//! Typed error hierarchy for the policyflow orchestrator.
//!
//! Three enums cover the three layers:
//! - `PlanningError`: the stage catalog or the active-stage graph is invalid
//! - `StageError`: what a stage handler returns when it cannot finish
//! - `PipelineError`: the run-level taxonomy surfaced in `PipelineResult`

use thiserror::Error;

/// Errors raised while building the stage graph or an execution plan.
///
/// Planning errors abort a run before any stage executes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("Cycle detected in stage dependencies. Involved stages: {stages:?}")]
    Cycle { stages: Vec<String> },

    #[error("Unknown dependency '{dependency}' in stage '{stage}': no stage with that name is registered")]
    UnknownDependency { stage: String, dependency: String },

    #[error("Duplicate stage name: {0}")]
    DuplicateStage(String),

    #[error("Namespace '{namespace}' is written by both '{first}' and '{second}'")]
    DuplicateNamespace {
        namespace: String,
        first: String,
        second: String,
    },
}

/// Failure reported by a stage handler.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),

    #[error("stage observed cancellation")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StageError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Run-level error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("fatal stage '{stage}' failed: {message}")]
    FatalStage { stage: String, message: String },

    #[error("stage '{stage}' failed (non-fatal): {message}")]
    NonFatalStage { stage: String, message: String },

    #[error("resources still constrained after {attempts} checks: {reason}")]
    ResourceExhausted { attempts: u32, reason: String },

    #[error("timeout: run exceeded {seconds}s budget")]
    Timeout { seconds: u64 },
}

impl PipelineError {
    /// Whether this error ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Planning(_) | Self::FatalStage { .. } | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planning_error_cycle_lists_stages() {
        let err = PlanningError::Cycle {
            stages: vec!["a".into(), "b".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Cycle"));
        assert!(msg.contains("\"a\""));
    }

    #[test]
    fn unknown_dependency_carries_both_names() {
        let err = PlanningError::UnknownDependency {
            stage: "markdown_conversion".into(),
            dependency: "layout".into(),
        };
        match &err {
            PlanningError::UnknownDependency { stage, dependency } => {
                assert_eq!(stage, "markdown_conversion");
                assert_eq!(dependency, "layout");
            }
            _ => panic!("Expected UnknownDependency"),
        }
        assert!(err.to_string().contains("layout"));
    }

    #[test]
    fn pipeline_error_converts_from_planning_error() {
        let err: PipelineError = PlanningError::DuplicateStage("x".into()).into();
        assert!(matches!(err, PipelineError::Planning(PlanningError::DuplicateStage(_))));
        assert!(err.is_terminal());
    }

    #[test]
    fn timeout_message_starts_with_reason() {
        let err = PipelineError::Timeout { seconds: 1 };
        assert!(err.to_string().starts_with("timeout"));
        assert!(err.is_terminal());
    }

    #[test]
    fn non_fatal_and_resource_errors_do_not_end_the_run() {
        let non_fatal = PipelineError::NonFatalStage {
            stage: "table_extraction".into(),
            message: "no ruling lines".into(),
        };
        let resources = PipelineError::ResourceExhausted {
            attempts: 5,
            reason: "memory 91%".into(),
        };
        assert!(!non_fatal.is_terminal());
        assert!(!resources.is_terminal());
    }

    #[test]
    fn stage_error_wraps_anyhow() {
        let err: StageError = anyhow::anyhow!("ocr binary missing").into();
        assert!(matches!(err, StageError::Other(_)));
        assert_eq!(err.to_string(), "ocr binary missing");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&PlanningError::DuplicateStage("x".into()));
        assert_std_error(&StageError::Cancelled);
        assert_std_error(&PipelineError::Timeout { seconds: 3 });
    }
}
