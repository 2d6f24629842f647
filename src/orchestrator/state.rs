//! Run lifecycle and the result handed back to callers.

use crate::telemetry::{PerformanceMetrics, duration_ms};
use policyflow_common::DocumentState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Planning,
    Running {
        group: usize,
    },
    Completed,
    Failed,
    TimedOut,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Completed,
    Failed,
    TimedOut,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TerminalState> for RunPhase {
    fn from(state: TerminalState) -> Self {
        match state {
            TerminalState::Completed => Self::Completed,
            TerminalState::Failed => Self::Failed,
            TerminalState::TimedOut => Self::TimedOut,
        }
    }
}

/// Outcome of one document run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    pub workflow_id: String,
    pub file_path: PathBuf,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    /// Successful stages of fully merged groups, in plan order
    pub stages_completed: Vec<String>,
    pub final_state: DocumentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Non-fatal stage failures and backpressure give-ups
    #[serde(default)]
    pub warnings: Vec<String>,
    pub terminal: TerminalState,
    #[serde(default)]
    pub performance_metrics: PerformanceMetrics,
}

impl PipelineResult {
    /// A failed result for a run that never produced its own.
    pub fn aborted(mut state: DocumentState, message: impl Into<String>, elapsed: Duration) -> Self {
        let message = message.into();
        let stage = state.current_stage().to_string();
        if let Err(err) = state.fail(&stage, message.clone()) {
            state.push_diagnostic(format!("{}: {}", err, message));
        }
        Self {
            success: false,
            workflow_id: state.workflow_id.clone(),
            file_path: state.file_path.clone(),
            elapsed,
            stages_completed: Vec::new(),
            final_state: state,
            error_message: Some(message),
            warnings: Vec::new(),
            terminal: TerminalState::Failed,
            performance_metrics: PerformanceMetrics::default(),
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.terminal == TerminalState::TimedOut
    }

    /// Lifecycle phase the run ended in. Always terminal.
    pub fn phase(&self) -> RunPhase {
        RunPhase::from(self.terminal)
    }
}

/// Tracks execution timing.
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
