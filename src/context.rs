//! Per-run input: which document, with which settings, reporting where.

use crate::config::PipelineSettings;
use policyflow_common::DocumentState;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Progress sink: human-readable message and percent complete (0-100).
pub type ProgressCallback = Arc<dyn Fn(&str, f64) + Send + Sync>;

/// The document a run processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInput {
    pub path: PathBuf,
    pub policy_id: String,
    /// Shown instead of the file name when set
    pub display_name: Option<String>,
}

impl DocumentInput {
    pub fn new(path: impl Into<PathBuf>, policy_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            policy_id: policy_id.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

#[derive(Clone)]
pub struct RunContext {
    pub document: DocumentInput,
    pub settings: PipelineSettings,
    pub progress: Option<ProgressCallback>,
}

impl RunContext {
    pub fn new(document: DocumentInput, settings: PipelineSettings) -> Self {
        Self {
            document,
            settings,
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// A fresh `pending` state for this document.
    pub fn initial_state(&self) -> DocumentState {
        let state = DocumentState::new(&self.document.path, self.document.policy_id.clone());
        match &self.document.display_name {
            Some(name) => state.with_file_name(name.clone()),
            None => state,
        }
    }

    pub fn report_progress(&self, message: &str, percent: f64) {
        tracing::info!(percent, "{}", message);
        if let Some(callback) = &self.progress {
            callback(message, percent);
        }
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("document", &self.document)
            .field("settings", &self.settings)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish()
    }
}
