use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunk::{ChunkType, ProcessedChunk};
use crate::status::{ProcessingStatus, StatusTransitionError};

/// The record threaded through one document run.
///
/// Owned by the orchestrator between stage groups. Concurrent stage handlers
/// each receive their own clone, so no handler can observe another handler's
/// writes while a group is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    pub file_path: PathBuf,
    pub policy_id: String,
    pub file_name: String,
    pub workflow_id: String,
    pub created_at: DateTime<Utc>,

    current_stage: String,
    status: ProcessingStatus,
    error_message: Option<String>,

    /// Stage outputs, one namespace per stage
    pub artifacts: BTreeMap<String, serde_json::Value>,
    pub processed_chunks: Vec<ProcessedChunk>,

    total_chunks: usize,
    pub total_pages: Option<u32>,
    pub processed_pages: u32,
    embeddings_created: bool,

    /// Append-only notes; writable after the run reached a terminal status
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

impl DocumentState {
    /// Create a fresh `pending` state with a new workflow id.
    pub fn new(file_path: impl AsRef<Path>, policy_id: impl Into<String>) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            file_path,
            policy_id: policy_id.into(),
            file_name,
            workflow_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            current_stage: "initialized".to_string(),
            status: ProcessingStatus::Pending,
            error_message: None,
            artifacts: BTreeMap::new(),
            processed_chunks: Vec::new(),
            total_chunks: 0,
            total_pages: None,
            processed_pages: 0,
            embeddings_created: false,
            diagnostics: Vec::new(),
        }
    }

    /// Override the display name derived from the file path.
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    pub fn current_stage(&self) -> &str {
        &self.current_stage
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    pub fn embeddings_created(&self) -> bool {
        self.embeddings_created
    }

    /// Move the run to `next`, recording the stage that caused the move.
    pub fn transition(
        &mut self,
        next: ProcessingStatus,
        stage: &str,
    ) -> Result<(), StatusTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(StatusTransitionError {
                from: self.status,
                to: next,
                stage: stage.to_string(),
            });
        }
        self.status = next;
        self.current_stage = stage.to_string();
        Ok(())
    }

    /// Terminate the run as `failed` with an error message.
    pub fn fail(&mut self, stage: &str, message: impl Into<String>) -> Result<(), StatusTransitionError> {
        self.transition(ProcessingStatus::Failed, stage)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    pub fn artifact(&self, namespace: &str) -> Option<&serde_json::Value> {
        self.artifacts.get(namespace)
    }

    pub fn push_diagnostic(&mut self, note: impl Into<String>) {
        self.diagnostics.push(note.into());
    }

    /// Recompute every derived counter from the chunk list.
    ///
    /// Called after every merge; counters are never adjusted by hand.
    pub fn recompute_counters(&mut self) {
        self.total_chunks = self.processed_chunks.len();
        self.embeddings_created = self.processed_chunks.iter().any(|c| c.has_embedding());
    }

    /// Chunk count per extractor type.
    pub fn chunk_type_counts(&self) -> BTreeMap<ChunkType, usize> {
        let mut counts = BTreeMap::new();
        for chunk in &self.processed_chunks {
            *counts.entry(chunk.metadata.chunk_type).or_insert(0) += 1;
        }
        counts
    }

    /// Serialized content with run identity and timestamps stripped.
    ///
    /// Two runs over the same input compare equal on this value regardless of
    /// which backend executed them.
    pub fn content_snapshot(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.remove("workflow_id");
            map.remove("created_at");
        }
        value
    }
}
