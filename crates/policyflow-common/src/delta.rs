use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chunk::ProcessedChunk;

/// Page counters reported by the structural analysis or text stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageCounts {
    pub total: Option<u32>,
    pub processed: u32,
}

/// Output of a single stage handler.
///
/// A handler never touches the shared state directly. It describes what it
/// produced, and the merger folds that into the run's state: the artifact goes
/// into the stage's own namespace, chunks are appended, embeddings are attached
/// to existing chunks by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<ProcessedChunk>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub embeddings: BTreeMap<String, Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<PageCounts>,
}

impl StageDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact(mut self, artifact: serde_json::Value) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn with_chunks(mut self, chunks: Vec<ProcessedChunk>) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn with_embedding(mut self, chunk_id: impl Into<String>, vector: Vec<f32>) -> Self {
        self.embeddings.insert(chunk_id.into(), vector);
        self
    }

    pub fn with_pages(mut self, total: Option<u32>, processed: u32) -> Self {
        self.pages = Some(PageCounts { total, processed });
        self
    }

    /// Number of items this stage produced, used for throughput metrics.
    pub fn item_count(&self) -> usize {
        let produced = self.chunks.len() + self.embeddings.len();
        if produced > 0 {
            return produced;
        }
        match &self.artifact {
            Some(serde_json::Value::Array(items)) => items.len(),
            Some(_) => 1,
            None => 0,
        }
    }
}
