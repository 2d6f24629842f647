//! Where finished results go.

use crate::orchestrator::PipelineResult;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Persists a finished run. Called after the run, outside the orchestrator.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn save_result(&self, result: &PipelineResult) -> Result<()>;
}

/// Writes each result to `<dir>/<workflow_id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, result: &PipelineResult) -> PathBuf {
        self.dir.join(format!("{}.json", result.workflow_id))
    }
}

#[async_trait]
impl ResultSink for JsonFileSink {
    async fn save_result(&self, result: &PipelineResult) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create output directory: {}", self.dir.display()))?;

        let path = self.path_for(result);
        let json = serde_json::to_string_pretty(result).context("Failed to serialize result")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write result: {}", path.display()))?;

        tracing::debug!(path = %path.display(), "Result saved");
        Ok(())
    }
}
