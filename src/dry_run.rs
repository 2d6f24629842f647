//! Stand-in stage handlers for `policyflow run`.
//!
//! Real extraction lives outside this crate. These handlers exercise the full
//! orchestration path by recording file metadata and producing deterministic
//! placeholder chunks and embeddings.

use crate::catalog::{StageCatalog, StageContext, StageHandler, stages};
use crate::errors::{PlanningError, StageError};
use async_trait::async_trait;
use policyflow_common::{DocumentState, ProcessedChunk, StageDelta};
use serde_json::json;
use std::sync::Arc;

/// Bytes per estimated page.
const BYTES_PER_PAGE: u64 = 50 * 1024;
const EMBEDDING_DIM: usize = 8;

/// The policy pipeline wired to dry-run handlers.
pub fn dry_run_catalog() -> Result<StageCatalog, PlanningError> {
    StageCatalog::policy_pipeline(|name| -> Arc<dyn StageHandler> {
        match name {
            stages::PDF_ANALYSIS => Arc::new(FileMetadata),
            stages::TEXT_EXTRACTION => Arc::new(PagePlaceholders),
            stages::TABLE_EXTRACTION => Arc::new(EmptyListing { key: "tables" }),
            stages::IMAGE_EXTRACTION => Arc::new(EmptyListing { key: "images" }),
            stages::MARKDOWN_CONVERSION => Arc::new(MarkdownSummary),
            _ => Arc::new(HashEmbeddings),
        }
    })
}

fn estimated_pages(state: &DocumentState) -> u32 {
    state
        .artifact("analysis")
        .and_then(|a| a.get("estimated_pages"))
        .and_then(|p| p.as_u64())
        .unwrap_or(1) as u32
}

struct FileMetadata;

#[async_trait]
impl StageHandler for FileMetadata {
    async fn execute(&self, _ctx: StageContext, state: DocumentState) -> Result<StageDelta, StageError> {
        let meta = tokio::fs::metadata(&state.file_path).await.map_err(|e| {
            StageError::failed(format!("cannot read {}: {}", state.file_path.display(), e))
        })?;
        if !meta.is_file() {
            return Err(StageError::failed(format!(
                "{} is not a file",
                state.file_path.display()
            )));
        }

        let size = meta.len();
        let pages = size.div_ceil(BYTES_PER_PAGE).max(1) as u32;
        let extension = state
            .file_path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        Ok(StageDelta::new()
            .with_artifact(json!({
                "file_size": size,
                "extension": extension,
                "is_pdf": extension == "pdf",
                "estimated_pages": pages,
            }))
            .with_pages(Some(pages), 0))
    }
}

struct PagePlaceholders;

#[async_trait]
impl StageHandler for PagePlaceholders {
    async fn execute(&self, ctx: StageContext, state: DocumentState) -> Result<StageDelta, StageError> {
        let pages = estimated_pages(&state);
        let mut chunks = Vec::with_capacity(pages as usize);
        for page in 1..=pages {
            if ctx.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            chunks.push(ProcessedChunk::text(
                &ctx.stage,
                (page - 1) as usize,
                Some(page),
                format!("[dry-run] {} page {}", state.file_name, page),
            ));
        }

        Ok(StageDelta::new()
            .with_artifact(json!({ "pages": pages, "characters": 0 }))
            .with_chunks(chunks)
            .with_pages(None, pages))
    }
}

struct EmptyListing {
    key: &'static str,
}

#[async_trait]
impl StageHandler for EmptyListing {
    async fn execute(&self, ctx: StageContext, _state: DocumentState) -> Result<StageDelta, StageError> {
        let mut artifact = serde_json::Map::new();
        artifact.insert(self.key.to_string(), json!([]));
        artifact.insert("ocr_enabled".to_string(), json!(ctx.features.enable_ocr));
        Ok(StageDelta::new().with_artifact(artifact.into()))
    }
}

struct MarkdownSummary;

#[async_trait]
impl StageHandler for MarkdownSummary {
    async fn execute(&self, _ctx: StageContext, state: DocumentState) -> Result<StageDelta, StageError> {
        let mut markdown = format!("# {}\n\n", state.file_name);
        for chunk in &state.processed_chunks {
            markdown.push_str(&format!("- {}\n", chunk.text));
        }
        Ok(StageDelta::new().with_artifact(json!(markdown)))
    }
}

struct HashEmbeddings;

/// A fixed-size vector derived from the text bytes.
fn placeholder_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0f32; EMBEDDING_DIM];
    for (i, byte) in text.bytes().enumerate() {
        vector[i % EMBEDDING_DIM] += byte as f32 / 255.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

#[async_trait]
impl StageHandler for HashEmbeddings {
    async fn execute(&self, _ctx: StageContext, state: DocumentState) -> Result<StageDelta, StageError> {
        let delta = state
            .processed_chunks
            .iter()
            .fold(StageDelta::new(), |delta, chunk| {
                delta.with_embedding(chunk.id.clone(), placeholder_embedding(&chunk.text))
            });
        Ok(delta)
    }
}
