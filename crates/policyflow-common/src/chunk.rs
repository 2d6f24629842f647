use serde::{Deserialize, Serialize};

/// Which extractor produced a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    Table,
    Image,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    pub chunk_type: ChunkType,
    /// Stage name that produced the chunk
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// A searchable unit of a policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedChunk {
    /// Stable identifier, unique within a document (embeddings are keyed by it)
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl ProcessedChunk {
    /// Create a chunk without an embedding.
    pub fn new(id: impl Into<String>, text: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata,
            embedding: None,
        }
    }

    /// Shorthand for a text chunk emitted by `source`.
    pub fn text(source: &str, index: usize, page: Option<u32>, text: impl Into<String>) -> Self {
        Self::new(
            format!("{}-{}", source, index),
            text,
            ChunkMetadata {
                chunk_index: index,
                page_number: page,
                chunk_type: ChunkType::Text,
                source: source.to_string(),
                confidence: None,
            },
        )
    }

    pub fn with_type(mut self, chunk_type: ChunkType) -> Self {
        self.metadata.chunk_type = chunk_type;
        self
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|e| !e.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_chunk_id_is_source_scoped() {
        let chunk = ProcessedChunk::text("text_extraction", 3, Some(1), "premium schedule");
        assert_eq!(chunk.id, "text_extraction-3");
        assert_eq!(chunk.metadata.chunk_type, ChunkType::Text);
        assert!(!chunk.has_embedding());
    }

    #[test]
    fn empty_embedding_does_not_count() {
        let mut chunk = ProcessedChunk::text("t", 0, None, "x").with_type(ChunkType::Table);
        chunk.embedding = Some(vec![]);
        assert!(!chunk.has_embedding());
        chunk.embedding = Some(vec![0.5]);
        assert!(chunk.has_embedding());
        assert_eq!(chunk.metadata.chunk_type, ChunkType::Table);
    }
}
