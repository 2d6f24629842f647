//! Folding stage outcomes back into the shared document state.
//!
//! Every stage of a group ran against its own copy of the same base state.
//! Merging applies the successful deltas in the order given (plan order):
//!
//! - the artifact lands in the stage's own namespace, verbatim
//! - chunks are appended
//! - embeddings are attached to chunks by id, after all chunks are in
//! - page counters take the largest reported value
//!
//! Failed and timed-out stages contribute nothing. Derived counters are
//! recomputed from the chunk list at the end, never added up.

use crate::runner::StageOutcome;
use policyflow_common::DocumentState;
use std::collections::{HashMap, HashSet};

pub fn merge(mut base: DocumentState, outcomes: &[StageOutcome]) -> DocumentState {
    let deltas: Vec<(&StageOutcome, _)> = outcomes
        .iter()
        .filter_map(|o| o.delta().map(|d| (o, d)))
        .collect();

    let mut written: HashSet<&str> = HashSet::new();
    for (outcome, delta) in &deltas {
        if let Some(artifact) = &delta.artifact {
            debug_assert!(
                written.insert(outcome.namespace.as_str()),
                "namespace '{}' written twice in one merge",
                outcome.namespace
            );
            base.artifacts
                .insert(outcome.namespace.clone(), artifact.clone());
        }
        base.processed_chunks.extend(delta.chunks.iter().cloned());
        if let Some(pages) = delta.pages {
            if pages.total.is_some() {
                base.total_pages = base.total_pages.max(pages.total);
            }
            base.processed_pages = base.processed_pages.max(pages.processed);
        }
    }

    // Reversed so the first chunk with a given id wins.
    let by_id: HashMap<&str, usize> = base
        .processed_chunks
        .iter()
        .enumerate()
        .rev()
        .map(|(index, chunk)| (chunk.id.as_str(), index))
        .collect();
    let mut attach: Vec<(usize, &Vec<f32>)> = Vec::new();
    for (outcome, delta) in &deltas {
        for (chunk_id, vector) in &delta.embeddings {
            match by_id.get(chunk_id.as_str()) {
                Some(&index) => attach.push((index, vector)),
                None => tracing::debug!(
                    stage = %outcome.stage,
                    chunk_id = %chunk_id,
                    "Dropping embedding for unknown chunk"
                ),
            }
        }
    }
    for (index, vector) in attach {
        base.processed_chunks[index].embedding = Some(vector.clone());
    }

    base.recompute_counters();
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{FailureClass, StageStatus};
    use policyflow_common::{ChunkType, ProcessedChunk, StageDelta};
    use serde_json::json;
    use std::time::Duration;

    fn completed(stage: &str, namespace: &str, delta: StageDelta) -> StageOutcome {
        StageOutcome {
            stage: stage.into(),
            namespace: namespace.into(),
            status: StageStatus::Completed { delta },
            duration: Duration::from_millis(5),
        }
    }

    fn failed(stage: &str, namespace: &str) -> StageOutcome {
        StageOutcome {
            stage: stage.into(),
            namespace: namespace.into(),
            status: StageStatus::Failed {
                class: FailureClass::NonFatal,
                message: "bad table".into(),
            },
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_merge_group_outputs() {
        let base = DocumentState::new("a.pdf", "1");
        let outcomes = vec![
            completed(
                "text_extraction",
                "text",
                StageDelta::new()
                    .with_artifact(json!({"pages": 2}))
                    .with_chunks(vec![ProcessedChunk::text("text_extraction", 0, Some(1), "a")])
                    .with_pages(Some(2), 2),
            ),
            failed("table_extraction", "tables"),
            completed(
                "image_extraction",
                "images",
                StageDelta::new()
                    .with_artifact(json!([]))
                    .with_chunks(vec![
                        ProcessedChunk::text("image_extraction", 0, Some(2), "logo")
                            .with_type(ChunkType::Image),
                    ]),
            ),
        ];

        let merged = merge(base, &outcomes);

        assert_eq!(merged.artifact("text"), Some(&json!({"pages": 2})));
        assert_eq!(merged.artifact("images"), Some(&json!([])));
        assert!(merged.artifact("tables").is_none());
        assert_eq!(merged.total_chunks(), 2);
        assert_eq!(merged.processed_chunks[0].id, "text_extraction-0");
        assert_eq!(merged.total_pages, Some(2));
        assert_eq!(merged.processed_pages, 2);
    }

    #[test]
    fn test_embeddings_attach_by_id() {
        let mut base = DocumentState::new("a.pdf", "1");
        base.processed_chunks
            .push(ProcessedChunk::text("markdown_conversion", 0, None, "# Coverage"));
        base.recompute_counters();

        let outcomes = vec![completed(
            "embedding_generation",
            "embeddings",
            StageDelta::new()
                .with_embedding("markdown_conversion-0", vec![0.1, 0.2])
                .with_embedding("missing-9", vec![0.3]),
        )];

        let merged = merge(base, &outcomes);
        assert!(merged.embeddings_created());
        assert_eq!(merged.total_chunks(), 1);
        assert_eq!(merged.processed_chunks[0].embedding, Some(vec![0.1, 0.2]));
    }

    #[test]
    fn test_embeddings_attach_to_chunks_from_the_same_group() {
        let mut base = DocumentState::new("a.pdf", "1");
        base.processed_chunks
            .push(ProcessedChunk::text("text_extraction", 0, Some(1), "Dwelling"));
        base.processed_chunks
            .push(ProcessedChunk::text("text_extraction", 0, Some(2), "duplicate id"));
        base.recompute_counters();

        let outcomes = vec![
            completed(
                "embedding_generation",
                "embeddings",
                StageDelta::new()
                    .with_embedding("text_extraction-0", vec![1.0])
                    .with_embedding("table_extraction-0", vec![2.0]),
            ),
            completed(
                "table_extraction",
                "tables",
                StageDelta::new()
                    .with_chunks(vec![ProcessedChunk::text("table_extraction", 0, Some(3), "| A | B |")]),
            ),
        ];

        let merged = merge(base, &outcomes);
        let embeddings: Vec<_> = merged
            .processed_chunks
            .iter()
            .map(|c| c.embedding.clone())
            .collect();
        assert_eq!(embeddings, vec![Some(vec![1.0]), None, Some(vec![2.0])]);
    }

    #[test]
    fn test_merge_is_order_independent_as_multiset() {
        let a = completed(
            "a",
            "a",
            StageDelta::new().with_chunks(vec![ProcessedChunk::text("a", 0, None, "x")]),
        );
        let b = completed(
            "b",
            "b",
            StageDelta::new().with_chunks(vec![ProcessedChunk::text("b", 0, None, "y")]),
        );
        let base = DocumentState::new("a.pdf", "1");

        let ab = merge(base.clone(), &[a.clone(), b.clone()]);
        let ba = merge(base, &[b, a]);

        let mut ids_ab: Vec<_> = ab.processed_chunks.iter().map(|c| c.id.clone()).collect();
        let mut ids_ba: Vec<_> = ba.processed_chunks.iter().map(|c| c.id.clone()).collect();
        ids_ab.sort();
        ids_ba.sort();
        assert_eq!(ids_ab, ids_ba);
        assert_eq!(ab.total_chunks(), ba.total_chunks());
    }

    #[test]
    fn test_counters_recomputed_not_accumulated() {
        let mut base = DocumentState::new("a.pdf", "1");
        let outcomes = vec![completed(
            "t",
            "t",
            StageDelta::new().with_chunks(vec![ProcessedChunk::text("t", 0, None, "x")]),
        )];
        base = merge(base, &outcomes);
        base = merge(base, &[]);
        base = merge(base, &[]);
        assert_eq!(base.total_chunks(), base.processed_chunks.len());
        assert_eq!(base.total_chunks(), 1);
    }

    #[test]
    #[should_panic(expected = "written twice")]
    #[cfg(debug_assertions)]
    fn test_namespace_collision_is_a_bug() {
        let outcomes = vec![
            completed("a", "shared", StageDelta::new().with_artifact(json!(1))),
            completed("b", "shared", StageDelta::new().with_artifact(json!(2))),
        ];
        merge(DocumentState::new("a.pdf", "1"), &outcomes);
    }
}
