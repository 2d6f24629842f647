//! Shared document model for the policyflow orchestrator.
//!
//! Everything a stage handler sees or produces lives here: the
//! [`DocumentState`] threaded through a run, the [`StageDelta`] a handler
//! returns, and the chunk types that end up in the vector store.

mod chunk;
mod delta;
mod state;
mod status;

pub use chunk::{ChunkMetadata, ChunkType, ProcessedChunk};
pub use delta::{PageCounts, StageDelta};
pub use state::DocumentState;
pub use status::{ProcessingStatus, StatusTransitionError};
