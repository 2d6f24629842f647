//! Stage dependency graph and execution planning.
//!
//! ## Architecture
//!
//! 1. **Builder** - constructs a DAG from the active stages and rejects
//!    unknown dependencies and cycles
//! 2. **Planner** - selects the active stages for a mode and levels the DAG
//!    into stage groups
//!
//! ## Example
//!
//! ```no_run
//! use policyflow::catalog::StageCatalog;
//! use policyflow::config::{FeatureFlags, PipelineMode};
//! use policyflow::dag::plan;
//! # use policyflow::catalog::StageHandler;
//! # use std::sync::Arc;
//! # fn handler(_: &str) -> Arc<dyn StageHandler> { unimplemented!() }
//!
//! # fn example() -> anyhow::Result<()> {
//! let catalog = StageCatalog::policy_pipeline(handler)?;
//! let plan = plan(&catalog, PipelineMode::Standard, &FeatureFlags::default(), true)?;
//! // Group 0: [pdf_analysis]
//! // Group 1: [text_extraction, table_extraction, image_extraction]
//! // Group 2: [markdown_conversion]
//! // Group 3: [embedding_generation]
//! # Ok(())
//! # }
//! ```

mod builder;
mod planner;

pub use builder::{DagBuilder, StageGraph, StageIndex, StageNode};
pub use planner::{ExecutionPlan, StageGroup, plan};
