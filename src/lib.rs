pub mod batch;
pub mod catalog;
pub mod config;
pub mod context;
pub mod dag;
pub mod dry_run;
pub mod errors;
pub mod merge;
pub mod orchestrator;
pub mod resource;
pub mod runner;
pub mod sink;
pub mod telemetry;
pub mod ui;

pub use batch::{BatchCoordinator, BatchSummary};
pub use catalog::{StageCatalog, StageContext, StageDescriptor, StageHandler};
pub use config::{PipelineMode, PipelineSettings, PolicyflowConfig};
pub use context::{DocumentInput, RunContext};
pub use errors::{PipelineError, PlanningError, StageError};
pub use orchestrator::{Orchestrator, PipelineResult, select_backend};
