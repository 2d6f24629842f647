//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled  |
//! |----------|-------------------|
//! | `plan`   | `Plan`            |
//! | `run`    | `Run`             |
//! | `status` | `Status`          |
//! | `config` | `Config`          |

pub mod config;
pub mod plan;
pub mod run;
pub mod status;

pub use config::{cmd_config, cmd_config_init};
pub use plan::cmd_plan;
pub use run::{RunOptions, cmd_run};
pub use status::cmd_status;

use crate::PipelineArgs;
use policyflow::config::PolicyflowConfig;

/// CLI layer: flags win over file and environment.
pub fn apply_pipeline_args(config: &mut PolicyflowConfig, args: &PipelineArgs) {
    if let Some(mode) = args.mode {
        config.pipeline.mode = mode;
    }
    if args.sequential {
        config.pipeline.parallel_processing = false;
    }
    for feature in &args.disable {
        config.pipeline.features.set(*feature, false);
    }
}

pub(crate) fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
