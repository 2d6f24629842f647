//! Execution plan preview: `policyflow plan`.

use anyhow::{Context, Result};
use console::style;
use policyflow::config::PolicyflowConfig;
use policyflow::dag::plan;
use policyflow::dry_run::dry_run_catalog;

use super::apply_pipeline_args;
use crate::PipelineArgs;

pub fn cmd_plan(mut config: PolicyflowConfig, args: &PipelineArgs, json: bool) -> Result<()> {
    apply_pipeline_args(&mut config, args);
    let settings = &config.pipeline;

    let catalog = dry_run_catalog().context("Failed to build the stage catalog")?;
    let plan = plan(
        &catalog,
        settings.mode,
        &settings.features,
        settings.parallel_processing,
    )
    .context("Failed to plan the pipeline")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?
        );
        return Ok(());
    }

    println!("{}", plan.render());

    let skipped: Vec<&str> = catalog
        .stages()
        .iter()
        .filter(|stage| plan.group_of(&stage.name).is_none())
        .map(|stage| stage.name.as_str())
        .collect();
    if !skipped.is_empty() {
        println!();
        println!("{} {}", style("Skipped:").dim(), skipped.join(", "));
    }
    Ok(())
}
