//! Backend status: `policyflow status`.

use anyhow::{Context, Result};
use policyflow::config::PolicyflowConfig;
use policyflow::dry_run::dry_run_catalog;
use policyflow::orchestrator::{Coordinator, select_backend};
use policyflow::resource::Unthrottled;
use policyflow::telemetry::LogTracer;
use std::sync::Arc;

use super::yes_no;

pub fn cmd_status(config: PolicyflowConfig, json: bool) -> Result<()> {
    let catalog = Arc::new(dry_run_catalog().context("Failed to build the stage catalog")?);
    let coordinator = Coordinator::new(catalog, Arc::new(LogTracer), Arc::new(Unthrottled));
    let status = select_backend(coordinator, &config.pipeline).status();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to serialize status")?
        );
        return Ok(());
    }

    println!();
    println!("Policyflow Status");
    println!("=================");
    println!();
    println!("  backend          {}", status.backend);
    println!("  graph available  {}", yes_no(status.graph_available));
    println!("  compiled plans   {}", status.compiled_plans);
    println!("  mode             {}", config.pipeline.mode);
    println!("  stages           {}", status.registered_stages.join(", "));
    println!();
    Ok(())
}
