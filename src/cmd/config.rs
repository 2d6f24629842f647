//! Configuration view and validation commands: `policyflow config`.

use anyhow::{Context, Result};
use policyflow::config::PolicyflowConfig;
use std::path::Path;

use super::super::ConfigCommands;

pub fn cmd_config(
    config_path: &Path,
    config: PolicyflowConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Policyflow Configuration");
            println!("========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("Config file: (none, using defaults)");
            }
            println!("Environment overrides applied.");
            println!();

            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            if config_path.exists() {
                println!("Validating: {}", config_path.display());
            } else {
                println!("No config file found, validating defaults");
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init { force }) => cmd_config_init(config_path, force)?,
    }

    Ok(())
}

/// Write a default config file. Refuses to overwrite unless `force`.
pub fn cmd_config_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        println!(
            "Config file already exists: {} (use --force to overwrite)",
            config_path.display()
        );
        return Ok(());
    }

    if let Some(parent) = config_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    PolicyflowConfig::default().save(config_path)?;
    println!("Created: {}", config_path.display());
    Ok(())
}
