use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use policyflow::config::{CONFIG_FILE_NAME, Feature, PipelineMode, PolicyflowConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "policyflow")]
#[command(version, about = "Insurance-policy document pipeline orchestrator")]
pub struct Cli {
    /// Debug-level logging (overrides logging.level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file. Defaults to ./policyflow.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Overrides shared by `plan` and `run`. Applied after file and environment.
#[derive(Args, Debug, Clone, Default)]
pub struct PipelineArgs {
    /// Processing mode: fast, standard or thorough
    #[arg(short, long)]
    pub mode: Option<PipelineMode>,

    /// Run every stage on its own, in dependency order
    #[arg(long)]
    pub sequential: bool,

    /// Switch a feature off (repeatable)
    #[arg(long, value_enum)]
    pub disable: Vec<Feature>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the execution plan for the current settings
    Plan {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run documents through the pipeline using metadata-only stage handlers
    Run {
        /// Files, directories (searched for *.pdf) or glob patterns
        #[arg(required = true)]
        inputs: Vec<String>,

        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Documents processed at the same time
        #[arg(short = 'j', long)]
        max_concurrent: Option<usize>,

        /// Per-document time budget in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Directory for per-document result files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Do not write result files
        #[arg(long)]
        no_save: bool,

        /// Print results as JSON instead of drawing progress bars
        #[arg(long)]
        json: bool,
    },
    /// Show which orchestration backend is active
    Status {
        #[arg(long)]
        json: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate the config file
    Validate,
    /// Write a default policyflow.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Ok(std::env::current_dir()
                .context("Failed to get current directory")?
                .join(CONFIG_FILE_NAME)),
        }
    }

    /// File layer, then environment layer.
    fn load_config(&self) -> Result<PolicyflowConfig> {
        let path = self.config_path()?;
        let mut config = if path.exists() {
            PolicyflowConfig::load(&path)?
        } else if self.config.is_some() {
            anyhow::bail!("Config file not found: {}", path.display());
        } else {
            PolicyflowConfig::default()
        };
        config.apply_env()?;
        Ok(config)
    }
}

fn init_logging(cli: &Cli, config: &PolicyflowConfig) {
    let default_level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let json = cli.json_logs || config.logging.json;
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = installed {
        eprintln!("Failed to install log subscriber: {}", err);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // `config init` must work even when the existing file is broken.
    if let Commands::Config {
        command: Some(ConfigCommands::Init { force }),
    } = &cli.command
    {
        return cmd::cmd_config_init(&cli.config_path()?, *force);
    }

    let config = cli.load_config()?;
    init_logging(&cli, &config);

    match &cli.command {
        Commands::Plan { pipeline, json } => cmd::cmd_plan(config, pipeline, *json)?,
        Commands::Run {
            inputs,
            pipeline,
            max_concurrent,
            timeout,
            output_dir,
            no_save,
            json,
        } => {
            let options = cmd::RunOptions {
                pipeline: pipeline.clone(),
                max_concurrent: *max_concurrent,
                timeout: *timeout,
                output_dir: output_dir.clone(),
                save: !no_save,
                json: *json,
            };
            cmd::cmd_run(config, inputs, options).await?
        }
        Commands::Status { json } => cmd::cmd_status(config, *json)?,
        Commands::Config { command } => {
            cmd::cmd_config(&cli.config_path()?, config, command.clone())?
        }
    }

    Ok(())
}
