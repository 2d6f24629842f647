//! Batch document runs: `policyflow run <inputs..>`.

use anyhow::{Context, Result, bail};
use console::style;
use policyflow::batch::{BatchCoordinator, BatchSummary};
use policyflow::config::PolicyflowConfig;
use policyflow::context::{DocumentInput, RunContext};
use policyflow::dry_run::dry_run_catalog;
use policyflow::orchestrator::{Coordinator, PipelineResult, select_backend};
use policyflow::resource::SystemResourceMonitor;
use policyflow::sink::{JsonFileSink, ResultSink};
use policyflow::telemetry::LogTracer;
use policyflow::ui::BatchProgress;
use policyflow::ui::icons::{CROSS, FOLDER, WARN};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use super::apply_pipeline_args;
use crate::PipelineArgs;

/// Flags of `policyflow run` beyond the inputs.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub pipeline: PipelineArgs,
    pub max_concurrent: Option<usize>,
    pub timeout: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub save: bool,
    pub json: bool,
}

pub async fn cmd_run(
    mut config: PolicyflowConfig,
    inputs: &[String],
    options: RunOptions,
) -> Result<()> {
    apply_pipeline_args(&mut config, &options.pipeline);
    if let Some(limit) = options.max_concurrent {
        config.batch.max_concurrent = limit;
    }
    if let Some(seconds) = options.timeout {
        config.pipeline.timeout_seconds = seconds;
    }
    if let Some(dir) = &options.output_dir {
        config.output.directory = dir.clone();
    }
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let documents = collect_inputs(inputs)?;
    if documents.is_empty() {
        bail!("No input documents found");
    }

    let catalog = Arc::new(dry_run_catalog().context("Failed to build the stage catalog")?);
    let coordinator = Coordinator::new(
        catalog,
        Arc::new(LogTracer),
        Arc::new(SystemResourceMonitor::new(config.pipeline.resources)),
    );
    let backend = select_backend(coordinator, &config.pipeline);
    let batch = BatchCoordinator::new(backend);

    let ui = if options.json {
        BatchProgress::hidden(documents.len() as u64)
    } else {
        BatchProgress::new(documents.len() as u64)
    };
    if !options.json {
        ui.println(format!(
            "{}{} documents, {} mode, up to {} at a time",
            FOLDER,
            documents.len(),
            config.pipeline.mode,
            config.batch.max_concurrent.max(1)
        ));
    }

    let mut bars = Vec::with_capacity(documents.len());
    let contexts: Vec<RunContext> = documents
        .iter()
        .map(|path| {
            let input = document_input(path);
            let bar = ui.document(input.display_name.as_deref().unwrap_or(&input.policy_id));
            let ctx = RunContext::new(input, config.pipeline.clone()).with_progress(bar.callback());
            bars.push(bar);
            ctx
        })
        .collect();

    let results = batch.run_all(contexts, config.batch.max_concurrent).await;
    for (bar, result) in bars.iter().zip(&results) {
        bar.finish(result);
    }

    if options.save {
        let sink = JsonFileSink::new(&config.output.directory);
        for result in &results {
            if let Err(err) = sink.save_result(result).await {
                tracing::error!(workflow_id = %result.workflow_id, error = %err, "Failed to save result");
                ui.println(format!("{}{:#}", CROSS, err));
            }
        }
    }

    let summary = BatchSummary::from_results(&results);
    if options.json {
        let report = serde_json::json!({ "summary": &summary, "results": &results });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize results")?
        );
    } else {
        report_problems(&ui, &results);
        ui.finish(&summary);
        if options.save {
            ui.println(format!(
                "Results written to {}",
                style(config.output.directory.display()).cyan()
            ));
        }
    }

    if summary.failed > 0 {
        bail!(
            "{} of {} documents failed",
            summary.failed,
            summary.total_files
        );
    }
    Ok(())
}

fn report_problems(ui: &BatchProgress, results: &[PipelineResult]) {
    for result in results {
        let name = &result.final_state.file_name;
        if let Some(error) = &result.error_message {
            ui.println(format!("{}{}: {}", CROSS, style(name).bold(), error));
        }
        for warning in &result.warnings {
            ui.println(format!("{}{}: {}", WARN, style(name).bold(), style(warning).yellow()));
        }
    }
}

fn document_input(path: &Path) -> DocumentInput {
    let policy_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let input = DocumentInput::new(path, policy_id);
    match path.file_name() {
        Some(name) => input.with_display_name(name.to_string_lossy()),
        None => input,
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

fn is_pattern(input: &str) -> bool {
    input.contains(['*', '?', '['])
}

/// Expand files, directories and glob patterns into document paths.
///
/// Directories are searched recursively for `*.pdf`. Explicit files are taken
/// as given whatever their extension. Each path appears once, in first-seen
/// order.
pub fn collect_inputs(inputs: &[String]) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut documents = Vec::new();
    let mut push = |path: PathBuf| {
        if seen.insert(path.clone()) {
            documents.push(path);
        }
    };

    for input in inputs {
        let path = Path::new(input);
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file() && is_pdf(entry.path()))
                .map(|entry| entry.into_path())
                .collect();
            found.sort();
            found.into_iter().for_each(&mut push);
        } else if path.is_file() {
            push(path.to_path_buf());
        } else if is_pattern(input) {
            let matches = glob::glob(input)
                .with_context(|| format!("Invalid glob pattern: {}", input))?;
            for entry in matches {
                let entry = entry.with_context(|| format!("Failed to read match of {}", input))?;
                if entry.is_file() {
                    push(entry);
                }
            }
        } else {
            bail!("Input not found: {}", input);
        }
    }

    Ok(documents)
}
