use crate::batch::BatchSummary;
use crate::context::ProgressCallback;
use crate::orchestrator::PipelineResult;
use crate::ui::icons::{CHECK, CLOCK, CROSS, PROGRESS, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░")
}

/// Terminal UI for a batch run, rendered via `indicatif` progress bars.
///
/// The top bar counts finished documents. Each document gets its own bar
/// below it, driven by the orchestrator's progress callback.
pub struct BatchProgress {
    multi: MultiProgress,
    overall: ProgressBar,
}

impl BatchProgress {
    /// Create the UI with the document counter already drawn.
    pub fn new(total_documents: u64) -> Self {
        Self::with_target(total_documents, ProgressDrawTarget::stderr())
    }

    /// Same bars, never drawn. Used for `--json` output and in tests.
    pub fn hidden(total_documents: u64) -> Self {
        Self::with_target(total_documents, ProgressDrawTarget::hidden())
    }

    fn with_target(total_documents: u64, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);
        let overall = multi.add(ProgressBar::new(total_documents));
        overall.set_style(bar_style(
            "{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {elapsed_precise}",
        ));
        overall.set_prefix(format!("{}Documents", PROGRESS));
        overall.enable_steady_tick(Duration::from_millis(200));
        Self { multi, overall }
    }

    /// Add a bar for one document.
    pub fn document(&self, name: &str) -> DocumentProgress {
        let bar = self.multi.add(ProgressBar::new(100));
        bar.set_style(bar_style(
            "  {prefix:<28.bold} [{bar:20.green/white}] {pos:>3}% {msg}",
        ));
        bar.set_prefix(name.to_string());
        bar.set_message(style("queued").dim().to_string());
        DocumentProgress {
            bar,
            overall: self.overall.clone(),
        }
    }

    /// Print a line above the bars, falling back to stderr.
    pub fn println(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Stop the document counter and print the batch totals.
    pub fn finish(&self, summary: &BatchSummary) {
        self.overall.finish_and_clear();
        let icon = if summary.failed == 0 { CHECK } else { WARN };
        self.println(format!(
            "{}{} of {} documents succeeded ({:.1}%)",
            icon, summary.successful, summary.total_files, summary.success_rate
        ));
        self.println(format!(
            "{}{:.2}s total, {:.2}s average per document",
            CLOCK, summary.total_processing_secs, summary.average_processing_secs
        ));
    }
}

/// One document's bar.
#[derive(Clone)]
pub struct DocumentProgress {
    bar: ProgressBar,
    overall: ProgressBar,
}

impl DocumentProgress {
    /// A progress callback that moves this bar.
    pub fn callback(&self) -> ProgressCallback {
        let bar = self.bar.clone();
        Arc::new(move |message: &str, percent: f64| {
            bar.set_position(percent.clamp(0.0, 100.0).round() as u64);
            bar.set_message(message.to_string());
        })
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Mark the document done and advance the document counter.
    pub fn finish(&self, result: &PipelineResult) {
        if result.success {
            self.bar.finish_with_message(format!(
                "{}{} stages in {}ms",
                CHECK,
                result.stages_completed.len(),
                result.elapsed.as_millis()
            ));
        } else {
            let reason = result.error_message.as_deref().unwrap_or("failed");
            self.bar.abandon_with_message(format!(
                "{}{}",
                CROSS,
                style(reason).red()
            ));
        }
        self.overall.inc(1);
    }
}
