//! Tracing and metrics collaborators.
//!
//! The orchestrator talks to a [`WorkflowTracer`] for span lifecycle and to a
//! per-run [`MetricsCollector`] for stage timings. Both are injected; there
//! is no global tracer. [`LogTracer`] is the default and simply emits
//! `tracing` events.

use chrono::{DateTime, Utc};
use policyflow_common::DocumentState;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// Longest string kept verbatim in a trace payload.
pub const MAX_TRACE_STRING: usize = 1000;
/// Serialized size above which a list or map is replaced by a summary.
pub const MAX_TRACE_OBJECT: usize = 2000;

const SENSITIVE_KEYS: [&str; 4] = ["password", "token", "key", "secret"];

/// Make a payload safe to hand to a tracing backend.
///
/// Keys that look like credentials are masked, long strings truncated and
/// large lists or maps replaced by a one-line summary. Only the top level of
/// an object is inspected.
pub fn sanitize(value: &Value) -> Value {
    let Value::Object(map) = value else {
        return json!({ "data": truncate(&value.to_string()) });
    };

    let sanitized = map
        .iter()
        .map(|(key, value)| {
            let lowered = key.to_lowercase();
            let clean = if SENSITIVE_KEYS.iter().any(|s| lowered.contains(s)) {
                Value::String("***MASKED***".to_string())
            } else {
                match value {
                    Value::String(s) if s.chars().count() > MAX_TRACE_STRING => {
                        Value::String(truncate(s))
                    }
                    Value::Array(_) | Value::Object(_)
                        if value.to_string().len() > MAX_TRACE_OBJECT =>
                    {
                        let kind = if value.is_array() { "list" } else { "map" };
                        Value::String(format!("[Large object: {}]", kind))
                    }
                    other => other.clone(),
                }
            };
            (key.clone(), clean)
        })
        .collect();

    Value::Object(sanitized)
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= MAX_TRACE_STRING {
        return s.to_string();
    }
    let head: String = s.chars().take(MAX_TRACE_STRING).collect();
    format!("{}...[truncated]", head)
}

/// The fields of a document state worth attaching to a stage span.
pub fn input_snapshot(state: &DocumentState) -> Value {
    sanitize(&json!({
        "file_name": state.file_name,
        "policy_id": state.policy_id,
        "current_stage": state.current_stage(),
        "status": state.status(),
        "total_chunks": state.total_chunks(),
        "total_pages": state.total_pages,
        "namespaces": state.artifacts.keys().collect::<Vec<_>>(),
        "artifacts": state.artifacts,
    }))
}

/// Identifies a traced run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowHandle {
    pub workflow_id: String,
    pub name: String,
    pub started_at: DateTime<Utc>,
}

/// An open stage span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpan {
    pub workflow_id: String,
    pub stage: String,
    pub started_at: DateTime<Utc>,
}

/// How a stage span ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanStatus {
    Completed,
    Failed(String),
    TimedOut,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::TimedOut => "timeout",
        }
    }
}

/// Span lifecycle sink.
pub trait WorkflowTracer: Send + Sync {
    fn begin_workflow(&self, workflow_id: &str, name: &str, meta: &Value) -> WorkflowHandle;
    fn begin_stage(&self, workflow: &WorkflowHandle, stage: &str, input: &Value) -> StageSpan;
    fn end_stage(&self, span: StageSpan, output: &Value, duration: Duration, status: &SpanStatus);
    fn log_metrics(&self, workflow: &WorkflowHandle, metrics: &BTreeMap<String, Value>);
}

/// Emits every span event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl WorkflowTracer for LogTracer {
    fn begin_workflow(&self, workflow_id: &str, name: &str, meta: &Value) -> WorkflowHandle {
        tracing::info!(workflow_id, workflow = name, meta = %meta, "Workflow started");
        WorkflowHandle {
            workflow_id: workflow_id.to_string(),
            name: name.to_string(),
            started_at: Utc::now(),
        }
    }

    fn begin_stage(&self, workflow: &WorkflowHandle, stage: &str, input: &Value) -> StageSpan {
        tracing::debug!(
            workflow_id = %workflow.workflow_id,
            stage,
            input = %input,
            "Stage started"
        );
        StageSpan {
            workflow_id: workflow.workflow_id.clone(),
            stage: stage.to_string(),
            started_at: Utc::now(),
        }
    }

    fn end_stage(&self, span: StageSpan, output: &Value, duration: Duration, status: &SpanStatus) {
        let duration_ms = duration.as_millis() as u64;
        match status {
            SpanStatus::Completed => tracing::info!(
                workflow_id = %span.workflow_id,
                stage = %span.stage,
                duration_ms,
                output = %output,
                "Stage completed"
            ),
            SpanStatus::Failed(error) => tracing::warn!(
                workflow_id = %span.workflow_id,
                stage = %span.stage,
                duration_ms,
                error = %error,
                "Stage failed"
            ),
            SpanStatus::TimedOut => tracing::warn!(
                workflow_id = %span.workflow_id,
                stage = %span.stage,
                duration_ms,
                "Stage timed out"
            ),
        }
    }

    fn log_metrics(&self, workflow: &WorkflowHandle, metrics: &BTreeMap<String, Value>) {
        tracing::info!(
            workflow_id = %workflow.workflow_id,
            metrics = %json!(metrics),
            "Workflow metrics"
        );
    }
}

/// Timing of one stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub stage: String,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub items_processed: usize,
    /// Items per second
    pub throughput: f64,
    pub success: bool,
}

impl StageMetrics {
    pub fn new(stage: &str, duration: Duration, items_processed: usize, success: bool) -> Self {
        let secs = duration.as_secs_f64();
        let throughput = if secs > 0.0 {
            items_processed as f64 / secs
        } else {
            0.0
        };
        Self {
            stage: stage.to_string(),
            duration,
            items_processed,
            throughput,
            success,
        }
    }
}

/// Aggregate over every stage invocation of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub stage_count: usize,
    #[serde(with = "duration_ms")]
    pub total_stage_duration: Duration,
    /// Percentage of stage invocations that succeeded
    pub success_rate: f64,
    pub items_processed: usize,
}

/// Per-stage metrics plus their summary, as carried by a pipeline result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub stages: Vec<StageMetrics>,
    pub summary: PerformanceSummary,
}

impl PerformanceMetrics {
    pub fn stage(&self, name: &str) -> Option<&StageMetrics> {
        self.stages.iter().find(|m| m.stage == name)
    }

    /// Flat key/value form handed to [`WorkflowTracer::log_metrics`].
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        for m in &self.stages {
            map.insert(format!("{}.duration_ms", m.stage), json!(m.duration.as_millis() as u64));
            map.insert(format!("{}.items", m.stage), json!(m.items_processed));
            map.insert(format!("{}.throughput", m.stage), json!(m.throughput));
            map.insert(format!("{}.success", m.stage), json!(m.success));
        }
        map.insert("pipeline.stage_count".into(), json!(self.summary.stage_count));
        map.insert(
            "pipeline.total_stage_duration_ms".into(),
            json!(self.summary.total_stage_duration.as_millis() as u64),
        );
        map.insert("pipeline.success_rate".into(), json!(self.summary.success_rate));
        map
    }
}

/// Collects stage metrics for a single run.
///
/// Concurrent stages of one group record through a shared reference, so the
/// list sits behind a mutex. Lock holds are a single push or clone.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    stages: Mutex<Vec<StageMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, metrics: StageMetrics) {
        if let Ok(mut stages) = self.stages.lock() {
            stages.push(metrics);
        }
    }

    pub fn snapshot(&self) -> Vec<StageMetrics> {
        self.stages.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Metrics sorted into `order` (plan order), then summarized.
    pub fn report(&self, order: &[&str]) -> PerformanceMetrics {
        let mut stages = self.snapshot();
        stages.sort_by_key(|m| order.iter().position(|s| *s == m.stage).unwrap_or(usize::MAX));

        let stage_count = stages.len();
        let succeeded = stages.iter().filter(|m| m.success).count();
        let summary = PerformanceSummary {
            stage_count,
            total_stage_duration: stages.iter().map(|m| m.duration).sum(),
            success_rate: if stage_count == 0 {
                0.0
            } else {
                succeeded as f64 / stage_count as f64 * 100.0
            },
            items_processed: stages.iter().map(|m| m.items_processed).sum(),
        };

        PerformanceMetrics { stages, summary }
    }
}

/// Serde helpers for Duration as milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_masks_sensitive_keys() {
        let clean = sanitize(&json!({
            "api_key": "sk-123",
            "AuthToken": "abc",
            "policy_id": "42",
        }));
        assert_eq!(clean["api_key"], "***MASKED***");
        assert_eq!(clean["AuthToken"], "***MASKED***");
        assert_eq!(clean["policy_id"], "42");
    }

    #[test]
    fn test_sanitize_truncates_long_strings() {
        let long = "가".repeat(1500);
        let clean = sanitize(&json!({ "markdown": long }));
        let text = clean["markdown"].as_str().unwrap();
        assert!(text.ends_with("...[truncated]"));
        assert_eq!(text.chars().count(), MAX_TRACE_STRING + "...[truncated]".len());
    }

    #[test]
    fn test_sanitize_summarizes_large_objects() {
        let rows: Vec<String> = (0..500).map(|i| format!("row {i}")).collect();
        let clean = sanitize(&json!({ "tables": rows, "small": [1, 2] }));
        assert_eq!(clean["tables"], "[Large object: list]");
        assert_eq!(clean["small"], json!([1, 2]));
    }

    #[test]
    fn test_sanitize_wraps_non_objects() {
        let clean = sanitize(&json!([1, 2, 3]));
        assert_eq!(clean, json!({ "data": "[1,2,3]" }));
    }

    #[test]
    fn test_stage_metrics_throughput() {
        let m = StageMetrics::new("text_extraction", Duration::from_millis(500), 10, true);
        assert!((m.throughput - 20.0).abs() < f64::EPSILON);
        let zero = StageMetrics::new("x", Duration::ZERO, 10, true);
        assert_eq!(zero.throughput, 0.0);
    }

    #[test]
    fn test_collector_report_in_plan_order() {
        let collector = MetricsCollector::new();
        collector.record(StageMetrics::new("b", Duration::from_millis(20), 2, false));
        collector.record(StageMetrics::new("a", Duration::from_millis(10), 3, true));

        let report = collector.report(&["a", "b"]);
        assert_eq!(report.stages[0].stage, "a");
        assert_eq!(report.summary.stage_count, 2);
        assert_eq!(report.summary.total_stage_duration, Duration::from_millis(30));
        assert_eq!(report.summary.success_rate, 50.0);
        assert_eq!(report.summary.items_processed, 5);

        let map = report.to_map();
        assert_eq!(map["a.items"], json!(3));
        assert_eq!(map["pipeline.stage_count"], json!(2));
    }

    #[test]
    fn test_metrics_serialize_durations_as_millis() {
        let m = StageMetrics::new("a", Duration::from_millis(1500), 0, true);
        let value = serde_json::to_value(&m).unwrap();
        assert_eq!(value["duration"], json!(1500));
    }
}
