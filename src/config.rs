//! Configuration for policyflow.
//!
//! Values are layered: `policyflow.toml` → `POLICYFLOW_*` environment
//! variables → CLI flags. The file layer is plain serde, every field has a
//! default so a missing or partial file is valid.
//!
//! ```toml
//! [pipeline]
//! mode = "standard"
//! parallel_processing = true
//! timeout_seconds = 300
//!
//! [pipeline.features]
//! enable_table_extraction = false
//!
//! [batch]
//! max_concurrent = 3
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Name of the config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "policyflow.toml";

/// Processing mode selecting which stages run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Structural analysis, text and markdown only
    Fast,
    /// Every stage, optional ones gated by feature flags
    #[default]
    Standard,
    /// Every stage regardless of flags
    Thorough,
}

impl PipelineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Standard => "standard",
            Self::Thorough => "thorough",
        }
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "standard" => Ok(Self::Standard),
            "thorough" => Ok(Self::Thorough),
            other => bail!(
                "Unknown pipeline mode '{}': expected fast, standard or thorough",
                other
            ),
        }
    }
}

/// An optional capability a stage can be gated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Ocr,
    Tables,
    Images,
    Markdown,
    Embedding,
}

impl Feature {
    /// Config key of the flag controlling this feature.
    pub fn flag_name(&self) -> &'static str {
        match self {
            Self::Ocr => "enable_ocr",
            Self::Tables => "enable_table_extraction",
            Self::Images => "enable_image_extraction",
            Self::Markdown => "enable_markdown_conversion",
            Self::Embedding => "enable_embedding",
        }
    }
}

/// Feature toggles. Everything is on unless switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub enable_ocr: bool,
    #[serde(default = "default_true")]
    pub enable_table_extraction: bool,
    #[serde(default = "default_true")]
    pub enable_image_extraction: bool,
    #[serde(default = "default_true")]
    pub enable_markdown_conversion: bool,
    #[serde(default = "default_true")]
    pub enable_embedding: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_ocr: true,
            enable_table_extraction: true,
            enable_image_extraction: true,
            enable_markdown_conversion: true,
            enable_embedding: true,
        }
    }
}

impl FeatureFlags {
    pub fn is_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::Ocr => self.enable_ocr,
            Feature::Tables => self.enable_table_extraction,
            Feature::Images => self.enable_image_extraction,
            Feature::Markdown => self.enable_markdown_conversion,
            Feature::Embedding => self.enable_embedding,
        }
    }

    pub fn set(&mut self, feature: Feature, enabled: bool) {
        let slot = match feature {
            Feature::Ocr => &mut self.enable_ocr,
            Feature::Tables => &mut self.enable_table_extraction,
            Feature::Images => &mut self.enable_image_extraction,
            Feature::Markdown => &mut self.enable_markdown_conversion,
            Feature::Embedding => &mut self.enable_embedding,
        };
        *slot = enabled;
    }

    pub fn with(mut self, feature: Feature, enabled: bool) -> Self {
        self.set(feature, enabled);
        self
    }
}

/// Thresholds for the backpressure loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceBudget {
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold_percent: f64,
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold_percent: f64,
    #[serde(default = "default_pause_interval_ms")]
    pub pause_interval_ms: u64,
    #[serde(default = "default_max_pause_retries")]
    pub max_pause_retries: u32,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            memory_threshold_percent: default_memory_threshold(),
            cpu_threshold_percent: default_cpu_threshold(),
            pause_interval_ms: default_pause_interval_ms(),
            max_pause_retries: default_max_pause_retries(),
        }
    }
}

impl ResourceBudget {
    pub fn pause_interval(&self) -> Duration {
        Duration::from_millis(self.pause_interval_ms)
    }
}

/// Per-run pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub mode: PipelineMode,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default = "default_true")]
    pub parallel_processing: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// How long a cancelled handler may keep running before it is abandoned
    #[serde(default = "default_stage_grace_ms")]
    pub stage_grace_ms: u64,
    #[serde(default)]
    pub resources: ResourceBudget,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            mode: PipelineMode::default(),
            features: FeatureFlags::default(),
            parallel_processing: true,
            timeout_seconds: default_timeout_seconds(),
            stage_grace_ms: default_stage_grace_ms(),
            resources: ResourceBudget::default(),
        }
    }
}

impl PipelineSettings {
    pub fn with_mode(mut self, mode: PipelineMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel_processing = parallel;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_stage_grace_ms(mut self, millis: u64) -> Self {
        self.stage_grace_ms = millis;
        self
    }

    pub fn with_resources(mut self, resources: ResourceBudget) -> Self {
        self.resources = resources;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn stage_grace(&self) -> Duration {
        Duration::from_millis(self.stage_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSection {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSection {
    /// Where `run` writes one JSON result per document
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
        }
    }
}

/// Top-level contents of `policyflow.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyflowConfig {
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub batch: BatchSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub output: OutputSection,
}

impl PolicyflowConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse policyflow.toml")
    }

    /// Load `policyflow.toml` from `dir`, or defaults when it does not exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize policyflow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `POLICYFLOW_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` as the environment.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("POLICYFLOW_MODE") {
            self.pipeline.mode = mode.parse().context("Invalid POLICYFLOW_MODE")?;
        }
        if let Some(value) = lookup("POLICYFLOW_MAX_CONCURRENT") {
            self.batch.max_concurrent = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid POLICYFLOW_MAX_CONCURRENT: {}", value))?;
        }
        if let Some(value) = lookup("POLICYFLOW_TIMEOUT_SECONDS") {
            self.pipeline.timeout_seconds = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid POLICYFLOW_TIMEOUT_SECONDS: {}", value))?;
        }
        if let Some(value) = lookup("POLICYFLOW_PARALLEL") {
            self.pipeline.parallel_processing = parse_bool(&value)
                .with_context(|| format!("Invalid POLICYFLOW_PARALLEL: {}", value))?;
        }
        Ok(())
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.batch.max_concurrent == 0 {
            warnings.push("batch.max_concurrent is 0: it will be treated as 1".to_string());
        }
        if self.pipeline.timeout_seconds == 0 {
            warnings.push("pipeline.timeout_seconds is 0: every run will time out".to_string());
        }
        let resources = &self.pipeline.resources;
        for (name, value) in [
            ("memory_threshold_percent", resources.memory_threshold_percent),
            ("cpu_threshold_percent", resources.cpu_threshold_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                warnings.push(format!(
                    "pipeline.resources.{} = {} is outside 0-100",
                    name, value
                ));
            }
        }
        if self.pipeline.mode == PipelineMode::Thorough
            && self.pipeline.features != FeatureFlags::default()
        {
            warnings.push("feature flags are ignored in thorough mode".to_string());
        }

        warnings
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got '{}'", other),
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_stage_grace_ms() -> u64 {
    250
}

fn default_memory_threshold() -> f64 {
    85.0
}

fn default_cpu_threshold() -> f64 {
    90.0
}

fn default_pause_interval_ms() -> u64 {
    2000
}

fn default_max_pause_retries() -> u32 {
    5
}

fn default_max_concurrent() -> usize {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("policyflow-results")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = PolicyflowConfig::default();
        assert_eq!(config.pipeline.mode, PipelineMode::Standard);
        assert!(config.pipeline.parallel_processing);
        assert_eq!(config.pipeline.timeout_seconds, 300);
        assert_eq!(config.pipeline.stage_grace_ms, 250);
        assert_eq!(config.pipeline.resources.max_pause_retries, 5);
        assert_eq!(config.pipeline.resources.pause_interval(), Duration::from_secs(2));
        assert_eq!(config.batch.max_concurrent, 3);
        assert!(config.pipeline.features.is_enabled(Feature::Embedding));
    }

    #[test]
    fn test_parse_partial_file() {
        let config = PolicyflowConfig::parse(
            r#"
            [pipeline]
            mode = "fast"
            timeout_seconds = 60

            [pipeline.features]
            enable_table_extraction = false
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.mode, PipelineMode::Fast);
        assert_eq!(config.pipeline.timeout_seconds, 60);
        assert!(!config.pipeline.features.enable_table_extraction);
        assert!(config.pipeline.features.enable_image_extraction);
        assert_eq!(config.batch.max_concurrent, 3);
    }

    #[test]
    fn test_parse_rejects_unknown_mode() {
        let err = PolicyflowConfig::parse("[pipeline]\nmode = \"turbo\"\n").unwrap_err();
        assert!(err.to_string().contains("policyflow.toml"));
    }

    #[test]
    fn test_mode_from_str_and_display() {
        assert_eq!("THOROUGH".parse::<PipelineMode>().unwrap(), PipelineMode::Thorough);
        assert_eq!(PipelineMode::Fast.to_string(), "fast");
        assert!("slow".parse::<PipelineMode>().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = PolicyflowConfig::default();
        config.pipeline.mode = PipelineMode::Thorough;
        config.batch.max_concurrent = 8;
        config.save(&path).unwrap();

        let loaded = PolicyflowConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let config = PolicyflowConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, PolicyflowConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("POLICYFLOW_MODE", "fast"),
            ("POLICYFLOW_MAX_CONCURRENT", "7"),
            ("POLICYFLOW_TIMEOUT_SECONDS", "12"),
            ("POLICYFLOW_PARALLEL", "off"),
        ]
        .into_iter()
        .collect();

        let mut config = PolicyflowConfig::default();
        config
            .apply_env_with(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.pipeline.mode, PipelineMode::Fast);
        assert_eq!(config.batch.max_concurrent, 7);
        assert_eq!(config.pipeline.timeout_seconds, 12);
        assert!(!config.pipeline.parallel_processing);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = PolicyflowConfig::default();
        let err = config
            .apply_env_with(|k| (k == "POLICYFLOW_MAX_CONCURRENT").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("POLICYFLOW_MAX_CONCURRENT"));
    }

    #[test]
    fn test_feature_flags_set() {
        let flags = FeatureFlags::default()
            .with(Feature::Images, false)
            .with(Feature::Markdown, false);
        assert!(!flags.is_enabled(Feature::Images));
        assert!(!flags.is_enabled(Feature::Markdown));
        assert!(flags.is_enabled(Feature::Tables));
        assert_eq!(Feature::Tables.flag_name(), "enable_table_extraction");
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = PolicyflowConfig::default();
        assert!(config.validate().is_empty());

        config.batch.max_concurrent = 0;
        config.pipeline.resources.cpu_threshold_percent = 140.0;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[1].contains("cpu_threshold_percent"));
    }
}
