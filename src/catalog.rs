//! Stage registry.
//!
//! A [`StageCatalog`] holds every stage the pipeline knows about, in the
//! order they were registered. Registration order is also the order stages
//! appear inside a planned group. Each stage owns exactly one artifact
//! namespace; the catalog refuses a second stage claiming the same one, so
//! two concurrently running stages can never write the same slot.

use crate::config::{Feature, FeatureFlags, PipelineMode};
use crate::errors::{PlanningError, StageError};
use async_trait::async_trait;
use policyflow_common::{DocumentState, StageDelta};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Names of the built-in policy-document stages.
pub mod stages {
    pub const PDF_ANALYSIS: &str = "pdf_analysis";
    pub const TEXT_EXTRACTION: &str = "text_extraction";
    pub const TABLE_EXTRACTION: &str = "table_extraction";
    pub const IMAGE_EXTRACTION: &str = "image_extraction";
    pub const MARKDOWN_CONVERSION: &str = "markdown_conversion";
    pub const EMBEDDING_GENERATION: &str = "embedding_generation";

    /// All built-in stages in registration order.
    pub const ALL: [&str; 6] = [
        PDF_ANALYSIS,
        TEXT_EXTRACTION,
        TABLE_EXTRACTION,
        IMAGE_EXTRACTION,
        MARKDOWN_CONVERSION,
        EMBEDDING_GENERATION,
    ];
}

/// What a handler gets to know about the invocation besides the state copy.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub workflow_id: String,
    pub stage: String,
    pub namespace: String,
    pub mode: PipelineMode,
    pub features: FeatureFlags,
    /// Cancelled when the run deadline passes. Long handlers should select on it.
    pub cancel: CancellationToken,
}

impl StageContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// An externally supplied unit of work.
///
/// The handler receives a private copy of the document state and returns a
/// [`StageDelta`] describing what it produced. It never writes shared state.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn execute(
        &self,
        ctx: StageContext,
        state: DocumentState,
    ) -> Result<StageDelta, StageError>;
}

/// A registered stage.
#[derive(Clone)]
pub struct StageDescriptor {
    pub name: String,
    /// Artifact slot this stage writes
    pub namespace: String,
    pub depends_on: Vec<String>,
    /// Failure aborts the run
    pub fatal: bool,
    /// Flag that must be on for the stage to run in standard mode
    pub feature: Option<Feature>,
    /// Member of the fast-mode subset
    pub fast_path: bool,
    pub handler: Arc<dyn StageHandler>,
}

impl StageDescriptor {
    /// A non-fatal stage writing a namespace named after itself.
    pub fn new(name: impl Into<String>, handler: Arc<dyn StageHandler>) -> Self {
        let name = name.into();
        Self {
            namespace: name.clone(),
            name,
            depends_on: Vec::new(),
            fatal: false,
            feature: None,
            fast_path: false,
            handler,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }

    pub fn feature(mut self, feature: Feature) -> Self {
        self.feature = Some(feature);
        self
    }

    pub fn fast_path(mut self, fast: bool) -> Self {
        self.fast_path = fast;
        self
    }

    /// Whether the stage takes part in a run with this mode and flags.
    pub fn is_active(&self, mode: PipelineMode, flags: &FeatureFlags) -> bool {
        let gated_on = |f: &FeatureFlags| self.feature.is_none_or(|feature| f.is_enabled(feature));
        match mode {
            PipelineMode::Thorough => true,
            PipelineMode::Standard => gated_on(flags),
            PipelineMode::Fast => self.fast_path && gated_on(flags),
        }
    }
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("depends_on", &self.depends_on)
            .field("fatal", &self.fatal)
            .field("feature", &self.feature)
            .field("fast_path", &self.fast_path)
            .finish_non_exhaustive()
    }
}

/// Ordered set of registered stages.
#[derive(Debug, Clone, Default)]
pub struct StageCatalog {
    stages: Vec<StageDescriptor>,
}

impl StageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage, rejecting duplicate names and namespaces.
    pub fn register(&mut self, descriptor: StageDescriptor) -> Result<(), PlanningError> {
        if self.get(&descriptor.name).is_some() {
            return Err(PlanningError::DuplicateStage(descriptor.name));
        }
        if let Some(owner) = self
            .stages
            .iter()
            .find(|s| s.namespace == descriptor.namespace)
        {
            return Err(PlanningError::DuplicateNamespace {
                namespace: descriptor.namespace,
                first: owner.name.clone(),
                second: descriptor.name,
            });
        }
        self.stages.push(descriptor);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_stage(mut self, descriptor: StageDescriptor) -> Result<Self, PlanningError> {
        self.register(descriptor)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&StageDescriptor> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The six-stage policy document pipeline.
    ///
    /// `handler_for` is called once per stage name from [`stages::ALL`].
    ///
    /// ```text
    /// pdf_analysis
    ///   ├── text_extraction ──┐
    ///   ├── table_extraction ─┼── markdown_conversion ── embedding_generation
    ///   └── image_extraction ─┘
    /// ```
    pub fn policy_pipeline<F>(mut handler_for: F) -> Result<Self, PlanningError>
    where
        F: FnMut(&str) -> Arc<dyn StageHandler>,
    {
        use stages::*;

        Self::new()
            .with_stage(
                StageDescriptor::new(PDF_ANALYSIS, handler_for(PDF_ANALYSIS))
                    .namespace("analysis")
                    .fatal(true)
                    .fast_path(true),
            )?
            .with_stage(
                StageDescriptor::new(TEXT_EXTRACTION, handler_for(TEXT_EXTRACTION))
                    .namespace("text")
                    .depends_on(&[PDF_ANALYSIS])
                    .fast_path(true),
            )?
            .with_stage(
                StageDescriptor::new(TABLE_EXTRACTION, handler_for(TABLE_EXTRACTION))
                    .namespace("tables")
                    .depends_on(&[PDF_ANALYSIS])
                    .feature(Feature::Tables),
            )?
            .with_stage(
                StageDescriptor::new(IMAGE_EXTRACTION, handler_for(IMAGE_EXTRACTION))
                    .namespace("images")
                    .depends_on(&[PDF_ANALYSIS])
                    .feature(Feature::Images),
            )?
            .with_stage(
                StageDescriptor::new(MARKDOWN_CONVERSION, handler_for(MARKDOWN_CONVERSION))
                    .namespace("markdown")
                    .depends_on(&[TEXT_EXTRACTION, TABLE_EXTRACTION, IMAGE_EXTRACTION])
                    .feature(Feature::Markdown)
                    .fast_path(true),
            )?
            .with_stage(
                StageDescriptor::new(EMBEDDING_GENERATION, handler_for(EMBEDDING_GENERATION))
                    .namespace("embeddings")
                    .depends_on(&[MARKDOWN_CONVERSION])
                    .feature(Feature::Embedding),
            )
    }
}
