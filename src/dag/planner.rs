//! Execution planning.
//!
//! Selects the active stages for a mode and flag set, builds their dependency
//! graph and levels it into stage groups. Groups run strictly in order; stages
//! inside a group have no ordering between them.

use crate::catalog::StageCatalog;
use crate::config::{FeatureFlags, PipelineMode};
use crate::dag::builder::{DagBuilder, StageNode};
use crate::errors::PlanningError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Stages eligible to run together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageGroup {
    pub stages: Vec<String>,
}

impl StageGroup {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s == stage)
    }
}

/// Ordered stage groups for one (mode, flags, parallel) combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub mode: PipelineMode,
    pub parallel: bool,
    pub groups: Vec<StageGroup>,
}

impl ExecutionPlan {
    pub fn groups(&self) -> &[StageGroup] {
        &self.groups
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn stage_count(&self) -> usize {
        self.groups.iter().map(StageGroup::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Stage names in execution order.
    pub fn stage_order(&self) -> Vec<&str> {
        self.groups
            .iter()
            .flat_map(|g| g.stages.iter().map(String::as_str))
            .collect()
    }

    /// Index of the group holding `stage`.
    pub fn group_of(&self, stage: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.contains(stage))
    }

    /// One line per group, for terminal output.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Plan ({} mode, {}): {} stages in {} groups",
            self.mode,
            if self.parallel { "parallel" } else { "sequential" },
            self.stage_count(),
            self.group_count()
        );
        for (i, group) in self.groups.iter().enumerate() {
            let _ = writeln!(out, "  Group {}: {}", i, group.stages.join(", "));
        }
        out
    }
}

/// Plan a run over `catalog`.
///
/// A dependency on a catalog stage that this mode or flag set switched off is
/// treated as satisfied. A dependency on a name the catalog has never heard of
/// is an error.
pub fn plan(
    catalog: &StageCatalog,
    mode: PipelineMode,
    flags: &FeatureFlags,
    parallel: bool,
) -> Result<ExecutionPlan, PlanningError> {
    let active: HashSet<&str> = catalog
        .stages()
        .iter()
        .filter(|s| s.is_active(mode, flags))
        .map(|s| s.name.as_str())
        .collect();

    let mut nodes = Vec::with_capacity(active.len());
    for stage in catalog.stages() {
        for dep in &stage.depends_on {
            if !catalog.contains(dep) {
                return Err(PlanningError::UnknownDependency {
                    stage: stage.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        if !active.contains(stage.name.as_str()) {
            continue;
        }
        let deps = stage
            .depends_on
            .iter()
            .filter(|d| active.contains(d.as_str()))
            .cloned()
            .collect();
        nodes.push(StageNode::new(stage.name.clone(), deps));
    }

    let graph = DagBuilder::new(nodes).build()?;

    let mut groups: Vec<StageGroup> = graph
        .levels()
        .into_iter()
        .map(|level| StageGroup {
            stages: level
                .into_iter()
                .filter_map(|i| graph.node(i).map(|n| n.name.clone()))
                .collect(),
        })
        .collect();

    if !parallel {
        groups = groups
            .into_iter()
            .flat_map(|g| g.stages)
            .map(|stage| StageGroup {
                stages: vec![stage],
            })
            .collect();
    }

    tracing::debug!(
        mode = %mode,
        parallel,
        groups = groups.len(),
        "Planned {} active stages",
        graph.len()
    );

    Ok(ExecutionPlan {
        mode,
        parallel,
        groups,
    })
}
