//! Dependency graph over the active stages of a run.
//!
//! The builder takes stage nodes with their (already filtered) dependencies and
//! constructs a directed acyclic graph that the planner levels into groups.

use crate::errors::PlanningError;
use std::collections::{HashMap, HashSet};

/// Index into the node list.
pub type StageIndex = usize;

/// A stage as seen by the graph: a name and the names it waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageNode {
    pub name: String,
    pub depends_on: Vec<String>,
}

impl StageNode {
    pub fn new(name: impl Into<String>, depends_on: Vec<String>) -> Self {
        Self {
            name: name.into(),
            depends_on,
        }
    }
}

/// A directed acyclic graph of stages.
#[derive(Debug, Clone, Default)]
pub struct StageGraph {
    nodes: Vec<StageNode>,
    index_map: HashMap<String, StageIndex>,
    /// index -> stages that depend on it
    forward_edges: Vec<Vec<StageIndex>>,
    /// index -> stages it depends on
    reverse_edges: Vec<Vec<StageIndex>>,
}

impl StageGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: StageIndex) -> Option<&StageNode> {
        self.nodes.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<StageIndex> {
        self.index_map.get(name).copied()
    }

    pub fn nodes(&self) -> &[StageNode] {
        &self.nodes
    }

    pub fn dependents(&self, index: StageIndex) -> &[StageIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    pub fn dependencies(&self, index: StageIndex) -> &[StageIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Number of edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.forward_edges.iter().map(Vec::len).sum()
    }

    pub fn dependencies_satisfied(&self, index: StageIndex, planned: &HashSet<StageIndex>) -> bool {
        self.dependencies(index)
            .iter()
            .all(|dep| planned.contains(dep))
    }

    /// Greedy leveling: each level holds every unplanned node whose
    /// dependencies sit in earlier levels, in node order.
    pub fn levels(&self) -> Vec<Vec<StageIndex>> {
        let mut levels = Vec::new();
        let mut planned: HashSet<StageIndex> = HashSet::new();

        loop {
            let ready: Vec<StageIndex> = (0..self.nodes.len())
                .filter(|i| !planned.contains(i) && self.dependencies_satisfied(*i, &planned))
                .collect();

            if ready.is_empty() {
                break;
            }

            planned.extend(ready.iter().copied());
            levels.push(ready);
        }

        levels
    }
}

/// Builder for stage graphs.
pub struct DagBuilder {
    nodes: Vec<StageNode>,
}

impl DagBuilder {
    pub fn new(nodes: Vec<StageNode>) -> Self {
        Self { nodes }
    }

    /// Build the graph.
    ///
    /// Every dependency must name a node in the graph and the graph must be
    /// acyclic.
    pub fn build(self) -> Result<StageGraph, PlanningError> {
        let mut index_map = HashMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if index_map.insert(node.name.clone(), i).is_some() {
                return Err(PlanningError::DuplicateStage(node.name.clone()));
            }
        }

        let mut forward_edges: Vec<Vec<StageIndex>> = vec![Vec::new(); self.nodes.len()];
        let mut reverse_edges: Vec<Vec<StageIndex>> = vec![Vec::new(); self.nodes.len()];

        for (to_idx, node) in self.nodes.iter().enumerate() {
            for dep in &node.depends_on {
                let from_idx =
                    *index_map
                        .get(dep)
                        .ok_or_else(|| PlanningError::UnknownDependency {
                            stage: node.name.clone(),
                            dependency: dep.clone(),
                        })?;

                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }

        let graph = StageGraph {
            nodes: self.nodes,
            index_map,
            forward_edges,
            reverse_edges,
        };

        Self::validate_no_cycles(&graph)?;

        Ok(graph)
    }

    /// Kahn's algorithm; whatever keeps a non-zero in-degree is on or behind a cycle.
    fn validate_no_cycles(graph: &StageGraph) -> Result<(), PlanningError> {
        let mut in_degree: Vec<usize> = graph.reverse_edges.iter().map(Vec::len).collect();

        let mut queue: Vec<StageIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut processed = 0;

        while let Some(node) = queue.pop() {
            processed += 1;

            for &dependent in graph.dependents(node) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if processed != graph.len() {
            let stages: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .filter_map(|(i, _)| graph.node(i).map(|n| n.name.clone()))
                .collect();

            return Err(PlanningError::Cycle { stages });
        }

        Ok(())
    }
}
