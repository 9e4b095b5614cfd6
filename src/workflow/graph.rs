//! Step dependency graph.
//!
//! `StepGraph` indexes a workflow's steps in a petgraph `DiGraph`, with an
//! edge from each dependency to its dependent. Building the graph is the
//! validation pass run at registration: duplicate step ids, references to
//! unknown steps and cycles are rejected.

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use super::types::WorkflowStep;
use crate::error::{Error, Result};

pub struct StepGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl StepGraph {
    /// Build and validate the graph for `steps`.
    pub fn build(steps: &[WorkflowStep]) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for step in steps {
            if index.contains_key(&step.step_id) {
                return Err(Error::Validation(format!(
                    "duplicate step id: {}",
                    step.step_id
                )));
            }
            let node = graph.add_node(step.step_id.clone());
            index.insert(step.step_id.clone(), node);
        }

        for step in steps {
            let to = index[&step.step_id];
            for dep in &step.depends_on {
                let from = index.get(dep).ok_or_else(|| {
                    Error::Validation(format!(
                        "step {} depends on unknown step {}",
                        step.step_id, dep
                    ))
                })?;
                graph.add_edge(*from, to, ());
            }
        }

        toposort(&graph, None).map_err(|cycle| {
            let step_id = graph
                .node_weight(cycle.node_id())
                .map(String::as_str)
                .unwrap_or("unknown");
            Error::Validation(format!("dependency cycle at step {}", step_id))
        })?;

        Ok(Self { graph, index })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.index.contains_key(step_id)
    }

    /// Direct dependencies of `step_id`.
    pub fn dependencies(&self, step_id: &str) -> Vec<&str> {
        self.neighbors(step_id, Direction::Incoming)
    }

    /// Steps that directly depend on `step_id`.
    pub fn dependents(&self, step_id: &str) -> Vec<&str> {
        self.neighbors(step_id, Direction::Outgoing)
    }

    fn neighbors(&self, step_id: &str, direction: Direction) -> Vec<&str> {
        let Some(&node) = self.index.get(step_id) else {
            return Vec::new();
        };
        let mut ids: Vec<&str> = self
            .graph
            .neighbors_directed(node, direction)
            .filter_map(|n| self.graph.node_weight(n).map(String::as_str))
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Steps not yet `started` whose dependencies are all in `completed`,
    /// in declaration order.
    pub fn ready_steps(
        &self,
        completed: &BTreeSet<String>,
        started: &BTreeSet<String>,
    ) -> Vec<&str> {
        self.graph
            .node_indices()
            .filter_map(|node| {
                let step_id = self.graph.node_weight(node)?;
                if started.contains(step_id) || completed.contains(step_id) {
                    return None;
                }
                let satisfied = self
                    .graph
                    .neighbors_directed(node, Direction::Incoming)
                    .all(|dep| {
                        self.graph
                            .node_weight(dep)
                            .map(|id| completed.contains(id))
                            .unwrap_or(false)
                    });
                satisfied.then_some(step_id.as_str())
            })
            .collect()
    }

    /// True when every step id is in `completed`.
    pub fn all_complete(&self, completed: &BTreeSet<String>) -> bool {
        self.index.keys().all(|id| completed.contains(id))
    }

    /// Step ids ordered so each comes after its dependencies.
    pub fn topological_order(&self) -> Vec<&str> {
        toposort(&self.graph, None)
            .map(|order| {
                order
                    .into_iter()
                    .filter_map(|n| self.graph.node_weight(n).map(String::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for StepGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepGraph")
            .field("steps", &self.graph.node_count())
            .field("dependencies", &self.graph.edge_count())
            .finish()
    }
}
