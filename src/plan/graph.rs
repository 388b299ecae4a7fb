// src/plan/graph.rs

//! In-memory DAG over a [`Plan`]'s tasks, adjacency plus topological order.
//!
//! Mirrors the teacher's `dag::graph::DagGraph` shape (adjacency maps kept
//! by hand for `dependencies_of`/`dependents_of`), but acyclicity here is
//! established with `petgraph` rather than assumed, since a `Plan` arrives
//! from an external, fallible `PlanProducer` instead of a hand-validated
//! config file.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{DagforgeError, Result};
use crate::plan::model::Plan;

#[derive(Debug, Clone)]
struct Node {
    deps: Vec<String>,
    dependents: Vec<String>,
}

/// Validated DAG over task ids. Construction fails on duplicate ids, a
/// reference to an unknown dependency, or a cycle (spec §3 invariants 1-2).
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: HashMap<String, Node>,
    /// Stable topological order, used only for file-scope reasoning and as
    /// a dispatch tie-breaker (spec §4.2 step 1) - never for serializing
    /// execution.
    topo_order: Vec<String>,
    topo_index: HashMap<String, usize>,
}

impl TaskGraph {
    pub fn build(plan: &Plan) -> Result<Self> {
        let mut nodes: HashMap<String, Node> = HashMap::new();

        for task in &plan.tasks {
            if nodes
                .insert(
                    task.id.clone(),
                    Node {
                        deps: task.dependencies.clone(),
                        dependents: Vec::new(),
                    },
                )
                .is_some()
            {
                return Err(DagforgeError::PlanInvalid(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }
        }

        let ids: Vec<String> = nodes.keys().cloned().collect();
        for id in &ids {
            let deps = nodes[id].deps.clone();
            for dep in &deps {
                if !nodes.contains_key(dep) {
                    return Err(DagforgeError::PlanInvalid(format!(
                        "task '{id}' depends on unknown task '{dep}'"
                    )));
                }
                if dep == id {
                    return Err(DagforgeError::PlanInvalid(format!(
                        "task '{id}' cannot depend on itself"
                    )));
                }
                nodes.get_mut(dep).unwrap().dependents.push(id.clone());
            }
        }

        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for id in &ids {
            graph.add_node(id.as_str());
        }
        for id in &ids {
            for dep in &nodes[id].deps {
                graph.add_edge(dep.as_str(), id.as_str(), ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            DagforgeError::PlanInvalid(format!(
                "cycle detected in task DAG involving task '{}'",
                cycle.node_id()
            ))
        })?;

        let topo_order: Vec<String> = order.into_iter().map(|s| s.to_string()).collect();
        let topo_index = topo_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        Ok(Self {
            nodes,
            topo_order,
            topo_index,
        })
    }

    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.nodes.get(id).map(|n| n.deps.as_slice()).unwrap_or(&[])
    }

    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    pub fn topo_order(&self) -> &[String] {
        &self.topo_order
    }

    pub fn topo_index(&self, id: &str) -> usize {
        self.topo_index.get(id).copied().unwrap_or(usize::MAX)
    }

    /// All transitive dependencies of `id`, not including `id` itself
    /// (spec §4.5 "dependency closure").
    pub fn dependency_closure(&self, id: &str) -> std::collections::HashSet<String> {
        let mut seen = std::collections::HashSet::new();
        let mut stack: Vec<String> = self.dependencies_of(id).to_vec();
        while let Some(dep) = stack.pop() {
            if seen.insert(dep.clone()) {
                stack.extend(self.dependencies_of(&dep).iter().cloned());
            }
        }
        seen
    }

    /// Count of dependents not yet terminal, used as the scheduler's
    /// dispatch tie-break (spec §4.2: "fewest dependents-remaining").
    pub fn dependents_remaining_count(&self, id: &str) -> usize {
        self.dependents_of(id).len()
    }
}
