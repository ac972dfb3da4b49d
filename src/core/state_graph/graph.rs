#![allow(clippy::result_large_err)] // Graph construction returns AppError to keep validation context intact.

//! Name-keyed adjacency graph rebuilt from a collection's edge lists for the
//! duration of one operation.

use crate::core::error::AppError;
use crate::core::state_graph::state::State;
use crate::core::types::ErrorCategory;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct StateGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl StateGraph {
    /// One node per state (deleted ones included) and one edge per resolvable
    /// `next_states` entry. Node indices follow the array order.
    pub fn build(states: &[State]) -> Result<Self, AppError> {
        let mut graph = StateGraph::default();
        for state in states {
            graph.add_state(&state.name)?;
        }
        for state in states {
            for next in &state.next_states {
                graph.link(&state.name, next)?;
            }
        }
        Ok(graph)
    }

    pub fn add_state(&mut self, name: &str) -> Result<NodeIndex, AppError> {
        if self.index.contains_key(name) {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("duplicate state name '{}'", name),
            )
            .with_code("SG-GRAPH-001"));
        }
        let node = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), node);
        Ok(node)
    }

    /// Add `from -> to`. Unknown endpoints are dropped with a warning; a self
    /// edge is rejected.
    pub fn link(&mut self, from: &str, to: &str) -> Result<bool, AppError> {
        if from == to {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("state '{}' cannot follow itself", from),
            )
            .with_code("SG-GRAPH-003"));
        }
        let (Some(&source), Some(&target)) = (self.index.get(from), self.index.get(to)) else {
            tracing::warn!(from, to, "dropping edge to unknown state");
            return Ok(false);
        };
        self.graph.update_edge(source, target, ());
        Ok(true)
    }

    /// Seed reverse edges from a state's own `previous_states`.
    pub fn seed_previous(&mut self, state: &State) -> Result<(), AppError> {
        for previous in &state.previous_states {
            self.link(previous, &state.name)?;
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&source), Some(&target)) => self.graph.contains_edge(source, target),
            _ => false,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn successors(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    pub fn predecessors(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        let Some(&node) = self.index.get(name) else {
            return Vec::new();
        };
        let mut found = self
            .graph
            .neighbors_directed(node, direction)
            .collect::<Vec<_>>();
        found.sort_by_key(|neighbor| neighbor.index());
        found
            .into_iter()
            .map(|neighbor| self.graph[neighbor].as_str())
            .collect()
    }

    pub(crate) fn inner(&self) -> &DiGraph<String, ()> {
        &self.graph
    }
}
