#![allow(clippy::result_large_err)] // Sorting returns AppError so cycle chains travel with the failure.

use crate::core::error::AppError;
use crate::core::state_graph::graph::StateGraph;
use crate::core::state_graph::state::State;
use crate::core::types::ErrorCategory;
use petgraph::algo::tarjan_scc;
use petgraph::graph::NodeIndex;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Upper bound on the cycles listed in a single CycleError.
pub const MAX_REPORTED_CYCLES: usize = 64;

/// Sort `states` in place and canonicalize their `next_states`/`previous_states`.
///
/// Ties are broken by the current array position, so sorting an already
/// sorted collection leaves it untouched. On any error `states` is unchanged.
pub fn topological_sort(states: &mut Vec<State>) -> Result<(), AppError> {
    topological_sort_seeded(states, &HashSet::new())
}

/// Like [`topological_sort`], additionally turning the `previous_states` of
/// the named states into edges. Merges use this for carried-over states.
pub fn topological_sort_seeded(
    states: &mut Vec<State>,
    reverse_seeds: &HashSet<String>,
) -> Result<(), AppError> {
    let mut working = states.clone();
    if needs_default_chain(&working) {
        tracing::info!(
            states = working.len(),
            "no ordering edges found, deriving a linear chain"
        );
        derive_default_chain(&mut working);
    }

    let mut graph = StateGraph::build(&working)?;
    for state in working
        .iter()
        .filter(|state| reverse_seeds.contains(&state.name))
    {
        graph.seed_previous(state)?;
    }

    let order = kahn_order(&graph)?;
    let mut slots = working.into_iter().map(Some).collect::<Vec<_>>();
    let mut sorted = order
        .iter()
        .filter_map(|node| slots.get_mut(node.index()).and_then(Option::take))
        .collect::<Vec<_>>();

    let positions = sorted
        .iter()
        .enumerate()
        .map(|(position, state)| (state.name.clone(), position))
        .collect::<HashMap<_, _>>();
    for state in &mut sorted {
        state.next_states = ordered_by_position(graph.successors(&state.name), &positions);
        state.previous_states = ordered_by_position(graph.predecessors(&state.name), &positions);
    }

    validate_rerun_order(&sorted)?;
    *states = sorted;
    Ok(())
}

/// True when no state carries any ordering edge (legacy files).
pub fn needs_default_chain(states: &[State]) -> bool {
    states.len() > 1 && states.iter().all(|state| !state.has_explicit_edges())
}

/// Link every non-deleted state to the next non-deleted state in array order.
pub fn derive_default_chain(states: &mut [State]) {
    let live = states
        .iter()
        .enumerate()
        .filter(|(_, state)| !state.deleted)
        .map(|(index, _)| index)
        .collect::<Vec<_>>();
    for pair in live.windows(2) {
        let next = states[pair[1]].name.clone();
        states[pair[0]].next_states = vec![next];
    }
}

fn kahn_order(graph: &StateGraph) -> Result<Vec<NodeIndex>, AppError> {
    let inner = graph.inner();
    let mut in_degree = inner
        .node_indices()
        .map(|node| inner.neighbors_directed(node, Direction::Incoming).count())
        .collect::<Vec<_>>();
    let mut ready = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(index, _)| Reverse(index))
        .collect::<BinaryHeap<_>>();

    let mut order = Vec::with_capacity(inner.node_count());
    while let Some(Reverse(index)) = ready.pop() {
        let node = NodeIndex::new(index);
        order.push(node);
        for next in inner.neighbors_directed(node, Direction::Outgoing) {
            let degree = &mut in_degree[next.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse(next.index()));
            }
        }
    }

    if order.len() < inner.node_count() {
        let cycles = find_cycles(graph);
        tracing::warn!(cycles = cycles.len(), "state graph is cyclic");
        return Err(AppError::cycle(cycles));
    }
    Ok(order)
}

/// Enumerate the elementary cycles of the graph, each starting at its
/// lowest-indexed member.
pub fn find_cycles(graph: &StateGraph) -> Vec<Vec<String>> {
    let inner = graph.inner();
    let mut found: Vec<Vec<NodeIndex>> = Vec::new();

    for mut component in tarjan_scc(inner) {
        if component.len() < 2 {
            continue;
        }
        component.sort_by_key(|node| node.index());
        for (offset, &start) in component.iter().enumerate() {
            let allowed = component[offset..].iter().copied().collect::<HashSet<_>>();
            let mut walk = CycleWalk {
                graph: graph.inner(),
                start,
                allowed: &allowed,
                path: vec![start],
                found: &mut found,
            };
            walk.extend(start);
            if found.len() >= MAX_REPORTED_CYCLES {
                break;
            }
        }
        if found.len() >= MAX_REPORTED_CYCLES {
            break;
        }
    }

    found
        .into_iter()
        .map(|cycle| cycle.into_iter().map(|node| inner[node].clone()).collect())
        .collect()
}

struct CycleWalk<'a> {
    graph: &'a petgraph::graph::DiGraph<String, ()>,
    start: NodeIndex,
    allowed: &'a HashSet<NodeIndex>,
    path: Vec<NodeIndex>,
    found: &'a mut Vec<Vec<NodeIndex>>,
}

impl CycleWalk<'_> {
    fn extend(&mut self, current: NodeIndex) {
        let mut successors = self
            .graph
            .neighbors_directed(current, Direction::Outgoing)
            .filter(|next| self.allowed.contains(next))
            .collect::<Vec<_>>();
        successors.sort_by_key(|next| next.index());
        successors.dedup();

        for next in successors {
            if self.found.len() >= MAX_REPORTED_CYCLES {
                return;
            }
            if next == self.start {
                self.found.push(self.path.clone());
            } else if !self.path.contains(&next) {
                self.path.push(next);
                self.extend(next);
                self.path.pop();
            }
        }
    }
}

fn ordered_by_position(names: Vec<&str>, positions: &HashMap<String, usize>) -> Vec<String> {
    let mut owned = names.into_iter().map(str::to_string).collect::<Vec<_>>();
    owned.sort_by_key(|name| positions.get(name).copied().unwrap_or(usize::MAX));
    owned
}

/// StatesToRerun must sort after their definer; PrerequisiteStates and
/// RerunOnRunOfStates must sort before it.
pub fn validate_rerun_order(states: &[State]) -> Result<(), AppError> {
    let positions = states
        .iter()
        .enumerate()
        .map(|(position, state)| (state.name.as_str(), position))
        .collect::<HashMap<_, _>>();

    for (position, state) in states.iter().enumerate() {
        for target in &state.states_to_rerun {
            match positions.get(target.as_str()) {
                Some(&target_position) if target_position <= position => {
                    return Err(ordering_error(&state.name, target, "states_to_rerun", "after"));
                }
                Some(_) => {}
                None => tracing::warn!(state = %state.name, target = %target, "states_to_rerun names an unknown state"),
            }
        }
        for (field, targets) in [
            ("prerequisite_states", &state.prerequisite_states),
            ("rerun_on_run_of_states", &state.rerun_on_run_of_states),
        ] {
            for target in targets {
                match positions.get(target.as_str()) {
                    Some(&target_position) if target_position >= position => {
                        return Err(ordering_error(&state.name, target, field, "before"));
                    }
                    Some(_) => {}
                    None => tracing::warn!(state = %state.name, target = %target, field, "rerun list names an unknown state"),
                }
            }
        }
    }
    Ok(())
}

fn ordering_error(state: &str, target: &str, field: &str, expected: &str) -> AppError {
    let mut err = AppError::new(
        ErrorCategory::OrderingError,
        format!(
            "state '{}' lists '{}' in {} but '{}' does not sort {} it",
            state, target, field, target, expected
        ),
    )
    .with_code("SG-SORT-001");
    err.add_context("state", state);
    err.add_context("target", target);
    err
}
