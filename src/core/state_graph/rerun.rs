#![allow(clippy::result_large_err)] // Rerun calculation returns AppError for unresolvable boundaries.

use crate::core::error::AppError;
use crate::core::state_graph::state::{resolve_window, Boundary, Phase, State, StateStatus};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};

/// States that must be flipped back to READY before running `from..=to`.
///
/// Seeds are the in-window states that will run (READY, FAILED, or AtEachRun
/// and not SKIP). Each dequeued state pulls in its `states_to_rerun`, its
/// `prerequisite_states` and every state listing it in `rerun_on_run_of_states`.
/// SKIP targets are never touched. The map preserves discovery order.
pub fn calculate_states_to_run(
    states: &[State],
    from: &Boundary,
    to: &Boundary,
) -> Result<IndexMap<String, StateStatus>, AppError> {
    let window = resolve_window(states, from, to)?;
    let by_name = states
        .iter()
        .map(|state| (state.name.as_str(), state))
        .collect::<HashMap<_, _>>();

    let mut dependants: HashMap<&str, Vec<&str>> = HashMap::new();
    for state in states {
        for watched in &state.rerun_on_run_of_states {
            dependants
                .entry(watched.as_str())
                .or_default()
                .push(state.name.as_str());
        }
    }

    let mut queue = states[window]
        .iter()
        .filter(|state| will_run(state))
        .map(|state| state.name.as_str())
        .collect::<VecDeque<_>>();
    let mut visited = queue.iter().copied().collect::<HashSet<_>>();
    let mut result = IndexMap::new();

    while let Some(current) = queue.pop_front() {
        let Some(state) = by_name.get(current) else {
            continue;
        };
        let targets = state
            .states_to_rerun
            .iter()
            .chain(&state.prerequisite_states)
            .map(String::as_str)
            .chain(dependants.get(current).into_iter().flatten().copied());

        for target in targets {
            let Some(target_state) = by_name.get(target) else {
                tracing::warn!(state = %current, target, "rerun target does not exist");
                continue;
            };
            if target_state.status == StateStatus::Skip {
                continue;
            }
            result.insert(target.to_string(), StateStatus::Ready);
            if visited.insert(target) {
                queue.push_back(target);
            }
        }
    }

    tracing::debug!(reruns = result.len(), "calculated states to run");
    Ok(result)
}

/// Whether a run over a window containing `state` would execute it.
pub fn will_run(state: &State) -> bool {
    state.status.is_runnable()
        || (state.phase == Phase::AtEachRun && state.status != StateStatus::Skip)
}
