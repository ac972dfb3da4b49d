#![allow(clippy::result_large_err)] // Merge returns AppError so cycle diagnostics reach the caller unchanged.

use crate::core::error::AppError;
use crate::core::state_graph::graph::StateGraph;
use crate::core::state_graph::sort::{topological_sort, topological_sort_seeded};
use crate::core::state_graph::state::{position_of, State};
use std::collections::HashSet;

/// How an incoming state list is reconciled with the persisted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Incoming states replace the persisted ones.
    Overwrite,
    /// Runtime fields of known states survive; unknown persisted states are kept.
    Merge,
}

impl MergeMode {
    pub fn from_overwrite(overwrite: bool) -> Self {
        if overwrite {
            MergeMode::Overwrite
        } else {
            MergeMode::Merge
        }
    }
}

/// Reconcile `existing` with `incoming` and return the sorted result.
///
/// Incoming states flagged `deleted` are removed from both sides first. Nothing
/// is written here; on error the caller keeps its persisted copy.
pub fn merge_states(
    existing: &[State],
    incoming: Vec<State>,
    mode: MergeMode,
) -> Result<Vec<State>, AppError> {
    let deleted = incoming
        .iter()
        .filter(|state| state.deleted)
        .map(|state| state.name.clone())
        .collect::<HashSet<_>>();
    let incoming = incoming
        .into_iter()
        .filter(|state| !state.deleted)
        .collect::<Vec<_>>();
    for state in &incoming {
        state.validate_definition()?;
    }
    let survivors = existing
        .iter()
        .filter(|state| !state.deleted && !deleted.contains(&state.name))
        .collect::<Vec<_>>();

    if mode == MergeMode::Overwrite || survivors.is_empty() {
        let mut merged = incoming;
        topological_sort(&mut merged)?;
        tracing::debug!(states = merged.len(), "overwrote state collection");
        return Ok(merged);
    }

    StateGraph::build(&incoming)?;
    let mut merged = incoming;
    let mut carried = HashSet::new();
    for old in survivors {
        match position_of(&merged, &old.name) {
            Some(position) => {
                let target = &mut merged[position];
                target.copy_runtime_from(old);
                if target.log_path.is_empty() {
                    target.log_path = old.log_path.clone();
                }
            }
            None => {
                carried.insert(old.name.clone());
                merged.push(old.clone());
            }
        }
    }

    topological_sort_seeded(&mut merged, &carried)?;
    tracing::debug!(
        states = merged.len(),
        carried = carried.len(),
        "merged state collection"
    );
    Ok(merged)
}
