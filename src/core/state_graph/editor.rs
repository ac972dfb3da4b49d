#![allow(clippy::result_large_err)] // Editor returns AppError so rollbacks keep the original diagnostic.

//! Positional and relative edits of a state array. Every edit re-sorts the
//! collection and restores the pre-edit array when sorting fails.

use crate::core::error::AppError;
use crate::core::state_graph::sort::{derive_default_chain, needs_default_chain, topological_sort};
use crate::core::state_graph::state::{position_of, State};
use crate::core::types::ErrorCategory;

/// Where and how a state is inserted.
#[derive(Debug, Clone)]
pub struct InsertRequest {
    pub state: State,
    /// 1-based position in the pre-edit array.
    pub reference_position: usize,
    /// Overrides `reference_position` with the current position of this state.
    pub reference_state_name: Option<String>,
    pub before: bool,
    pub overwrite: bool,
}

impl InsertRequest {
    pub fn at(state: State, reference_position: usize) -> Self {
        Self {
            state,
            reference_position,
            reference_state_name: None,
            before: false,
            overwrite: false,
        }
    }

    pub fn relative_to(state: State, reference_state_name: impl Into<String>) -> Self {
        Self {
            state,
            reference_position: 0,
            reference_state_name: Some(reference_state_name.into()),
            before: false,
            overwrite: false,
        }
    }

    pub fn before(mut self) -> Self {
        self.before = true;
        self
    }

    pub fn overwrite(mut self) -> Self {
        self.overwrite = true;
        self
    }
}

pub fn insert_state(states: &mut Vec<State>, request: InsertRequest) -> Result<(), AppError> {
    request.state.validate_definition()?;
    let name = request.state.name.clone();
    let snapshot = states.clone();
    let result = apply_insert(states, request).and_then(|_| topological_sort(states));
    if let Err(err) = result {
        tracing::warn!(state = %name, error = %err, "insert rolled back");
        *states = snapshot;
        return Err(err);
    }
    tracing::debug!(state = %name, "inserted state");
    Ok(())
}

/// Remove a state by name (preferred) or 1-based position and return it.
pub fn delete_state(
    states: &mut Vec<State>,
    position: Option<usize>,
    state_name: Option<&str>,
) -> Result<State, AppError> {
    let index = resolve_target(states, position, state_name)?;
    if states[index].protected {
        return Err(AppError::new(
            ErrorCategory::ValidationError,
            format!("state '{}' is protected and cannot be deleted", states[index].name),
        )
        .with_code("SG-EDIT-005"));
    }

    let snapshot = states.clone();
    if needs_default_chain(states) {
        derive_default_chain(states);
    }
    let removed = unlink(states, index);
    for state in states.iter_mut() {
        state.forget(&removed.name);
    }
    if let Err(err) = topological_sort(states) {
        *states = snapshot;
        return Err(err);
    }
    tracing::debug!(state = %removed.name, "deleted state");
    Ok(removed)
}

fn apply_insert(states: &mut Vec<State>, request: InsertRequest) -> Result<(), AppError> {
    let InsertRequest {
        state,
        reference_position,
        reference_state_name,
        before,
        overwrite,
    } = request;

    let anchor = resolve_anchor(states, reference_position, reference_state_name.as_deref())?;
    if needs_default_chain(states) {
        derive_default_chain(states);
    }

    let (incoming, fallback_index) = match position_of(states, &state.name) {
        Some(existing_index) => {
            if !overwrite {
                return Err(AppError::new(
                    ErrorCategory::ValidationError,
                    format!("state '{}' already exists", state.name),
                )
                .with_code("SG-EDIT-001"));
            }
            let mut updated = states[existing_index].clone();
            updated.copy_definition_from(&state);
            if anchor.as_deref() == Some(state.name.as_str()) && !state.has_explicit_edges() {
                states[existing_index] = updated;
                return Ok(());
            }
            unlink(states, existing_index);
            updated.previous_states = state.previous_states;
            updated.next_states = state.next_states;
            (updated, existing_index)
        }
        None => {
            let length = states.len();
            (state, length)
        }
    };

    let anchor = anchor.filter(|name| *name != incoming.name);
    let index = match anchor.as_deref().and_then(|name| position_of(states, name)) {
        Some(anchor_index) if before => anchor_index,
        Some(anchor_index) => anchor_index + 1,
        None => fallback_index.min(states.len()),
    };

    if incoming.has_explicit_edges() {
        wire_explicit(states, &incoming)?;
    } else if let Some(anchor_name) = anchor.as_deref() {
        wire_positional(states, &incoming.name, anchor_name, before);
        let mut incoming = incoming;
        if before {
            incoming.next_states = vec![anchor_name.to_string()];
        } else {
            incoming.next_states = states
                .iter()
                .find(|candidate| candidate.name == anchor_name)
                .map(|anchor_state| anchor_state.next_states.clone())
                .unwrap_or_default()
                .into_iter()
                .filter(|next| *next != incoming.name)
                .collect();
            if let Some(anchor_state) = states.iter_mut().find(|candidate| candidate.name == anchor_name) {
                anchor_state.next_states = vec![incoming.name.clone()];
            }
        }
        states.insert(index, incoming);
        return Ok(());
    }

    states.insert(index, incoming);
    Ok(())
}

/// Redirect edges into `anchor` through the new state when inserting before it.
fn wire_positional(states: &mut [State], name: &str, anchor: &str, before: bool) {
    if !before {
        return;
    }
    for state in states.iter_mut() {
        if let Some(slot) = state.next_states.iter().position(|next| next == anchor) {
            state.next_states[slot] = name.to_string();
            dedup_in_order(&mut state.next_states);
        }
    }
}

fn wire_explicit(states: &mut [State], incoming: &State) -> Result<(), AppError> {
    for reference in incoming.previous_states.iter().chain(&incoming.next_states) {
        if position_of(states, reference).is_none() {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!(
                    "state '{}' references unknown state '{}'",
                    incoming.name, reference
                ),
            )
            .with_code("SG-EDIT-004"));
        }
    }
    for previous in &incoming.previous_states {
        if let Some(state) = states.iter_mut().find(|state| state.name == *previous) {
            if !state.next_states.contains(&incoming.name) {
                state.next_states.push(incoming.name.clone());
            }
        }
    }
    Ok(())
}

/// Remove the state at `index`, bridging its predecessors to its successors.
fn unlink(states: &mut Vec<State>, index: usize) -> State {
    let removed = states.remove(index);
    for state in states.iter_mut() {
        if let Some(slot) = state.next_states.iter().position(|next| *next == removed.name) {
            state.next_states.remove(slot);
            for follower in &removed.next_states {
                if *follower != state.name && !state.next_states.contains(follower) {
                    state.next_states.push(follower.clone());
                }
            }
        }
        state.previous_states.retain(|previous| *previous != removed.name);
    }
    removed
}

fn resolve_anchor(
    states: &[State],
    reference_position: usize,
    reference_state_name: Option<&str>,
) -> Result<Option<String>, AppError> {
    if let Some(name) = reference_state_name.filter(|name| !name.trim().is_empty()) {
        return match position_of(states, name) {
            Some(_) => Ok(Some(name.to_string())),
            None => Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("reference state '{}' does not exist", name),
            )
            .with_code("SG-EDIT-002")),
        };
    }
    if states.is_empty() {
        return Ok(None);
    }
    if reference_position == 0 || reference_position > states.len() {
        return Err(AppError::new(
            ErrorCategory::ValidationError,
            format!(
                "position {} is outside 1..={}",
                reference_position,
                states.len()
            ),
        )
        .with_code("SG-EDIT-003"));
    }
    Ok(Some(states[reference_position - 1].name.clone()))
}

fn resolve_target(
    states: &[State],
    position: Option<usize>,
    state_name: Option<&str>,
) -> Result<usize, AppError> {
    if let Some(name) = state_name.filter(|name| !name.trim().is_empty()) {
        return position_of(states, name).ok_or_else(|| {
            AppError::new(
                ErrorCategory::NotFoundError,
                format!("state '{}' does not exist", name),
            )
            .with_code("SG-EDIT-006")
        });
    }
    match position {
        Some(position) if position >= 1 && position <= states.len() => Ok(position - 1),
        Some(position) => Err(AppError::new(
            ErrorCategory::ValidationError,
            format!("position {} is outside 1..={}", position, states.len()),
        )
        .with_code("SG-EDIT-003")),
        None => Err(AppError::new(
            ErrorCategory::ValidationError,
            "either a state name or a position is required",
        )
        .with_code("SG-EDIT-007")),
    }
}

fn dedup_in_order(names: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    names.retain(|name| seen.insert(name.clone()));
}
