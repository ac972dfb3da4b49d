#![allow(clippy::result_large_err)] // Execution returns AppError so failing states keep their reason and code.

//! Sequential run of a window of a collection, recursing into nested
//! collections and mirroring results into ancestors.

use crate::core::error::AppError;
use crate::core::state_graph::directory::ExtensionLocation;
use crate::core::state_graph::engine::{apply_status, StateEngine};
use crate::core::state_graph::rerun::{calculate_states_to_run, will_run};
use crate::core::state_graph::script::{rotate_log, ScriptRequest};
use crate::core::state_graph::sort::topological_sort;
use crate::core::state_graph::state::{
    aggregate_status, resolve_window, Boundary, CollectionDocument, Phase, State, StateStatus,
};
use crate::core::types::ErrorCategory;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// Attribution and output sinks handed from a calling state to the nested
/// collection it runs.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub execution_id: String,
    pub executed_by_extension_name: String,
    /// Logs of every calling state, innermost last.
    pub log_sinks: Vec<PathBuf>,
    /// Collections currently executing above this one.
    pub call_chain: Vec<String>,
}

impl CallerContext {
    fn descend(&self, collection: &str, log_path: PathBuf) -> Self {
        let mut next = self.clone();
        next.log_sinks.push(log_path);
        next.call_chain.push(collection.to_string());
        next
    }
}

enum StepPlan {
    Skip(StateStatus),
    Run(State),
}

impl StateEngine {
    /// Run the states between `from` and `to` of a top-level collection.
    pub async fn execute(
        &self,
        name: &str,
        from: &Boundary,
        to: &Boundary,
    ) -> Result<CollectionDocument, AppError> {
        self.run_collection(name, from.clone(), to.clone(), None).await
    }

    /// Run a collection on behalf of a calling state. Parent links are not
    /// walked; the caller records the outcome itself.
    pub async fn execute_as(
        &self,
        name: &str,
        from: &Boundary,
        to: &Boundary,
        caller: CallerContext,
    ) -> Result<CollectionDocument, AppError> {
        self.run_collection(name, from.clone(), to.clone(), Some(caller))
            .await
    }

    fn run_collection<'a>(
        &'a self,
        name: &'a str,
        from: Boundary,
        to: Boundary,
        caller: Option<CallerContext>,
    ) -> BoxFuture<'a, Result<CollectionDocument, AppError>> {
        async move {
            if let Some(context) = &caller {
                if let Some(start) = context.call_chain.iter().position(|entry| entry == name) {
                    let cycle = context.call_chain[start..].to_vec();
                    tracing::warn!(collection = name, "nested collection calls itself");
                    return Err(AppError::cycle(vec![cycle]));
                }
            }

            let (execution_id, executed_by) = match &caller {
                Some(context) => (
                    context.execution_id.clone(),
                    context.executed_by_extension_name.clone(),
                ),
                None => (uuid::Uuid::new_v4().to_string(), name.to_string()),
            };
            let location = self.store.location(name)?;

            let window = self.preprocess(name, &from, &to, &caller).await?;

            self.store
                .update(name, |doc| {
                    doc.status = StateStatus::Running;
                    doc.start_time = Some(Utc::now());
                    doc.end_time = None;
                    doc.execution_id = execution_id.clone();
                    doc.executed_by_extension_name = executed_by.clone();
                    Ok(())
                })
                .await?;
            tracing::info!(
                collection = name,
                execution_id = %execution_id,
                executed_by = %executed_by,
                states = window.len(),
                "run started"
            );

            for state_name in &window {
                let step = self
                    .run_step(
                        name,
                        &location,
                        state_name,
                        &execution_id,
                        &executed_by,
                        caller.as_ref(),
                    )
                    .await;
                if let Err(err) = step {
                    tracing::warn!(collection = name, state = %state_name, error = %err, "run halted");
                    self.finish(name, StateStatus::Failed).await?;
                    if caller.is_none() {
                        if let Err(mirror_err) = self.mirror_to_parents(name).await {
                            tracing::warn!(collection = name, error = %mirror_err, "failed to update parent collections");
                        }
                    }
                    return Err(err);
                }
            }

            let document = self.finish(name, StateStatus::Succeeded).await?;
            tracing::info!(collection = name, execution_id = %execution_id, "run succeeded");
            if caller.is_none() {
                self.mirror_to_parents(name).await?;
            }
            Ok(document)
        }
        .boxed()
    }

    /// Validate, apply reruns and flag the states the run will reach.
    /// Returns the names in the window, in sorted order.
    async fn preprocess(
        &self,
        name: &str,
        from: &Boundary,
        to: &Boundary,
        caller: &Option<CallerContext>,
    ) -> Result<Vec<String>, AppError> {
        let (window, nested_flips) = self
            .store
            .update(name, |doc| {
                doc.ensure_idle()?;
                topological_sort(&mut doc.states)?;
                let range = resolve_window(&doc.states, from, to)?;
                if let Some(busy) = doc.states[range.clone()]
                    .iter()
                    .find(|state| state.status == StateStatus::Running)
                {
                    return Err(AppError::conflict(format!(
                        "state '{}' of '{}' is already running, try later",
                        busy.name, doc.extension_name
                    )));
                }

                let reruns = calculate_states_to_run(&doc.states, from, to)?;
                let mut nested_flips = Vec::new();
                for (state_name, status) in &reruns {
                    if let Some(state) = doc.state_mut(state_name) {
                        apply_status(state, *status);
                        if state.is_extension {
                            nested_flips.push((state.name.clone(), *status));
                        }
                    }
                }
                for (index, state) in doc.states.iter_mut().enumerate() {
                    state.next_run = range.contains(&index) && will_run(state);
                }
                doc.status = StateStatus::Preprocessing;
                let window = doc.states[range]
                    .iter()
                    .map(|state| state.name.clone())
                    .collect::<Vec<_>>();
                Ok((window, nested_flips))
            })
            .await?;
        tracing::debug!(collection = name, reruns = nested_flips.len(), "preprocessed run");

        let mut chain = caller
            .as_ref()
            .map(|context| context.call_chain.clone())
            .unwrap_or_default();
        chain.push(name.to_string());
        for (child, status) in nested_flips {
            if let Err(err) = self.flip_nested(&child, status, chain.clone()).await {
                self.store
                    .update(name, |doc| {
                        doc.status = aggregate_status(&doc.states);
                        Ok(())
                    })
                    .await?;
                return Err(err);
            }
        }
        Ok(window)
    }

    async fn run_step(
        &self,
        collection: &str,
        location: &ExtensionLocation,
        state_name: &str,
        execution_id: &str,
        executed_by: &str,
        caller: Option<&CallerContext>,
    ) -> Result<(), AppError> {
        let plan = self
            .store
            .update(collection, |doc| {
                let state = doc.state_mut(state_name).ok_or_else(|| {
                    AppError::new(
                        ErrorCategory::NotFoundError,
                        format!("state '{}' disappeared from '{}'", state_name, collection),
                    )
                    .with_code("SG-EXEC-005")
                })?;
                if state.phase == Phase::AtEachRun && state.status != StateStatus::Skip {
                    apply_status(state, StateStatus::Ready);
                }
                match state.status {
                    StateStatus::Succeeded | StateStatus::Skip => {
                        state.next_run = false;
                        return Ok(StepPlan::Skip(state.status));
                    }
                    StateStatus::Running | StateStatus::Preprocessing => {
                        return Err(AppError::conflict(format!(
                            "state '{}' of '{}' is busy, try later",
                            state_name, collection
                        )));
                    }
                    StateStatus::Ready | StateStatus::Failed => {}
                }
                state.status = StateStatus::Running;
                state.start_time = Some(Utc::now());
                state.end_time = None;
                state.reason.clear();
                state.execution_id = execution_id.to_string();
                state.executed_by_extension_name = executed_by.to_string();
                Ok(StepPlan::Run(state.clone()))
            })
            .await?;

        let state = match plan {
            StepPlan::Skip(status) => {
                tracing::debug!(collection, state = state_name, %status, "skipping state");
                return Ok(());
            }
            StepPlan::Run(state) => state,
        };

        tracing::debug!(collection, state = state_name, nested = state.is_extension, "running state");
        let log_path = self.log_path_for(location, &state);
        let outcome = if state.is_extension {
            self.run_nested(collection, &state, log_path, execution_id, executed_by, caller)
                .await
        } else {
            let timeout_minutes = if state.script_timeout > 0.0 {
                state.script_timeout
            } else {
                self.config.execution.default_script_timeout_minutes
            };
            let request = ScriptRequest {
                state_name: state.name.clone(),
                script: state.script.clone(),
                working_dir: location.base_dir().to_path_buf(),
                log_path,
                tee_paths: caller
                    .map(|context| context.log_sinks.clone())
                    .unwrap_or_default(),
                timeout: ScriptRequest::timeout_from_minutes(timeout_minutes),
                shell: self.config.execution.shell.clone(),
            };
            self.runner.run(&request).await
        };

        let recorded = self
            .store
            .update(collection, |doc| {
                if let Some(entry) = doc.state_mut(state_name) {
                    entry.end_time = Some(Utc::now());
                    entry.next_run = false;
                    match &outcome {
                        Ok(()) => {
                            entry.status = StateStatus::Succeeded;
                            entry.reason.clear();
                        }
                        Err(err) => {
                            entry.status = StateStatus::Failed;
                            entry.reason = err.message.clone();
                        }
                    }
                }
                Ok(())
            })
            .await;

        match (outcome, recorded) {
            (Err(err), _) => {
                tracing::warn!(collection, state = state_name, error = %err, "state failed");
                Err(err)
            }
            (Ok(()), Err(err)) => Err(err),
            (Ok(()), Ok(())) => {
                tracing::debug!(collection, state = state_name, "state succeeded");
                Ok(())
            }
        }
    }

    async fn run_nested(
        &self,
        collection: &str,
        state: &State,
        log_path: PathBuf,
        execution_id: &str,
        executed_by: &str,
        caller: Option<&CallerContext>,
    ) -> Result<(), AppError> {
        start_caller_log(&log_path, &state.name).await?;
        let context = match caller {
            Some(context) => context.descend(collection, log_path),
            None => CallerContext {
                execution_id: execution_id.to_string(),
                executed_by_extension_name: executed_by.to_string(),
                log_sinks: vec![log_path],
                call_chain: vec![collection.to_string()],
            },
        };
        self.run_collection(&state.name, Boundary::First, Boundary::Last, Some(context))
            .await
            .map(|_| ())
    }

    async fn finish(&self, name: &str, status: StateStatus) -> Result<CollectionDocument, AppError> {
        self.store
            .update(name, |doc| {
                doc.status = status;
                doc.end_time = Some(Utc::now());
                Ok(doc.clone())
            })
            .await
    }

    /// Copy this collection's status and times into its entry in each
    /// ancestor, recomputing the ancestor's status on the way up.
    pub async fn mirror_to_parents(&self, name: &str) -> Result<(), AppError> {
        let mut child = self.store.read(name).await?;
        let mut visited = HashSet::from([name.to_string()]);
        while !child.parent_extension_name.is_empty() {
            let parent = child.parent_extension_name.clone();
            if !visited.insert(parent.clone()) {
                tracing::warn!(collection = name, parent = %parent, "parent links form a loop");
                break;
            }
            let child_name = child.extension_name.clone();
            let (status, start_time, end_time) = (child.status, child.start_time, child.end_time);
            child = self
                .store
                .update(&parent, |doc| {
                    match doc.state_mut(&child_name) {
                        Some(entry) => {
                            entry.status = status;
                            entry.start_time = start_time;
                            entry.end_time = end_time;
                        }
                        None => tracing::warn!(
                            parent = %parent,
                            nested = %child_name,
                            "parent has no entry for nested collection"
                        ),
                    }
                    if !matches!(doc.status, StateStatus::Running | StateStatus::Preprocessing) {
                        doc.status = aggregate_status(&doc.states);
                    }
                    Ok(doc.clone())
                })
                .await?;
            tracing::debug!(parent = %parent, nested = %child_name, %status, "mirrored status into parent");
        }
        Ok(())
    }
}

async fn start_caller_log(log_path: &std::path::Path, nested: &str) -> Result<(), AppError> {
    rotate_log(log_path);
    let io_error = |err: std::io::Error| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to prepare log {}: {}", log_path.display(), err),
        )
        .with_code("SG-LOG-001")
    };
    if let Some(parent) = log_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }
    let mut file = tokio::fs::File::create(log_path).await.map_err(io_error)?;
    file.write_all(format!("running nested collection '{}'\n", nested).as_bytes())
        .await
        .map_err(io_error)?;
    file.flush().await.map_err(io_error)?;
    Ok(())
}
