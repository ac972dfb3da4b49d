#![allow(clippy::result_large_err)] // Engine operations return AppError so callers receive typed diagnostics.

//! Public operations over persisted collections.

use crate::core::config::EngineConfig;
use crate::core::error::AppError;
use crate::core::state_graph::directory::{ExtensionDirectory, ExtensionLocation, FileSystemDirectory};
use crate::core::state_graph::editor::{self, InsertRequest};
use crate::core::state_graph::merge::{merge_states, MergeMode};
use crate::core::state_graph::rerun;
use crate::core::state_graph::script::{MockScriptRunner, ScriptRunner, ShellScriptRunner};
use crate::core::state_graph::sort::topological_sort;
use crate::core::state_graph::state::{
    aggregate_status, Boundary, CollectionDocument, State, StateStatus,
};
use crate::core::state_graph::store::CollectionStore;
use crate::core::types::ErrorCategory;
use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct StateEngine {
    pub(super) config: EngineConfig,
    pub(super) store: CollectionStore,
    pub(super) runner: Arc<dyn ScriptRunner>,
}

impl StateEngine {
    /// Engine over `<states_root>/<name>/states.json`.
    pub fn new(config: EngineConfig) -> Self {
        let directory = FileSystemDirectory::new(config.storage.states_root.clone())
            .with_embedded(config.storage.embedded.iter().cloned());
        Self::with_directory(config, Arc::new(directory))
    }

    pub fn with_directory(config: EngineConfig, directory: Arc<dyn ExtensionDirectory>) -> Self {
        let runner: Arc<dyn ScriptRunner> = if config.execution.mock_execution {
            Arc::new(MockScriptRunner)
        } else {
            Arc::new(ShellScriptRunner)
        };
        Self {
            config,
            store: CollectionStore::new(directory),
            runner,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn location(&self, name: &str) -> Result<ExtensionLocation, AppError> {
        self.store.location(name)
    }

    pub async fn get_states(&self, name: &str) -> Result<CollectionDocument, AppError> {
        self.store.read(name).await
    }

    /// Replace (`overwrite`) or merge the collection's states.
    pub async fn set_states(
        &self,
        name: &str,
        states: Vec<State>,
        overwrite: bool,
    ) -> Result<CollectionDocument, AppError> {
        let mode = MergeMode::from_overwrite(overwrite);
        let document = self
            .store
            .update(name, |doc| {
                doc.ensure_idle()?;
                let merged = merge_states(&doc.states, states, mode)?;
                self.check_children(name, &merged)?;
                doc.states = merged;
                Ok(doc.clone())
            })
            .await?;
        tracing::info!(collection = name, states = document.states.len(), ?mode, "set states");
        self.link_children(name, &document.states).await?;
        Ok(document)
    }

    /// Replace the definition of one existing state.
    pub async fn set_state(&self, name: &str, state: State) -> Result<CollectionDocument, AppError> {
        state.validate_definition()?;
        let document = self
            .store
            .update(name, |doc| {
                doc.ensure_idle()?;
                let mut states = doc.states.clone();
                let target = states
                    .iter_mut()
                    .find(|existing| existing.name == state.name)
                    .ok_or_else(|| {
                        AppError::new(
                            ErrorCategory::NotFoundError,
                            format!("state '{}' does not exist in '{}'", state.name, name),
                        )
                        .with_code("SG-ENGINE-001")
                    })?;
                target.copy_definition_from(&state);
                if state.has_explicit_edges() {
                    target.previous_states = state.previous_states.clone();
                    target.next_states = state.next_states.clone();
                }
                topological_sort(&mut states)?;
                self.check_children(name, &states)?;
                doc.states = states;
                Ok(doc.clone())
            })
            .await?;
        tracing::info!(collection = name, state = %state.name, "set state");
        self.link_children(name, &document.states).await?;
        Ok(document)
    }

    /// Set statuses by name. Nested collections of extension states receive
    /// the same status for all their non-SKIP states.
    pub async fn set_states_statuses(
        &self,
        name: &str,
        statuses: IndexMap<String, StateStatus>,
    ) -> Result<CollectionDocument, AppError> {
        self.apply_statuses(name, statuses, false, Vec::new()).await
    }

    pub async fn insert_state(
        &self,
        name: &str,
        request: InsertRequest,
    ) -> Result<CollectionDocument, AppError> {
        let inserted = request.state.name.clone();
        let is_extension = request.state.is_extension;
        if is_extension {
            self.check_children(name, std::slice::from_ref(&request.state))?;
        }
        let document = self
            .store
            .update(name, |doc| {
                doc.ensure_idle()?;
                editor::insert_state(&mut doc.states, request)?;
                Ok(doc.clone())
            })
            .await?;
        tracing::info!(collection = name, state = %inserted, "inserted state");
        if is_extension {
            self.set_parent_link(&inserted, name).await?;
        }
        Ok(document)
    }

    pub async fn delete_state(
        &self,
        name: &str,
        position: Option<usize>,
        state_name: Option<&str>,
    ) -> Result<CollectionDocument, AppError> {
        let (document, removed) = self
            .store
            .update(name, |doc| {
                doc.ensure_idle()?;
                let removed = editor::delete_state(&mut doc.states, position, state_name)?;
                Ok((doc.clone(), removed))
            })
            .await?;
        tracing::info!(collection = name, state = %removed.name, "deleted state");
        if removed.is_extension {
            self.clear_parent_link(&removed.name, name).await?;
        }
        Ok(document)
    }

    /// Put every non-SKIP state back to READY, recursively. Allowed while
    /// RUNNING so an interrupted run can be recovered.
    pub async fn reset_engine(&self, name: &str) -> Result<CollectionDocument, AppError> {
        self.reset_recursive(name, Vec::new()).await
    }

    pub async fn reset_engine_execution_info(
        &self,
        name: &str,
    ) -> Result<CollectionDocument, AppError> {
        let document = self
            .store
            .update(name, |doc| {
                doc.execution_id.clear();
                doc.executed_by_extension_name.clear();
                for state in &mut doc.states {
                    state.clear_execution_info();
                }
                Ok(doc.clone())
            })
            .await?;
        tracing::info!(collection = name, "reset execution info");
        Ok(document)
    }

    pub async fn calculate_states_to_run(
        &self,
        name: &str,
        from: &Boundary,
        to: &Boundary,
    ) -> Result<IndexMap<String, StateStatus>, AppError> {
        let mut document = self.store.read(name).await?;
        topological_sort(&mut document.states)?;
        rerun::calculate_states_to_run(&document.states, from, to)
    }

    /// Current contents of a state's log.
    pub async fn get_log(&self, name: &str, state_name: &str) -> Result<String, AppError> {
        let location = self.store.location(name)?;
        let document = self.store.read(name).await?;
        let state = document.state(state_name).ok_or_else(|| {
            AppError::new(
                ErrorCategory::NotFoundError,
                format!("state '{}' does not exist in '{}'", state_name, name),
            )
            .with_code("SG-ENGINE-001")
        })?;
        let path = self.log_path_for(&location, state);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(AppError::new(
                ErrorCategory::NotFoundError,
                format!("no log for state '{}' at {}", state_name, path.display()),
            )
            .with_code("SG-ENGINE-002")),
            Err(err) => Err(AppError::new(
                ErrorCategory::IoError,
                format!("failed to read {}: {}", path.display(), err),
            )
            .with_code("SG-ENGINE-003")),
        }
    }

    /// `log_path` when set (relative paths resolve against the collection
    /// directory), otherwise `<collection dir>/<log_dir_name>/<state>.log`.
    pub fn log_path_for(&self, location: &ExtensionLocation, state: &State) -> PathBuf {
        if !state.log_path.trim().is_empty() {
            let configured = Path::new(state.log_path.trim());
            if configured.is_absolute() {
                return configured.to_path_buf();
            }
            return location.base_dir().join(configured);
        }
        location
            .base_dir()
            .join(&self.config.storage.log_dir_name)
            .join(format!("{}.log", state.name))
    }

    pub(super) fn apply_statuses<'a>(
        &'a self,
        name: &'a str,
        statuses: IndexMap<String, StateStatus>,
        nested: bool,
        chain: Vec<String>,
    ) -> BoxFuture<'a, Result<CollectionDocument, AppError>> {
        async move {
            if let Some(start) = chain.iter().position(|visited| visited == name) {
                return Err(AppError::cycle(vec![chain[start..].to_vec()]));
            }
            let (document, children) = self
                .store
                .update(name, |doc| {
                    doc.ensure_idle()?;
                    if let Some(unknown) = statuses.keys().find(|key| doc.state(key).is_none()) {
                        return Err(AppError::new(
                            ErrorCategory::NotFoundError,
                            format!("state '{}' does not exist in '{}'", unknown, name),
                        )
                        .with_code("SG-ENGINE-001"));
                    }
                    let mut children = Vec::new();
                    for (state_name, status) in &statuses {
                        let Some(state) = doc.state_mut(state_name) else {
                            continue;
                        };
                        if nested && state.status == StateStatus::Skip {
                            continue;
                        }
                        apply_status(state, *status);
                        if state.is_extension {
                            children.push((state.name.clone(), *status));
                        }
                    }
                    if doc.status != StateStatus::Preprocessing {
                        doc.status = aggregate_status(&doc.states);
                    }
                    Ok((doc.clone(), children))
                })
                .await?;

            let mut chain = chain;
            chain.push(name.to_string());
            for (child, status) in children {
                self.flip_nested(&child, status, chain.clone()).await?;
            }
            Ok(document)
        }
        .boxed()
    }

    /// Give every state of a nested collection `status`, leaving SKIP alone.
    pub(super) async fn flip_nested(
        &self,
        child: &str,
        status: StateStatus,
        chain: Vec<String>,
    ) -> Result<(), AppError> {
        let nested = self.store.read(child).await?;
        if nested.states.is_empty() {
            return Ok(());
        }
        let statuses = nested
            .states
            .iter()
            .map(|state| (state.name.clone(), status))
            .collect::<IndexMap<_, _>>();
        tracing::debug!(collection = child, %status, "propagating status into nested collection");
        self.apply_statuses(child, statuses, true, chain).await?;
        Ok(())
    }

    fn reset_recursive<'a>(
        &'a self,
        name: &'a str,
        chain: Vec<String>,
    ) -> BoxFuture<'a, Result<CollectionDocument, AppError>> {
        async move {
            let document = self
                .store
                .update(name, |doc| {
                    for state in &mut doc.states {
                        if state.status != StateStatus::Skip {
                            state.status = StateStatus::Ready;
                        }
                        state.clear_runtime();
                    }
                    doc.status = StateStatus::Ready;
                    doc.start_time = None;
                    doc.end_time = None;
                    Ok(doc.clone())
                })
                .await?;
            tracing::info!(collection = name, "reset collection");

            let mut chain = chain;
            chain.push(name.to_string());
            for state in document.states.iter().filter(|state| state.is_extension) {
                if chain.contains(&state.name) {
                    tracing::warn!(collection = name, nested = %state.name, "skipping recursive reset of a collection already on the path");
                    continue;
                }
                self.reset_recursive(&state.name, chain.clone()).await?;
            }
            Ok(document)
        }
        .boxed()
    }

    /// Nested collections named by extension states must resolve before
    /// anything is written.
    fn check_children(&self, name: &str, states: &[State]) -> Result<(), AppError> {
        for state in states
            .iter()
            .filter(|state| state.is_extension && state.name != name)
        {
            self.store.location(&state.name)?;
        }
        Ok(())
    }

    async fn link_children(&self, name: &str, states: &[State]) -> Result<(), AppError> {
        for state in states.iter().filter(|state| state.is_extension) {
            self.set_parent_link(&state.name, name).await?;
        }
        Ok(())
    }

    async fn set_parent_link(&self, child: &str, parent: &str) -> Result<(), AppError> {
        if child == parent {
            tracing::warn!(collection = parent, "collection nests itself, parent link not recorded");
            return Ok(());
        }
        self.store
            .update(child, |doc| {
                if doc.parent_extension_name != parent {
                    if !doc.parent_extension_name.is_empty() {
                        tracing::warn!(
                            collection = child,
                            previous = %doc.parent_extension_name,
                            parent,
                            "replacing parent link"
                        );
                    }
                    doc.parent_extension_name = parent.to_string();
                }
                Ok(())
            })
            .await
    }

    async fn clear_parent_link(&self, child: &str, parent: &str) -> Result<(), AppError> {
        self.store
            .update(child, |doc| {
                if doc.parent_extension_name == parent {
                    doc.parent_extension_name.clear();
                }
                Ok(())
            })
            .await
    }
}

/// Set a state's status; READY also clears the previous run's timing and reason.
pub(super) fn apply_status(state: &mut State, status: StateStatus) {
    state.status = status;
    if status == StateStatus::Ready {
        state.clear_runtime();
    }
}
