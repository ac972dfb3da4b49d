#![allow(clippy::result_large_err)]

use super::{ConfigValidator, EngineConfig};
use crate::core::error::AppError;
use std::env;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load config from workspace root (workspace/stepgraph.toml)
    /// Environment variables override config file values
    /// A missing file yields defaults + env vars
    pub fn load_from_workspace(workspace_path: &Path) -> Result<EngineConfig, AppError> {
        let config_path = workspace_path.join("stepgraph.toml");
        let config_file = Self::load_from_file(&config_path)?;

        let mut config = config_file.unwrap_or_default();

        Self::apply_env_overrides(&mut config);

        if config.storage.states_root.is_relative() {
            config.storage.states_root = workspace_path.join(&config.storage.states_root);
        }

        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Load config from specific file path
    /// Returns Ok(None) if file doesn't exist
    pub fn load_from_file(path: &Path) -> Result<Option<EngineConfig>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(
                crate::core::types::ErrorCategory::IoError,
                format!("Failed to read config file {}: {}", path.display(), e),
            )
        })?;

        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            AppError::new(
                crate::core::types::ErrorCategory::ValidationError,
                format!("Failed to parse config file {}: {}", path.display(), e),
            )
        })?;

        Ok(Some(config))
    }

    /// Environment variables take precedence over config file values
    fn apply_env_overrides(config: &mut EngineConfig) {
        if let Ok(states_root) = env::var("STEPGRAPH_STATES_ROOT") {
            if !states_root.trim().is_empty() {
                config.storage.states_root = PathBuf::from(states_root);
            }
        }

        if let Ok(mock_str) = env::var("STEPGRAPH_MOCK_EXECUTION") {
            if let Ok(mock) = mock_str.trim().parse::<bool>() {
                config.execution.mock_execution = mock;
            }
        }

        if let Ok(shell) = env::var("STEPGRAPH_SHELL") {
            if !shell.trim().is_empty() {
                config.execution.shell = shell;
            }
        }

        if let Ok(timeout_str) = env::var("STEPGRAPH_DEFAULT_SCRIPT_TIMEOUT_MINUTES") {
            if let Ok(timeout) = timeout_str.trim().parse::<f64>() {
                config.execution.default_script_timeout_minutes = timeout;
            }
        }
    }

    /// Get documentation for supported environment variables
    pub fn env_var_documentation() -> &'static [&'static str] {
        &[
            "STEPGRAPH_STATES_ROOT - Override the collections directory (default: .stepgraph/collections)",
            "STEPGRAPH_MOCK_EXECUTION - Replace scripts with a placeholder (true/false)",
            "STEPGRAPH_SHELL - Shell used to run state scripts (default: sh)",
            "STEPGRAPH_DEFAULT_SCRIPT_TIMEOUT_MINUTES - Timeout for states without one (0 disables)",
        ]
    }
}
