#![allow(clippy::result_large_err)]

use super::EngineConfig;
use crate::core::error::AppError;
use crate::core::state_graph::state::script_timeout_duration;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate configuration rules
    pub fn validate(config: &EngineConfig) -> Result<(), AppError> {
        if config.storage.states_root.as_os_str().is_empty() {
            return Err(AppError::new(
                crate::core::types::ErrorCategory::ValidationError,
                "storage.states_root cannot be empty",
            ));
        }

        let log_dir_name = config.storage.log_dir_name.trim();
        if log_dir_name.is_empty() || log_dir_name.contains(|c: char| c == '/' || c == '\\') {
            return Err(AppError::new(
                crate::core::types::ErrorCategory::ValidationError,
                "storage.log_dir_name must be a single non-empty path component",
            ));
        }

        if config.execution.shell.trim().is_empty() {
            return Err(AppError::new(
                crate::core::types::ErrorCategory::ValidationError,
                "execution.shell cannot be empty",
            ));
        }

        script_timeout_duration(config.execution.default_script_timeout_minutes).map_err(
            |err| {
                AppError::new(
                    crate::core::types::ErrorCategory::ValidationError,
                    format!(
                        "execution.default_script_timeout_minutes is invalid: {}",
                        err.message
                    ),
                )
            },
        )?;

        Ok(())
    }
}
