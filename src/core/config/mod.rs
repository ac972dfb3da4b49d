pub mod loader;
pub mod validation;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use loader::ConfigLoader;
pub use validation::ConfigValidator;

/// Engine configuration loaded from stepgraph.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Where collections are stored
    #[serde(default)]
    pub storage: StorageConfig,

    /// How states are executed
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one `<name>/states.json` per collection
    #[serde(default = "default_states_root")]
    pub states_root: PathBuf,

    /// Collections shipped with the host rather than installed by users
    #[serde(default)]
    pub embedded: Vec<String>,

    /// Directory name, next to each backing file, that holds per-state logs
    #[serde(default = "default_log_dir_name")]
    pub log_dir_name: String,
}

/// Execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Replace every script with a placeholder that succeeds immediately
    #[serde(default)]
    pub mock_execution: bool,

    /// Shell used to interpret state scripts
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Timeout applied to states whose own script_timeout is zero (0 disables)
    #[serde(default)]
    pub default_script_timeout_minutes: f64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            states_root: default_states_root(),
            embedded: Vec::new(),
            log_dir_name: default_log_dir_name(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mock_execution: false,
            shell: default_shell(),
            default_script_timeout_minutes: 0.0,
        }
    }
}

fn default_states_root() -> PathBuf {
    PathBuf::from(".stepgraph/collections")
}

fn default_log_dir_name() -> String {
    "logs".to_string()
}

fn default_shell() -> String {
    "sh".to_string()
}
