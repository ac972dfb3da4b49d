use serial_test::serial;
use std::env;
use std::fs;
use std::path::PathBuf;
use stepgraph::core::config::{ConfigLoader, ConfigValidator, EngineConfig};
use stepgraph::core::types::ErrorCategory;
use tempfile::TempDir;

fn clear_stepgraph_env() {
    for v in &[
        "STEPGRAPH_STATES_ROOT",
        "STEPGRAPH_MOCK_EXECUTION",
        "STEPGRAPH_SHELL",
        "STEPGRAPH_DEFAULT_SCRIPT_TIMEOUT_MINUTES",
    ] {
        env::remove_var(v);
    }
}

#[test]
#[serial]
fn test_missing_file_yields_defaults() {
    clear_stepgraph_env();
    let temp_dir = TempDir::new().unwrap();

    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();

    assert_eq!(
        config.storage.states_root,
        temp_dir.path().join(".stepgraph/collections")
    );
    assert_eq!(config.storage.log_dir_name, "logs");
    assert_eq!(config.execution.shell, "sh");
    assert!(!config.execution.mock_execution);
    assert_eq!(config.execution.default_script_timeout_minutes, 0.0);
}

#[test]
#[serial]
fn test_file_values_are_loaded() {
    clear_stepgraph_env();
    let temp_dir = TempDir::new().unwrap();
    let config_content = r#"
[storage]
states_root = "/var/lib/stepgraph"
embedded = ["core", "setup"]
log_dir_name = "output"

[execution]
mock_execution = true
shell = "bash"
default_script_timeout_minutes = 2.5
"#;
    fs::write(temp_dir.path().join("stepgraph.toml"), config_content).unwrap();

    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();

    assert_eq!(config.storage.states_root, PathBuf::from("/var/lib/stepgraph"));
    assert_eq!(config.storage.embedded, vec!["core", "setup"]);
    assert_eq!(config.storage.log_dir_name, "output");
    assert!(config.execution.mock_execution);
    assert_eq!(config.execution.shell, "bash");
    assert_eq!(config.execution.default_script_timeout_minutes, 2.5);
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_stepgraph_env();
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("stepgraph.toml"),
        "[execution]\nshell = \"bash\"\n",
    )
    .unwrap();

    env::set_var("STEPGRAPH_SHELL", "zsh");
    env::set_var("STEPGRAPH_MOCK_EXECUTION", "true");
    env::set_var("STEPGRAPH_STATES_ROOT", "custom/root");
    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();
    clear_stepgraph_env();

    assert_eq!(config.execution.shell, "zsh");
    assert!(config.execution.mock_execution);
    assert_eq!(config.storage.states_root, temp_dir.path().join("custom/root"));
}

#[test]
#[serial]
fn test_invalid_toml_is_rejected() {
    clear_stepgraph_env();
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("stepgraph.toml"), "[execution\nshell=").unwrap();

    let err = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap_err();
    assert_eq!(err.category, ErrorCategory::ValidationError);
}

#[test]
#[serial]
fn test_negative_timeout_is_rejected() {
    clear_stepgraph_env();
    let temp_dir = TempDir::new().unwrap();
    env::set_var("STEPGRAPH_DEFAULT_SCRIPT_TIMEOUT_MINUTES", "-1");
    let result = ConfigLoader::load_from_workspace(temp_dir.path());
    clear_stepgraph_env();

    assert!(result.is_err());
}

#[test]
fn test_validator_rejects_empty_shell() {
    let mut config = EngineConfig::default();
    config.execution.shell = "  ".to_string();
    assert!(ConfigValidator::validate(&config).is_err());
}

#[test]
fn test_env_documentation_lists_every_variable() {
    let docs = ConfigLoader::env_var_documentation();
    assert_eq!(docs.len(), 4);
    assert!(docs.iter().any(|line| line.starts_with("STEPGRAPH_SHELL")));
}
