use std::fs;
use std::path::Path;
use stepgraph::core::config::EngineConfig;
use stepgraph::core::state_graph::merge::{merge_states, MergeMode};
use stepgraph::core::state_graph::{State, StateEngine, StateStatus};
use stepgraph::core::types::ErrorCategory;
use tempfile::tempdir;

fn engine(root: &Path) -> StateEngine {
    let mut config = EngineConfig::default();
    config.storage.states_root = root.to_path_buf();
    StateEngine::new(config)
}

fn state(name: &str, next: &[&str]) -> State {
    let mut state = State::new(name, format!("./{}.sh", name));
    state.next_states = next.iter().map(|n| n.to_string()).collect();
    state
}

fn summary(states: &[State]) -> Vec<(String, StateStatus)> {
    states.iter().map(|s| (s.name.clone(), s.status)).collect()
}

#[tokio::test]
async fn test_merge_keeps_runtime_of_known_states() {
    let temp = tempdir().unwrap();
    let engine = engine(temp.path());

    let mut a = state("A", &["B"]);
    a.status = StateStatus::Succeeded;
    a.reason = "done earlier".to_string();
    engine
        .set_states("ci", vec![a, state("B", &[])], true)
        .await
        .unwrap();

    let merged = engine
        .set_states(
            "ci",
            vec![state("A", &["B"]), state("B", &["C"]), state("C", &[])],
            false,
        )
        .await
        .unwrap();

    assert_eq!(
        summary(&merged.states),
        vec![
            ("A".to_string(), StateStatus::Succeeded),
            ("B".to_string(), StateStatus::Ready),
            ("C".to_string(), StateStatus::Ready),
        ]
    );
    assert_eq!(merged.states[0].reason, "done earlier");
    assert_eq!(engine.get_states("ci").await.unwrap(), merged);
}

#[tokio::test]
async fn test_deleted_marker_removes_state() {
    let temp = tempdir().unwrap();
    let engine = engine(temp.path());
    engine
        .set_states("ci", vec![state("A", &["B"]), state("B", &[])], true)
        .await
        .unwrap();

    let mut gone = state("B", &[]);
    gone.deleted = true;
    let merged = engine
        .set_states("ci", vec![state("A", &[]), gone], false)
        .await
        .unwrap();

    assert_eq!(summary(&merged.states), vec![("A".to_string(), StateStatus::Ready)]);
    assert!(merged.states[0].next_states.is_empty());
}

#[tokio::test]
async fn test_merge_carries_states_missing_from_incoming() {
    let temp = tempdir().unwrap();
    let engine = engine(temp.path());
    engine
        .set_states("ci", vec![state("A", &["B"]), state("B", &[])], true)
        .await
        .unwrap();

    let merged = engine
        .set_states("ci", vec![state("A", &[])], false)
        .await
        .unwrap();

    let names = merged.states.iter().map(|s| s.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["A", "B"]);
}

#[tokio::test]
async fn test_overwrite_replaces_everything() {
    let temp = tempdir().unwrap();
    let engine = engine(temp.path());
    engine
        .set_states("ci", vec![state("A", &["B"]), state("B", &[])], true)
        .await
        .unwrap();

    let replaced = engine
        .set_states("ci", vec![state("X", &[])], true)
        .await
        .unwrap();
    assert_eq!(replaced.states.len(), 1);
    assert_eq!(replaced.states[0].name, "X");
}

#[tokio::test]
async fn test_cyclic_merge_leaves_file_untouched() {
    let temp = tempdir().unwrap();
    let engine = engine(temp.path());
    engine
        .set_states("ci", vec![state("A", &["B"]), state("B", &[])], true)
        .await
        .unwrap();
    let file = temp.path().join("ci").join("states.json");
    let before = fs::read_to_string(&file).unwrap();

    let err = engine
        .set_states("ci", vec![state("A", &["B"]), state("B", &["A"])], false)
        .await
        .unwrap_err();

    assert_eq!(err.category, ErrorCategory::CycleError);
    assert_eq!(fs::read_to_string(&file).unwrap(), before);
}

#[tokio::test]
async fn test_running_collection_refuses_merge() {
    let temp = tempdir().unwrap();
    let engine = engine(temp.path());
    let dir = temp.path().join("ci");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("states.json"),
        r#"{"states": [{"name": "A", "script": "true"}], "status": "RUNNING"}"#,
    )
    .unwrap();

    let err = engine
        .set_states("ci", vec![state("B", &[])], true)
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::ConflictError);
}

#[test]
fn test_merge_rejects_duplicate_incoming_names() {
    let err = merge_states(
        &[state("A", &[])],
        vec![state("B", &[]), state("B", &[])],
        MergeMode::Merge,
    )
    .unwrap_err();
    assert_eq!(err.category, ErrorCategory::ValidationError);
}
