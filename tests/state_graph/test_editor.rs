use std::fs;
use std::path::Path;
use stepgraph::core::config::EngineConfig;
use stepgraph::core::state_graph::{InsertRequest, State, StateEngine};
use stepgraph::core::types::ErrorCategory;
use tempfile::tempdir;

fn engine(root: &Path) -> StateEngine {
    let mut config = EngineConfig::default();
    config.storage.states_root = root.to_path_buf();
    StateEngine::new(config)
}

fn chain(names: &[&str]) -> Vec<State> {
    names
        .iter()
        .map(|name| State::new(*name, format!("./{}.sh", name)))
        .collect()
}

fn names(states: &[State]) -> Vec<String> {
    states.iter().map(|s| s.name.clone()).collect()
}

#[tokio::test]
async fn test_insert_by_position_matches_insert_by_name() {
    let temp = tempdir().unwrap();
    let engine = engine(temp.path());
    engine.set_states("by-position", chain(&["a", "b", "c"]), true).await.unwrap();
    engine.set_states("by-name", chain(&["a", "b", "c"]), true).await.unwrap();

    let by_position = engine
        .insert_state("by-position", InsertRequest::at(State::new("x", "true"), 2))
        .await
        .unwrap();
    let by_name = engine
        .insert_state("by-name", InsertRequest::relative_to(State::new("x", "true"), "b"))
        .await
        .unwrap();

    assert_eq!(names(&by_position.states), vec!["a", "b", "x", "c"]);
    assert_eq!(names(&by_position.states), names(&by_name.states));
    assert_eq!(
        by_position.states.iter().map(|s| s.next_states.clone()).collect::<Vec<_>>(),
        by_name.states.iter().map(|s| s.next_states.clone()).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_insert_before_first_state() {
    let temp = tempdir().unwrap();
    let engine = engine(temp.path());
    engine.set_states("ci", chain(&["a", "b"]), true).await.unwrap();

    let document = engine
        .insert_state("ci", InsertRequest::at(State::new("setup", "true"), 1).before())
        .await
        .unwrap();
    assert_eq!(names(&document.states), vec!["setup", "a", "b"]);
}

#[tokio::test]
async fn test_reference_name_overrides_position() {
    let temp = tempdir().unwrap();
    let engine = engine(temp.path());
    engine.set_states("ci", chain(&["a", "b", "c"]), true).await.unwrap();

    let mut request = InsertRequest::relative_to(State::new("x", "true"), "a");
    request.reference_position = 3;
    let document = engine.insert_state("ci", request).await.unwrap();
    assert_eq!(names(&document.states), vec!["a", "x", "b", "c"]);
}

#[tokio::test]
async fn test_insert_existing_without_overwrite_fails() {
    let temp = tempdir().unwrap();
    let engine = engine(temp.path());
    engine.set_states("ci", chain(&["a", "b"]), true).await.unwrap();

    let err = engine
        .insert_state("ci", InsertRequest::at(State::new("a", "true"), 2))
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::ValidationError);
    assert!(err.message.contains("already exists"));
}

#[tokio::test]
async fn test_unknown_reference_is_a_validation_error() {
    let temp = tempdir().unwrap();
    let engine = engine(temp.path());
    engine.set_states("ci", chain(&["a"]), true).await.unwrap();

    let err = engine
        .insert_state("ci", InsertRequest::relative_to(State::new("x", "true"), "nope"))
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::ValidationError);

    let err = engine
        .insert_state("ci", InsertRequest::at(State::new("x", "true"), 7))
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::ValidationError);
}

#[tokio::test]
async fn test_cyclic_insert_is_not_persisted() {
    let temp = tempdir().unwrap();
    let engine = engine(temp.path());
    engine.set_states("ci", chain(&["a", "b"]), true).await.unwrap();
    let file = temp.path().join("ci").join("states.json");
    let before = fs::read_to_string(&file).unwrap();

    let mut looping = State::new("x", "true");
    looping.previous_states = vec!["b".to_string()];
    looping.next_states = vec!["a".to_string()];
    let err = engine
        .insert_state("ci", InsertRequest::at(looping, 2))
        .await
        .unwrap_err();

    assert_eq!(err.category, ErrorCategory::CycleError);
    assert_eq!(fs::read_to_string(&file).unwrap(), before);
}

#[tokio::test]
async fn test_explicit_edges_are_wired() {
    let temp = tempdir().unwrap();
    let engine = engine(temp.path());
    engine.set_states("ci", chain(&["a", "b", "c"]), true).await.unwrap();

    let mut side = State::new("side", "true");
    side.previous_states = vec!["a".to_string()];
    side.next_states = vec!["c".to_string()];
    let document = engine
        .insert_state("ci", InsertRequest::at(side, 1))
        .await
        .unwrap();

    let a = document.state("a").unwrap();
    assert_eq!(a.next_states, vec!["side".to_string(), "b".to_string()]);
    let c = document.state("c").unwrap();
    assert_eq!(c.previous_states.len(), 2);
}

#[tokio::test]
async fn test_protected_state_cannot_be_deleted() {
    let temp = tempdir().unwrap();
    let engine = engine(temp.path());
    let mut states = chain(&["a", "b", "c"]);
    states[1].protected = true;
    let original = engine.set_states("ci", states, true).await.unwrap();

    let err = engine.delete_state("ci", None, Some("b")).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::ValidationError);
    assert_eq!(engine.get_states("ci").await.unwrap(), original);

    let err = engine.delete_state("ci", Some(2), None).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::ValidationError);
}

#[tokio::test]
async fn test_delete_by_position_bridges_neighbours() {
    let temp = tempdir().unwrap();
    let engine = engine(temp.path());
    let mut states = chain(&["a", "b", "c"]);
    states[2].prerequisite_states = vec!["b".to_string()];
    engine.set_states("ci", states, true).await.unwrap();

    let document = engine.delete_state("ci", Some(2), None).await.unwrap();
    assert_eq!(names(&document.states), vec!["a", "c"]);
    assert_eq!(document.states[0].next_states, vec!["c".to_string()]);
    assert!(document.states[1].prerequisite_states.is_empty());
}

#[tokio::test]
async fn test_overwrite_updates_definition_in_place() {
    let temp = tempdir().unwrap();
    let engine = engine(temp.path());
    engine.set_states("ci", chain(&["a", "b", "c"]), true).await.unwrap();

    let mut updated = State::new("b", "./b-v2.sh");
    updated.label = "Second".to_string();
    let document = engine
        .insert_state("ci", InsertRequest::relative_to(updated, "b").overwrite())
        .await
        .unwrap();

    assert_eq!(names(&document.states), vec!["a", "b", "c"]);
    let b = document.state("b").unwrap();
    assert_eq!(b.script, "./b-v2.sh");
    assert_eq!(b.label, "Second");
}
