use chrono::{TimeZone, Utc};
use serde_json::json;
use stepgraph::core::state_graph::{CollectionDocument, Phase, State, StateStatus};
use stepgraph::utils::{format_timestamp, parse_timestamp};

#[test]
fn test_timestamp_text_format() {
    let timestamp = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
    assert_eq!(format_timestamp(&timestamp), "2024-03-09T14:05:07.000Z");
    assert_eq!(
        parse_timestamp("2024-03-09T14:05:07.000Z").unwrap(),
        Some(timestamp)
    );
    assert_eq!(parse_timestamp("").unwrap(), None);
    assert!(parse_timestamp("yesterday").is_err());
}

#[test]
fn test_document_reads_backing_file_fields() {
    let raw = json!({
        "states": [{
            "name": "build",
            "phase": "AtEachRun",
            "label": "Build",
            "log_path": "",
            "status": "SUCCEEDED",
            "start_time": "2024-01-02T03:04:05.678Z",
            "end_time": "",
            "reason": "",
            "script": "./build.sh",
            "script_timeout": 0.5,
            "protected": true,
            "deleted": false,
            "prerequisite_states": [],
            "states_to_rerun": ["test"],
            "rerun_on_run_of_states": [],
            "previous_states": [],
            "next_states": ["test"],
            "executed_by_extension_name": "ci",
            "execution_id": "abc",
            "next_run": false,
            "is_extension": false
        }],
        "extension_name": "ci",
        "parent_extension_name": "",
        "executed_by_extension_name": "ci",
        "execution_id": "abc",
        "start_time": "",
        "end_time": "",
        "status": "READY"
    });

    let document: CollectionDocument = serde_json::from_value(raw).unwrap();
    let state = &document.states[0];
    assert_eq!(state.phase, Phase::AtEachRun);
    assert_eq!(state.status, StateStatus::Succeeded);
    assert!(state.start_time.is_some());
    assert!(state.end_time.is_none());
    assert_eq!(state.script_timeout, 0.5);
    assert!(state.protected);
    assert_eq!(document.extension_name, "ci");
    assert!(document.start_time.is_none());
}

#[test]
fn test_unset_timestamps_are_written_as_empty_strings() {
    let document = CollectionDocument {
        states: vec![State::new("a", "true")],
        ..CollectionDocument::new("ci")
    };
    let value = serde_json::to_value(&document).unwrap();
    assert_eq!(value["start_time"], json!(""));
    assert_eq!(value["states"][0]["end_time"], json!(""));
    assert_eq!(value["states"][0]["phase"], json!("normal"));
    assert_eq!(value["status"], json!("READY"));
}

#[test]
fn test_missing_fields_take_defaults() {
    let document: CollectionDocument =
        serde_json::from_value(json!({"states": [{"name": "only", "script": "true"}]})).unwrap();
    let state = &document.states[0];
    assert_eq!(state.status, StateStatus::Ready);
    assert_eq!(state.phase, Phase::Normal);
    assert!(state.next_states.is_empty());
    assert!(document.extension_name.is_empty());
}
