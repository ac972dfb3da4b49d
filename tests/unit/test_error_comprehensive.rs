use stepgraph::core::error::{render_cycle, AppError};
use stepgraph::core::types::{ErrorCategory, ErrorSeverity};

#[test]
fn test_error_creation_all_categories() {
    let categories = vec![
        ErrorCategory::ValidationError,
        ErrorCategory::CycleError,
        ErrorCategory::OrderingError,
        ErrorCategory::ConflictError,
        ErrorCategory::NotFoundError,
        ErrorCategory::ExecutionError,
        ErrorCategory::IoError,
        ErrorCategory::SerializationError,
        ErrorCategory::InternalError,
    ];

    for category in categories {
        let error = AppError::new(category, "test message");
        assert_eq!(error.category, category);
        assert_eq!(error.message, "test message");
        assert!(error.context.is_empty());
        assert!(error.cycles.is_empty());
        assert!(error.occurred_at <= chrono::Utc::now());
        assert!(error.source.is_none());
    }
}

#[test]
fn test_error_severity_mapping() {
    let test_cases = vec![
        (ErrorCategory::ValidationError, ErrorSeverity::Error),
        (ErrorCategory::CycleError, ErrorSeverity::Error),
        (ErrorCategory::ConflictError, ErrorSeverity::Warning),
        (ErrorCategory::ExecutionError, ErrorSeverity::Error),
        (ErrorCategory::IoError, ErrorSeverity::Error),
    ];

    for (category, expected_severity) in test_cases {
        let error = AppError::new(category, "test");
        assert_eq!(error.severity(), expected_severity);
    }
}

#[test]
fn test_error_add_context() {
    let mut error = AppError::new(ErrorCategory::OrderingError, "bad order");

    error.add_context("state", "deploy");
    error.add_context("target", "build");

    assert_eq!(error.context.get("state"), Some(&"deploy".to_string()));
    assert_eq!(error.context.get("target"), Some(&"build".to_string()));
    assert_eq!(error.context.len(), 2);
}

#[test]
fn test_error_display() {
    let mut error =
        AppError::new(ErrorCategory::ValidationError, "invalid input").with_code("SG-TEST-001");
    error.add_context("field", "script");

    let display = format!("{}", error);
    assert!(display.starts_with("[SG-TEST-001] ValidationError: invalid input"));
    assert!(display.contains("field=script"));
}

#[test]
fn test_cycle_error_renders_chains() {
    let error = AppError::cycle(vec![vec![
        "a".to_string(),
        "b".to_string(),
        "c".to_string(),
    ]]);
    assert_eq!(error.category, ErrorCategory::CycleError);
    assert_eq!(error.code, "SG-GRAPH-002");
    assert!(error.to_string().contains("a -> b -> c -> a"));
    assert_eq!(render_cycle(&["solo".to_string()]), "solo -> solo");
}

#[test]
fn test_conflict_carries_suggestion() {
    let error = AppError::conflict("collection 'ci' is running, try later");
    assert!(error.is(ErrorCategory::ConflictError));
    assert!(!error.recovery_suggestions.is_empty());
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let error: AppError = io.into();
    assert_eq!(error.category, ErrorCategory::IoError);
    assert_eq!(error.code, "IO_ERROR");
    assert!(error.source.is_some());
}

#[test]
fn test_serde_error_conversion() {
    let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: AppError = parse.into();
    assert_eq!(error.category, ErrorCategory::SerializationError);
}
