use crate::core::types::{ErrorCategory, ErrorSeverity};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug)]
pub struct AppError {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub code: String,
    pub message: String,
    pub context: HashMap<String, String>,
    pub recovery_suggestions: Vec<String>,
    /// Elementary cycles found by the sorter, each as an ordered chain of state names.
    pub cycles: Vec<Vec<String>>,
    pub occurred_at: DateTime<Utc>,
    pub source: Option<anyhow::Error>,
}

impl AppError {
    pub fn new<T: Into<String>>(category: ErrorCategory, message: T) -> Self {
        let severity = match category {
            ErrorCategory::ConflictError => ErrorSeverity::Warning,
            ErrorCategory::ValidationError
            | ErrorCategory::CycleError
            | ErrorCategory::OrderingError
            | ErrorCategory::NotFoundError
            | ErrorCategory::ExecutionError
            | ErrorCategory::IoError
            | ErrorCategory::SerializationError
            | ErrorCategory::InternalError => ErrorSeverity::Error,
        };
        AppError {
            category,
            severity,
            code: format!("ERR-{}", uuid::Uuid::new_v4()),
            message: message.into(),
            context: HashMap::new(),
            recovery_suggestions: vec![],
            cycles: vec![],
            occurred_at: chrono::Utc::now(),
            source: None,
        }
    }

    pub fn with_source<T: Into<String>>(
        category: ErrorCategory,
        message: T,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        let mut error = AppError::new(category, message);
        error.source = Some(anyhow::anyhow!(source));
        error
    }

    /// Build a cycle error listing every cycle found in the state graph.
    pub fn cycle(cycles: Vec<Vec<String>>) -> Self {
        let rendered = cycles
            .iter()
            .map(|cycle| render_cycle(cycle))
            .collect::<Vec<_>>()
            .join("; ");
        let mut error = AppError::new(
            ErrorCategory::CycleError,
            format!("state graph contains cycles: {}", rendered),
        )
        .with_code("SG-GRAPH-002");
        error.cycles = cycles;
        error
    }

    pub fn conflict<T: Into<String>>(message: T) -> Self {
        AppError::new(ErrorCategory::ConflictError, message)
            .with_code("SG-LOCK-001")
            .with_suggestion("the collection is busy, try again later")
    }

    pub fn with_context<T: Into<String>>(mut self, context: T) -> Self {
        self.context.insert("context".to_string(), context.into());
        self
    }

    pub fn with_code<T: Into<String>>(mut self, code: T) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_suggestion<T: Into<String>>(mut self, suggestion: T) -> Self {
        self.recovery_suggestions.push(suggestion.into());
        self
    }

    pub fn add_context(&mut self, key: &str, value: &str) {
        self.context.insert(key.to_string(), value.to_string());
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    pub fn is(&self, category: ErrorCategory) -> bool {
        self.category == category
    }
}

/// Render one cycle as an arrow-joined chain that closes on its first element.
pub fn render_cycle(cycle: &[String]) -> String {
    let mut chain = cycle.to_vec();
    if let Some(first) = cycle.first() {
        chain.push(first.clone());
    }
    chain.join(" -> ")
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.category, self.message)?;
        if !self.context.is_empty() {
            let mut keys = self.context.keys().collect::<Vec<_>>();
            keys.sort();
            let pairs = keys
                .into_iter()
                .map(|key| format!("{}={}", key, self.context[key]))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, " (Context: {})", pairs)?;
        }
        if let Some(ref source) = self.source {
            write!(f, "\nCaused by: {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        let mut error = AppError::new(ErrorCategory::InternalError, e.to_string())
            .with_code("ANYHOW_ERROR")
            .with_suggestion("Check the error details");
        error.source = Some(e);
        error
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        let mut error = AppError::new(ErrorCategory::IoError, e.to_string())
            .with_code("IO_ERROR")
            .with_suggestion("Check file permissions and paths");
        error.source = Some(anyhow::anyhow!(e));
        error
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        let mut error = AppError::new(ErrorCategory::SerializationError, e.to_string())
            .with_code("SERDE_ERROR");
        error.source = Some(anyhow::anyhow!(e));
        error
    }
}
