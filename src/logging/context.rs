use std::env;

/// Execution contexts that influence how logging is routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionContext {
    /// An embedding process driven from a terminal.
    LocalDev,
    /// Long-running host process whose console is not watched.
    Service,
}

impl ExecutionContext {
    /// Returns `true` when console sinks should be disabled by default.
    pub fn disables_console(self) -> bool {
        matches!(self, ExecutionContext::Service)
    }
}

/// Derive the active execution context from the environment.
pub fn detect_context() -> ExecutionContext {
    if service_mode_enabled() {
        ExecutionContext::Service
    } else {
        ExecutionContext::LocalDev
    }
}

fn service_mode_enabled() -> bool {
    env::var("STEPGRAPH_SERVICE_MODE")
        .map(|value| matches!(value.trim(), "1" | "true"))
        .unwrap_or(false)
}
