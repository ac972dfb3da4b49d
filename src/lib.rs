//! Single-node workflow engine over persisted state graphs.

pub mod core;
pub mod logging;
pub mod utils;

/// Current crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub type Result<T> = std::result::Result<T, anyhow::Error>;
