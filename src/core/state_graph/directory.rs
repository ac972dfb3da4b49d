#![allow(clippy::result_large_err)] // Directory lookups return AppError so callers see the failing name.

//! Resolution of collection names to backing files.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const STATES_FILE_NAME: &str = "states.json";

/// How a collection was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionKind {
    Embedded,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionLocation {
    pub name: String,
    pub states_file: PathBuf,
    pub kind: ExtensionKind,
}

impl ExtensionLocation {
    /// Directory holding the backing file; scripts run here.
    pub fn base_dir(&self) -> &Path {
        self.states_file.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Maps a collection name to where its states live.
pub trait ExtensionDirectory: Send + Sync + 'static {
    fn resolve(&self, name: &str) -> Result<ExtensionLocation, AppError>;
}

/// `<root>/<name>/states.json`, with a fixed set of names reported as embedded.
#[derive(Debug, Clone)]
pub struct FileSystemDirectory {
    root: PathBuf,
    embedded: HashSet<String>,
}

impl FileSystemDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            embedded: HashSet::new(),
        }
    }

    pub fn with_embedded<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.embedded.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ExtensionDirectory for FileSystemDirectory {
    fn resolve(&self, name: &str) -> Result<ExtensionLocation, AppError> {
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("invalid collection name '{}'", name),
            )
            .with_code("SG-DIR-001"));
        }
        if trimmed.contains(|c: char| c == '/' || c == '\\') {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("collection name '{}' must not contain path separators", name),
            )
            .with_code("SG-DIR-002"));
        }
        let kind = if self.embedded.contains(trimmed) {
            ExtensionKind::Embedded
        } else {
            ExtensionKind::Custom
        };
        Ok(ExtensionLocation {
            name: trimmed.to_string(),
            states_file: self.root.join(trimmed).join(STATES_FILE_NAME),
            kind,
        })
    }
}
