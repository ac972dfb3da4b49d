#![allow(clippy::result_large_err)] // Store returns AppError so persistence failures keep their path context.

//! Backing-file persistence and per-collection locking.

use crate::core::error::AppError;
use crate::core::state_graph::directory::{ExtensionDirectory, ExtensionLocation};
use crate::core::state_graph::state::CollectionDocument;
use crate::core::types::ErrorCategory;
use dashmap::DashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct CollectionStore {
    directory: Arc<dyn ExtensionDirectory>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CollectionStore {
    pub fn new(directory: Arc<dyn ExtensionDirectory>) -> Self {
        Self {
            directory,
            locks: DashMap::new(),
        }
    }

    pub fn location(&self, name: &str) -> Result<ExtensionLocation, AppError> {
        self.directory.resolve(name)
    }

    /// The mutex guarding read-modify-write cycles of one collection.
    pub fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read the current document; a missing file yields an empty collection.
    pub fn load(&self, name: &str) -> Result<CollectionDocument, AppError> {
        let location = self.location(name)?;
        let mut document = read_document(&location.states_file)?
            .unwrap_or_else(|| CollectionDocument::new(&location.name));
        if document.extension_name.is_empty() {
            document.extension_name = location.name.clone();
        }
        Ok(document)
    }

    pub fn save(&self, name: &str, document: &CollectionDocument) -> Result<(), AppError> {
        let location = self.location(name)?;
        write_document(&location.states_file, document)
    }

    /// Lock, re-read, apply `mutate` to a copy and persist it when `mutate`
    /// succeeds. On error the file is left untouched.
    pub async fn update<T, F>(&self, name: &str, mutate: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut CollectionDocument) -> Result<T, AppError>,
    {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        let mut document = self.load(name)?;
        let value = mutate(&mut document)?;
        self.save(name, &document)?;
        Ok(value)
    }

    /// Lock and read without writing back.
    pub async fn read(&self, name: &str) -> Result<CollectionDocument, AppError> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        self.load(name)
    }
}

pub fn read_document(path: &Path) -> Result<Option<CollectionDocument>, AppError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(AppError::new(
                ErrorCategory::IoError,
                format!("failed to read {}: {}", path.display(), err),
            )
            .with_code("SG-STORE-001"))
        }
    };
    if content.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&content).map(Some).map_err(|err| {
        AppError::new(
            ErrorCategory::SerializationError,
            format!("failed to parse {}: {}", path.display(), err),
        )
        .with_code("SG-STORE-002")
    })
}

/// Write through a temp file in the same directory and rename it into place.
pub fn write_document(path: &Path, document: &CollectionDocument) -> Result<(), AppError> {
    let content = serde_json::to_vec_pretty(document).map_err(|err| {
        AppError::new(
            ErrorCategory::SerializationError,
            format!("failed to serialize {}: {}", path.display(), err),
        )
        .with_code("SG-STORE-003")
    })?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to create directory {}: {}", parent.display(), err),
        )
        .with_code("SG-STORE-004")
    })?;

    let mut staged = tempfile::NamedTempFile::new_in(parent).map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to stage {}: {}", path.display(), err),
        )
        .with_code("SG-STORE-004")
    })?;
    staged
        .write_all(&content)
        .and_then(|_| staged.flush())
        .map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to write {}: {}", path.display(), err),
            )
            .with_code("SG-STORE-004")
        })?;
    staged.persist(path).map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to rename into {}: {}", path.display(), err.error),
        )
        .with_code("SG-STORE-005")
    })?;
    Ok(())
}
