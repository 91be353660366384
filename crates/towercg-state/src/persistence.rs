//! Persistence engines
//!
//! The whole tree is one JSON object keyed by plugin name. Saves are
//! written to a temporary sibling and renamed into place, so a reader
//! never sees a torn file; overlapping saves resolve as last-rename-wins.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::error::{Result, StateStoreError};
use crate::tree::StateTree;

#[async_trait]
pub trait PersistenceEngine: Send + Sync {
    /// Read the saved tree. `None` means nothing was saved yet.
    async fn load(&self) -> Result<Option<Map<String, Value>>>;

    /// Replace the saved tree.
    async fn save(&self, tree: &StateTree) -> Result<()>;
}

/// Stores the tree as a single JSON file.
#[derive(Debug, Clone)]
pub struct FileStorageEngine {
    path: PathBuf,
}

impl FileStorageEngine {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StateStoreError {
        StateStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl PersistenceEngine for FileStorageEngine {
    async fn load(&self) -> Result<Option<Map<String, Value>>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let value: Value =
            serde_json::from_slice(&bytes).map_err(|e| StateStoreError::Malformed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        match value {
            Value::Object(map) => Ok(Some(map)),
            other => Err(StateStoreError::Malformed {
                path: self.path.clone(),
                reason: format!("expected a JSON object, found {}", type_name(&other)),
            }),
        }
    }

    async fn save(&self, tree: &StateTree) -> Result<()> {
        let json = serde_json::to_vec(tree)?;
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state.json".to_string());
        let tmp = self
            .path
            .with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| self.io_error(e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.io_error(e));
        }

        debug!(bytes = json.len(), "Saved state to {}", self.path.display());
        Ok(())
    }
}

/// Keeps the last saved tree in memory.
#[derive(Debug, Default)]
pub struct MemoryStorageEngine {
    saved: Mutex<Option<Map<String, Value>>>,
    saves: Mutex<usize>,
}

impl MemoryStorageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a previously saved tree.
    pub fn with_saved(saved: Map<String, Value>) -> Self {
        Self {
            saved: Mutex::new(Some(saved)),
            saves: Mutex::new(0),
        }
    }

    pub fn saved(&self) -> Option<Map<String, Value>> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PersistenceEngine for MemoryStorageEngine {
    async fn load(&self) -> Result<Option<Map<String, Value>>> {
        Ok(self.saved())
    }

    async fn save(&self, tree: &StateTree) -> Result<()> {
        *self.saved.lock().unwrap_or_else(|e| e.into_inner()) = Some(tree.to_map());
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let engine = FileStorageEngine::new(dir.path().join("state.json"));
        assert!(engine.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let engine = FileStorageEngine::new(dir.path().join("state.json"));

        let tree: StateTree = [
            ("counter".to_string(), json!({"value": 3})),
            ("scenes".to_string(), json!({"active": "intro", "list": ["intro", "main"]})),
        ]
        .into_iter()
        .collect();
        engine.save(&tree).await.unwrap();

        let fresh = FileStorageEngine::new(dir.path().join("state.json"));
        let loaded = fresh.load().await.unwrap().unwrap();
        assert_eq!(Value::Object(loaded), tree.to_value());

        // No temporary files left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        std::fs::write(&path, "{not json").unwrap();
        let err = FileStorageEngine::new(&path).load().await.unwrap_err();
        assert!(matches!(err, StateStoreError::Malformed { .. }));

        std::fs::write(&path, "[1, 2, 3]").unwrap();
        let err = FileStorageEngine::new(&path).load().await.unwrap_err();
        assert!(matches!(err, StateStoreError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_memory_engine_counts_saves() {
        let engine = MemoryStorageEngine::new();
        assert!(engine.load().await.unwrap().is_none());

        let tree: StateTree = [("a".to_string(), json!(1))].into_iter().collect();
        engine.save(&tree).await.unwrap();
        engine.save(&tree).await.unwrap();

        assert_eq!(engine.save_count(), 2);
        assert_eq!(engine.load().await.unwrap().unwrap()["a"], json!(1));
    }
}
