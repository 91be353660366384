use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Malformed state file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("Duplicate reducer namespace: {0}")]
    DuplicateNamespace(String),
    #[error("Cannot apply diff: {0}")]
    DiffApply(String),
}

pub type Result<T> = std::result::Result<T, StateStoreError>;
