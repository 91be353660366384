//! Server errors

use thiserror::Error;
use towercg_state::StateStoreError;

/// Everything that keeps the server from starting or serving.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Startup(#[from] towercg_core::Error),

    #[error("State store error: {0}")]
    State(#[from] StateStoreError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
