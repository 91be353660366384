//! Error types for towercg

use thiserror::Error;

/// Errors that keep the server from reaching steady state.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Duplicate plugin registration: {0}")]
    DuplicatePlugin(String),

    #[error("Invalid plugin name '{0}': must be non-empty and contain no '.'")]
    InvalidPluginName(String),

    #[error("Invalid event name '{0}': expected '<namespace>.<name>'")]
    InvalidEventName(String),

    #[error("Plugin '{plugin}' failed to initialize: {source}")]
    PluginInitialization {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Wrap a plugin initialization failure
    pub fn plugin_initialization(plugin: impl Into<String>, source: anyhow::Error) -> Self {
        Error::PluginInitialization {
            plugin: plugin.into(),
            source,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
