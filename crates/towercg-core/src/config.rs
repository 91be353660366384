//! Server Configuration
//!
//! Resolution order, later wins:
//!
//! 1. Built-in defaults
//! 2. Optional TOML file
//! 3. `TOWERCG_*` environment variables
//!
//! Call `load_environment()` early in main() so variables from an env file
//! are visible to step 3:
//!
//! ```rust,no_run
//! use towercg_core::config::{load_environment, ServerConfig};
//!
//! load_environment();
//! let config = ServerConfig::load(None, ".").unwrap();
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::background::BackgroundFailurePolicy;
use crate::error::Result;

/// Env files checked in order when `TOWERCG_ENV_FILE` is not set
pub const ENV_FILE_PATHS: &[&str] = &[".env"];

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 14400;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory the storage and cache defaults are resolved against
    pub app_root: PathBuf,
    pub http: HttpConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
    /// Terminate the process when a background task fails
    pub exit_on_background_failure: bool,
    /// Push every non-internal bus event to authenticated clients
    pub rebroadcast_events: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub storage: Option<PathBuf>,
    pub cache: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub level: String,
    /// Log every event that crosses the bus
    pub log_all_events: bool,
    /// Log every inbound transport message
    pub log_packets: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            app_root: PathBuf::from("."),
            http: HttpConfig::default(),
            paths: PathsConfig::default(),
            logging: LoggingConfig::default(),
            exit_on_background_failure: false,
            rebroadcast_events: false,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,towercg=debug".to_string(),
            log_all_events: false,
            log_packets: false,
        }
    }
}

impl ServerConfig {
    /// Defaults rooted at `app_root`.
    pub fn new(app_root: impl Into<PathBuf>) -> Self {
        Self {
            app_root: app_root.into(),
            ..Default::default()
        }
    }

    /// Resolve configuration from an optional TOML file plus environment.
    pub fn load(file: Option<&Path>, app_root: impl Into<PathBuf>) -> Result<Self> {
        let mut config = match file {
            Some(path) => {
                let text = fs::read_to_string(path)?;
                let mut parsed: ServerConfig = toml::from_str(&text)?;
                info!("Loaded configuration from {}", path.display());
                if parsed.app_root == Path::new(".") {
                    parsed.app_root = app_root.into();
                }
                parsed
            }
            None => Self::new(app_root),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `TOWERCG_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        if let Some(host) = get_config_opt("TOWERCG_HOST") {
            self.http.host = host;
        }
        if let Some(port) = get_config_opt("TOWERCG_PORT") {
            match port.parse() {
                Ok(port) => self.http.port = port,
                Err(_) => warn!("Ignoring invalid TOWERCG_PORT: {}", port),
            }
        }
        if let Some(dir) = get_config_opt("TOWERCG_STORAGE_DIR") {
            self.paths.storage = Some(PathBuf::from(dir));
        }
        if let Some(dir) = get_config_opt("TOWERCG_CACHE_DIR") {
            self.paths.cache = Some(PathBuf::from(dir));
        }
        if let Some(level) = get_config_opt("TOWERCG_LOG_LEVEL") {
            self.logging.level = level;
        }
        self.logging.log_all_events =
            get_config_bool("TOWERCG_LOG_ALL_EVENTS", self.logging.log_all_events);
        self.logging.log_packets = get_config_bool("TOWERCG_LOG_PACKETS", self.logging.log_packets);
        self.exit_on_background_failure = get_config_bool(
            "TOWERCG_EXIT_ON_BACKGROUND_FAILURE",
            self.exit_on_background_failure,
        );
        self.rebroadcast_events =
            get_config_bool("TOWERCG_REBROADCAST_EVENTS", self.rebroadcast_events);
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.paths
            .storage
            .clone()
            .unwrap_or_else(|| self.app_root.join("storage"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.paths
            .cache
            .clone()
            .unwrap_or_else(|| self.app_root.join("cache"))
    }

    /// Location of the persisted state tree.
    pub fn state_file(&self) -> PathBuf {
        self.storage_dir().join("state.json")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }

    pub fn background_policy(&self) -> BackgroundFailurePolicy {
        if self.exit_on_background_failure {
            BackgroundFailurePolicy::Exit
        } else {
            BackgroundFailurePolicy::Log
        }
    }

    /// Create the storage and cache directories.
    pub fn ensure_paths(&self) -> Result<()> {
        for dir in [self.storage_dir(), self.cache_dir()] {
            fs::create_dir_all(&dir)?;
            debug!("Ensured directory {}", dir.display());
        }
        Ok(())
    }
}

/// Load variables from `TOWERCG_ENV_FILE` or `.env` without overriding
/// anything already set. Returns the path that was loaded.
pub fn load_environment() -> Option<String> {
    if let Ok(custom_path) = std::env::var("TOWERCG_ENV_FILE") {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    for path in ENV_FILE_PATHS {
        if let Some(loaded_path) = try_load_env_file(path) {
            return Some(loaded_path);
        }
    }

    debug!("No environment file found, using existing environment");
    None
}

fn try_load_env_file(path: &str) -> Option<String> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read environment file {}: {}", path, e);
            return None;
        }
    };

    let mut loaded = 0;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = parse_env_line(line) {
            if std::env::var(&key).is_err() {
                std::env::set_var(&key, &value);
                loaded += 1;
            }
        }
    }

    info!("Loaded {} environment variables from {}", loaded, path);
    Some(path.to_string())
}

/// Parse `KEY=VALUE`, `KEY="VALUE"` or `KEY='VALUE'`.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let value = value.trim();

    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

/// Get an optional configuration value.
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get a boolean configuration value.
pub fn get_config_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}
