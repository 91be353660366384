//! Core types and utilities for towercg
//!
//! # Modules
//!
//! - `background`: Policy for failures in fire-and-forget tasks
//! - `bus`: Namespaced in-process event bus
//! - `config`: Server configuration and environment loading
//! - `error`: Error types and Result alias
//! - `names`: Plugin identities and namespaced event names
//! - `panic`: Containment for panics in plugin callbacks

pub mod background;
pub mod bus;
pub mod config;
pub mod error;
pub mod names;
pub mod panic;

// Re-exports
pub use background::BackgroundFailurePolicy;
pub use bus::{Event, EventBus, EventPattern, Listener, Subscription};
pub use config::ServerConfig;
pub use error::{Error, Result};
pub use names::{EventName, PluginName};
pub use panic::{call_guarded, panic_message};

/// Namespace reserved for events raised by the server itself.
pub const SYSTEM_NAMESPACE: &str = "towercg";

/// Namespace for events that concern every plugin at once.
pub const GLOBAL_NAMESPACE: &str = "global";
