//! towercg-plugins: Plugin system with namespaced state, events and commands
//!
//! Features:
//! - `Plugin` capability trait: identity, defaults, reducer, command table,
//!   initialization, optional HTTP routes
//! - `PluginSet`: ordered registration with duplicate detection
//! - `PluginHost`: construction in registration order, sequential init
//! - `CommandRouter`: `<plugin>.<command>` routing with one reply per command

pub mod builtin;
pub mod command;
pub mod host;
pub mod plugin;
pub mod registration;
pub mod router;

pub use command::{Command, CommandHandler, CommandReply, CommandTable};
pub use host::PluginHost;
pub use plugin::{merge_config, Plugin, PluginContext};
pub use registration::{PluginRegistration, PluginSet};
pub use router::CommandRouter;

/// Event published once every plugin has finished initializing
pub const ALL_PLUGINS_INITIALIZED: &str = "global.allPluginsInitialized";

/// Local name of the per-plugin state change event
pub const STATE_CHANGED: &str = "stateChanged";

/// Prelude for convenient imports
pub mod prelude {
    pub use super::command::{Command, CommandReply, CommandTable};
    pub use super::host::PluginHost;
    pub use super::plugin::{Plugin, PluginContext};
    pub use super::registration::PluginSet;
    pub use super::router::CommandRouter;
    pub use towercg_state::prelude::*;
}
