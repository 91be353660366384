//! Commands: client requests that expect exactly one reply

use futures::future::BoxFuture;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use crate::plugin::PluginContext;

/// Error text for a command no plugin handles
pub const UNRECOGNIZED: &str = "Unrecognized command.";

/// A namespaced request from one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// `<plugin>.<local-name>`
    pub name: String,
    #[serde(
        rename = "correlationId",
        alias = "id",
        deserialize_with = "string_or_number"
    )]
    pub correlation_id: String,
    #[serde(default, alias = "data")]
    pub payload: Value,
}

impl Command {
    pub fn new(name: impl Into<String>, correlation_id: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            correlation_id: correlation_id.into(),
            payload,
        }
    }
}

/// The one reply to a `Command`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReply {
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    pub payload: Value,
}

impl CommandReply {
    pub fn ok(correlation_id: impl Into<String>, payload: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload,
        }
    }

    pub fn error(correlation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload: json!({ "error": message.into() }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.payload.get("error").is_some()
    }
}

pub type CommandFuture = BoxFuture<'static, anyhow::Result<Option<Value>>>;

/// A command implementation. `Ok(None)` means the handler produced no
/// result at all.
pub type CommandHandler = Arc<dyn Fn(PluginContext, Value) -> CommandFuture + Send + Sync>;

/// One plugin's commands, keyed by local name.
#[derive(Clone)]
pub struct CommandTable {
    plugin: String,
    handlers: HashMap<String, CommandHandler>,
}

impl CommandTable {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            handlers: HashMap::new(),
        }
    }

    /// Register an async handler under `name`. Registering the same name
    /// twice replaces the first handler.
    pub fn register<F, Fut>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(PluginContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
    {
        let handler: CommandHandler = Arc::new(move |ctx, payload| Box::pin(handler(ctx, payload)));
        self.insert(name, handler)
    }

    /// Register a handler that completes without awaiting anything.
    pub fn register_sync<F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(&PluginContext, Value) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let handler: CommandHandler = Arc::new(move |ctx, payload| {
            let handler = Arc::clone(&handler);
            Box::pin(async move { handler(&ctx, payload) })
        });
        self.insert(name, handler)
    }

    pub fn get(&self, name: &str) -> Option<CommandHandler> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn insert(&mut self, name: &str, handler: CommandHandler) -> &mut Self {
        if self.handlers.insert(name.to_string(), handler).is_some() {
            warn!(plugin = %self.plugin, "Re-defining command '{}'.", name);
        }
        self
    }
}

/// Coerce a handler result into an object.
///
/// No result becomes `{}`; a non-object becomes `{"result": value}`. Both
/// are contract violations and are logged, never surfaced to the caller.
pub fn normalize_result(plugin: &str, command: &str, result: Option<Value>) -> Value {
    match result {
        Some(Value::Object(map)) => Value::Object(map),
        Some(other) => {
            warn!(
                plugin,
                "Command '{}' returned a non-object. Wrapping with key 'result'.", command
            );
            json!({ "result": other })
        }
        None => {
            warn!(plugin, "Command '{}' returned nothing. Returning {{}} instead.", command);
            Value::Object(Map::new())
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "correlationId must be a string or number, got {}",
            other
        ))),
    }
}
