//! Command routing
//!
//! A command name `<plugin>.<local>` is split at the first `.`; the
//! plugin's table is looked up by the prefix and the handler by the rest.
//! Every routed command produces exactly one reply, whatever the handler
//! does.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use towercg_core::panic_message;
use tracing::{debug, warn};

use crate::command::{
    normalize_result, Command, CommandHandler, CommandReply, CommandTable, UNRECOGNIZED,
};
use crate::plugin::PluginContext;

struct Routed {
    ctx: PluginContext,
    table: CommandTable,
}

/// Routes commands to the owning plugin's handler
#[derive(Default)]
pub struct CommandRouter {
    plugins: HashMap<String, Routed>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, ctx: PluginContext, table: CommandTable) {
        self.plugins
            .insert(ctx.name().to_string(), Routed { ctx, table });
    }

    /// Look up the handler for a full command name.
    pub fn resolve(&self, name: &str) -> Option<(PluginContext, String, CommandHandler)> {
        let (plugin, local) = name.split_once('.')?;
        let routed = self.plugins.get(plugin)?;
        let handler = routed.table.get(local)?;
        Some((routed.ctx.clone(), local.to_string(), handler))
    }

    /// Run a command to completion and build its reply.
    ///
    /// A handler error or panic becomes `{"error": <message>}`; a
    /// non-object result is normalized.
    pub async fn route(&self, command: Command) -> CommandReply {
        let Some((ctx, local, handler)) = self.resolve(&command.name) else {
            debug!(command = %command.name, "No handler for command");
            return CommandReply::error(command.correlation_id, UNRECOGNIZED);
        };

        debug!(
            command = %command.name,
            correlation_id = %command.correlation_id,
            "Routing command"
        );

        let plugin = ctx.name().to_string();
        let outcome = AssertUnwindSafe(handler(ctx, command.payload))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => CommandReply::ok(
                command.correlation_id,
                normalize_result(&plugin, &local, result),
            ),
            Ok(Err(e)) => {
                warn!(plugin = %plugin, "Command '{}' failed: {:#}", local, e);
                CommandReply::error(command.correlation_id, e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(plugin = %plugin, "Command '{}' panicked: {}", local, message);
                CommandReply::error(command.correlation_id, message)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use towercg_core::{BackgroundFailurePolicy, EventBus, PluginName};
    use towercg_state::{MemoryStorageEngine, StateStore};

    async fn context(name: &str) -> PluginContext {
        let store = StateStore::open(
            Arc::new(MemoryStorageEngine::new()),
            Vec::new(),
            BackgroundFailurePolicy::Log,
        )
        .await
        .unwrap();
        PluginContext::new(
            PluginName::new(name).unwrap(),
            json!({}),
            store,
            EventBus::new(),
            "/tmp",
            "/tmp",
        )
    }

    async fn router() -> CommandRouter {
        let mut echo = CommandTable::new("echo");
        echo.register("say", |_, payload: Value| async move { Ok(Some(payload)) });
        echo.register_sync("nothing", |_, _| Ok(None));
        echo.register_sync("number", |_, _| Ok(Some(json!(42))));
        echo.register_sync("fail", |_, _| Err(anyhow::anyhow!("disk on fire")));
        echo.register("panic", |_, _| async move {
            if true {
                panic!("handler exploded");
            }
            Ok(None)
        });
        echo.register_sync("panic_sync", |_, _| panic!("sync handler exploded"));
        echo.register_sync("whoami", |ctx, _| Ok(Some(json!({"me": ctx.name().as_str()}))));

        let mut router = CommandRouter::new();
        router.add(context("echo").await, echo);
        router.add(context("echoes").await, CommandTable::new("echoes"));
        router
    }

    #[tokio::test]
    async fn test_routes_to_handler_with_payload() {
        let router = router().await;
        let reply = router
            .route(Command::new("echo.say", "1", json!({"words": "hi"})))
            .await;
        assert_eq!(reply, CommandReply::ok("1", json!({"words": "hi"})));

        let reply = router.route(Command::new("echo.whoami", "2", json!({}))).await;
        assert_eq!(reply.payload, json!({"me": "echo"}));
    }

    #[tokio::test]
    async fn test_unrecognized_commands() {
        let router = router().await;
        for name in ["bogus.thing", "echo.missing", "echo", "echoes.say", ".say", "echo."] {
            let reply = router.route(Command::new(name, "x", json!({}))).await;
            assert_eq!(reply, CommandReply::error("x", UNRECOGNIZED), "{}", name);
        }
    }

    #[tokio::test]
    async fn test_results_are_normalized() {
        let router = router().await;
        let reply = router.route(Command::new("echo.nothing", "1", json!({}))).await;
        assert_eq!(reply.payload, json!({}));
        let reply = router.route(Command::new("echo.number", "2", json!({}))).await;
        assert_eq!(reply.payload, json!({"result": 42}));
        let reply = router.route(Command::new("echo.say", "3", Value::Null)).await;
        assert_eq!(reply.payload, json!({"result": null}));
    }

    #[tokio::test]
    async fn test_failures_become_error_replies() {
        let router = router().await;
        let reply = router.route(Command::new("echo.fail", "1", json!({}))).await;
        assert_eq!(reply, CommandReply::error("1", "disk on fire"));

        let reply = router.route(Command::new("echo.panic", "2", json!({}))).await;
        assert_eq!(reply, CommandReply::error("2", "handler exploded"));

        let reply = router.route(Command::new("echo.panic_sync", "3", json!({}))).await;
        assert_eq!(reply, CommandReply::error("3", "sync handler exploded"));
    }
}
