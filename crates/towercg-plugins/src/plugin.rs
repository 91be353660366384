//! Core plugin trait and context

use async_trait::async_trait;
use axum::Router;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use towercg_core::{EventBus, EventPattern, PluginName, Subscription};
use towercg_state::{Action, Dispatch, StateStore};
use tracing::trace;

use crate::command::CommandTable;

/// Handle given to a plugin for everything it may do to the server:
/// dispatch actions, read its own sub-state, emit and listen to events
/// in its namespace.
#[derive(Clone)]
pub struct PluginContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    name: PluginName,
    config: Value,
    store: StateStore,
    bus: EventBus,
    storage_dir: PathBuf,
    cache_dir: PathBuf,
}

impl PluginContext {
    pub fn new(
        name: PluginName,
        config: Value,
        store: StateStore,
        bus: EventBus,
        storage_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                name,
                config,
                store,
                bus,
                storage_dir: storage_dir.into(),
                cache_dir: cache_dir.into(),
            }),
        }
    }

    pub fn name(&self) -> &PluginName {
        &self.inner.name
    }

    /// Registration config merged over the plugin's defaults
    pub fn config(&self) -> &Value {
        &self.inner.config
    }

    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.inner.config.get(key)
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn dispatch(&self, action: Action) -> Dispatch {
        self.inner.store.dispatch(action)
    }

    /// Dispatch, and return this plugin's sub-state as that action left it.
    pub fn dispatch_with_state(&self, action: Action) -> (Dispatch, Arc<Value>) {
        let (outcome, tree) = self.inner.store.dispatch_with_state(action);
        let state = tree
            .get(self.inner.name.as_str())
            .cloned()
            .unwrap_or_else(|| Arc::new(Value::Null));
        (outcome, state)
    }

    /// This plugin's current sub-state.
    pub fn state(&self) -> Arc<Value> {
        self.inner
            .store
            .get(self.inner.name.as_str())
            .unwrap_or_else(|| Arc::new(Value::Null))
    }

    /// Publish `<plugin>.<local>`.
    pub fn emit(&self, local: &str, payload: Value) -> towercg_core::Result<usize> {
        let name = self.inner.name.qualify(local)?;
        trace!(plugin = %self.inner.name, event = %name, "Emitting event through plugin interface");
        Ok(self.inner.bus.publish(name, payload))
    }

    /// Listen to `<plugin>.<local>`.
    pub fn on<F>(&self, local: &str, listener: F) -> towercg_core::Result<Subscription>
    where
        F: Fn(&towercg_core::Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let name = self.inner.name.qualify(local)?;
        trace!(plugin = %self.inner.name, event = %name, "Listening through plugin interface");
        Ok(self.inner.bus.subscribe(EventPattern::Exact(name), listener))
    }

    pub fn storage_path(&self, child: impl AsRef<Path>) -> PathBuf {
        self.inner.storage_dir.join(child)
    }

    pub fn cache_path(&self, child: impl AsRef<Path>) -> PathBuf {
        self.inner.cache_dir.join(child)
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Core plugin trait that all plugins must implement
///
/// Only `name` is required. The reducer owns the plugin's sub-state under
/// `name` in the state tree; commands and events are namespaced
/// `<name>.<local>`.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique identity. Must be non-empty and contain no `.`
    fn name(&self) -> &str;

    /// Configuration the registration config is merged over
    fn default_config(&self) -> Value {
        Value::Object(Map::new())
    }

    /// Sub-state used on first run
    fn default_state(&self) -> Value {
        Value::Object(Map::new())
    }

    /// New sub-state for `action`, `None` if the action is not handled
    fn reduce(&self, _state: &Value, _action: &Action) -> Option<Value> {
        None
    }

    /// Fill the command table. Called once, at construction.
    fn register_commands(&self, _commands: &mut CommandTable, _ctx: &PluginContext) {}

    /// Called after every plugin is constructed, one plugin at a time
    async fn initialize(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Routes mounted under `/<name>`
    fn routes(&self, _ctx: &PluginContext) -> Option<Router> {
        None
    }
}

/// Deep-merge `overrides` over `defaults`. Objects merge key by key;
/// anything else in `overrides` replaces the default.
pub fn merge_config(defaults: Value, overrides: Value) -> Value {
    match (defaults, overrides) {
        (Value::Object(mut base), Value::Object(over)) => {
            for (key, value) in over {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_config(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (defaults, Value::Null) => defaults,
        (_, overrides) => overrides,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use towercg_core::BackgroundFailurePolicy;
    use towercg_state::{MemoryStorageEngine, StateStore};

    #[test]
    fn test_merge_config_override_wins() {
        let merged = merge_config(
            json!({"step": 1, "display": {"color": "red", "size": 10}}),
            json!({"display": {"color": "blue"}, "extra": true}),
        );
        assert_eq!(
            merged,
            json!({"step": 1, "display": {"color": "blue", "size": 10}, "extra": true})
        );
        assert_eq!(merge_config(json!({"a": 1}), Value::Null), json!({"a": 1}));
        assert_eq!(merge_config(json!({"a": 1}), json!(5)), json!(5));
    }

    #[tokio::test]
    async fn test_context_namespaces_events() {
        let store = StateStore::open(
            Arc::new(MemoryStorageEngine::new()),
            Vec::new(),
            BackgroundFailurePolicy::Log,
        )
        .await
        .unwrap();
        let bus = EventBus::new();
        let ctx = PluginContext::new(
            PluginName::new("lights").unwrap(),
            json!({}),
            store,
            bus.clone(),
            "/tmp/storage",
            "/tmp/cache",
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = ctx
            .on("toggled", move |event| {
                s.lock().unwrap().push(event.name.to_string());
                Ok(())
            })
            .unwrap();

        assert_eq!(ctx.emit("toggled", json!(true)).unwrap(), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["lights.toggled"]);
        assert!(ctx.emit("", json!(null)).is_err());
        assert_eq!(ctx.storage_path("db"), PathBuf::from("/tmp/storage/db"));
        assert_eq!(ctx.cache_path("img"), PathBuf::from("/tmp/cache/img"));
        // Not registered with the store
        assert_eq!(*ctx.state(), Value::Null);
    }
}
