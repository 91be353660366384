//! Plugin host: construction and initialization lifecycle
//!
//! Plugins are constructed in registration order. Each gets its merged
//! config, a context and a command table. Initialization runs afterwards,
//! one plugin at a time; `global.allPluginsInitialized` is published once
//! the last one has finished.

use axum::Router;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use towercg_core::{Error, EventBus, EventName, PluginName, Result, ServerConfig, SYSTEM_NAMESPACE};
use towercg_state::{StateStore, StoreSubscription};
use tracing::{debug, info};

use crate::command::CommandTable;
use crate::plugin::{merge_config, PluginContext};
use crate::registration::{PluginRegistration, PluginSet};
use crate::router::CommandRouter;
use crate::{ALL_PLUGINS_INITIALIZED, STATE_CHANGED};

struct Hosted {
    registration: PluginRegistration,
    ctx: PluginContext,
}

pub struct PluginHost {
    plugins: Vec<Hosted>,
    router: Arc<CommandRouter>,
    bus: EventBus,
    _state_events: StoreSubscription,
}

impl PluginHost {
    /// Construct every plugin against an already opened store.
    ///
    /// The store must have been opened with `plugins.reducers()`.
    pub fn construct(
        plugins: PluginSet,
        store: &StateStore,
        bus: &EventBus,
        config: &ServerConfig,
    ) -> Result<Self> {
        let storage_dir = config.storage_dir();
        let cache_dir = config.cache_dir();

        let mut hosted = Vec::with_capacity(plugins.len());
        let mut router = CommandRouter::new();
        let mut state_events = HashMap::new();

        for registration in plugins {
            let name = registration.name.clone();
            let merged = merge_config(
                registration.plugin.default_config(),
                registration.config.clone(),
            );
            debug!(plugin = %name, config = %merged, "Constructing plugin");

            let ctx = PluginContext::new(
                name.clone(),
                merged,
                store.clone(),
                bus.clone(),
                storage_dir.join(name.as_str()),
                cache_dir.join(name.as_str()),
            );

            let mut table = CommandTable::new(name.as_str());
            registration.plugin.register_commands(&mut table, &ctx);
            debug!(plugin = %name, commands = ?table.names(), "Registered commands");

            router.add(ctx.clone(), table);
            state_events.insert(name.to_string(), name.qualify(STATE_CHANGED)?);
            hosted.push(Hosted { registration, ctx });
        }

        let state_events = publish_state_changes(store, bus, state_events)?;

        info!("Constructed {} plugins", hosted.len());
        Ok(Self {
            plugins: hosted,
            router: Arc::new(router),
            bus: bus.clone(),
            _state_events: state_events,
        })
    }

    /// Initialize plugins sequentially in registration order. The first
    /// failure aborts startup.
    pub async fn initialize_all(&self) -> Result<()> {
        for hosted in &self.plugins {
            let name = &hosted.registration.name;
            debug!(plugin = %name, "Initializing plugin");
            hosted
                .registration
                .plugin
                .initialize(&hosted.ctx)
                .await
                .map_err(|e| Error::plugin_initialization(name.as_str(), e))?;
            info!(plugin = %name, "Plugin initialized");
        }

        let all = EventName::new(ALL_PLUGINS_INITIALIZED)?;
        self.bus.publish(all, json!({}));
        Ok(())
    }

    pub fn command_router(&self) -> Arc<CommandRouter> {
        Arc::clone(&self.router)
    }

    /// HTTP routers contributed by plugins, with the plugin each belongs to
    pub fn routes(&self) -> Vec<(PluginName, Router)> {
        self.plugins
            .iter()
            .filter_map(|h| {
                h.registration
                    .plugin
                    .routes(&h.ctx)
                    .map(|router| (h.registration.name.clone(), router))
            })
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(|h| h.registration.name.as_str())
    }

    pub fn context(&self, name: &str) -> Option<&PluginContext> {
        self.plugins
            .iter()
            .find(|h| h.registration.name.as_str() == name)
            .map(|h| &h.ctx)
    }
}

// Every transition is published as `towercg.stateChanged`, and as
// `<plugin>.stateChanged` for each plugin whose sub-state was replaced.
fn publish_state_changes(
    store: &StateStore,
    bus: &EventBus,
    per_plugin: HashMap<String, EventName>,
) -> Result<StoreSubscription> {
    let system = EventName::namespaced(SYSTEM_NAMESPACE, STATE_CHANGED)?;
    let bus = bus.clone();

    Ok(store.subscribe(move |transition| {
        bus.publish(
            system.clone(),
            json!({
                "oldState": &*transition.old,
                "newState": &*transition.new,
            }),
        );

        for namespace in transition.changed() {
            let Some(event) = per_plugin.get(namespace) else {
                continue;
            };
            bus.publish(
                event.clone(),
                json!({
                    "oldState": transition.old.get(namespace).map(|v| &**v),
                    "newState": transition.new.get(namespace).map(|v| &**v),
                }),
            );
        }
        Ok(())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Plugin;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use towercg_core::{BackgroundFailurePolicy, EventPattern};
    use towercg_state::{Action, MemoryStorageEngine};

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn default_config(&self) -> Value {
            json!({"volume": 1, "muted": false})
        }

        fn default_state(&self) -> Value {
            json!({"hits": 0})
        }

        fn reduce(&self, state: &Value, action: &Action) -> Option<Value> {
            let kind = format!("{}/hit", self.name);
            action.is(&kind).then(|| {
                json!({"hits": state["hits"].as_i64().unwrap_or(0) + 1})
            })
        }

        fn register_commands(&self, commands: &mut CommandTable, _ctx: &PluginContext) {
            self.log.lock().unwrap().push(format!("construct:{}", self.name));
            commands.register_sync("hit", |ctx, _| {
                ctx.dispatch(Action::of(format!("{}/hit", ctx.name())));
                Ok(Some(json!({})))
            });
        }

        async fn initialize(&self, ctx: &PluginContext) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("init:{}", self.name));
            if self.fail {
                anyhow::bail!("no hardware found");
            }
            assert_eq!(ctx.config()["volume"], json!(5));
            assert_eq!(ctx.config()["muted"], json!(false));
            Ok(())
        }
    }

    async fn host(
        log: Arc<Mutex<Vec<String>>>,
        fail_second: bool,
    ) -> (PluginHost, StateStore, EventBus, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::new(dir.path());
        let mut set = PluginSet::new();
        for (name, fail) in [("alpha", false), ("beta", fail_second)] {
            set.register(
                Recorder {
                    name,
                    log: log.clone(),
                    fail,
                },
                json!({"volume": 5}),
            )
            .unwrap();
        }

        let store = StateStore::open(
            Arc::new(MemoryStorageEngine::new()),
            set.reducers(),
            BackgroundFailurePolicy::Log,
        )
        .await
        .unwrap();
        let bus = EventBus::new();
        let host = PluginHost::construct(set, &store, &bus, &config).unwrap();
        (host, store, bus, dir)
    }

    #[tokio::test]
    async fn test_lifecycle_order_and_all_initialized_event() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (host, _store, bus, _dir) = host(log.clone(), false).await;

        let l = log.clone();
        let _sub = bus.subscribe(EventPattern::parse(ALL_PLUGINS_INITIALIZED).unwrap(), move |_| {
            l.lock().unwrap().push("all".into());
            Ok(())
        });

        host.initialize_all().await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["construct:alpha", "construct:beta", "init:alpha", "init:beta", "all"]
        );
        assert_eq!(host.names().collect::<Vec<_>>(), vec!["alpha", "beta"]);
        assert!(host.routes().is_empty());
    }

    #[tokio::test]
    async fn test_initialization_failure_is_fatal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (host, _store, bus, _dir) = host(log.clone(), true).await;

        let fired = Arc::new(Mutex::new(false));
        let f = fired.clone();
        let _sub = bus.subscribe(EventPattern::parse("global.*").unwrap(), move |_| {
            *f.lock().unwrap() = true;
            Ok(())
        });

        let err = host.initialize_all().await.unwrap_err();
        assert!(matches!(err, Error::PluginInitialization { ref plugin, .. } if plugin == "beta"));
        assert!(!*fired.lock().unwrap());
    }

    #[tokio::test]
    async fn test_state_changed_events() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (host, _store, bus, _dir) = host(log, false).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = bus.subscribe(EventPattern::All, move |event| {
            s.lock().unwrap().push((event.name.to_string(), event.payload.clone()));
            Ok(())
        });

        let reply = host
            .command_router()
            .route(crate::Command::new("beta.hit", "1", json!({})))
            .await;
        assert_eq!(reply.payload, json!({}));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "towercg.stateChanged");
        assert_eq!(seen[0].1["newState"]["beta"], json!({"hits": 1}));
        assert_eq!(seen[0].1["oldState"]["beta"], json!({"hits": 0}));
        assert_eq!(seen[1].0, "beta.stateChanged");
        assert_eq!(
            seen[1].1,
            json!({"oldState": {"hits": 0}, "newState": {"hits": 1}})
        );
    }

    #[tokio::test]
    async fn test_context_paths_are_per_plugin() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (host, _store, _bus, dir) = host(log, false).await;
        let ctx = host.context("alpha").unwrap();
        assert!(ctx.storage_path("x.db").starts_with(dir.path()));
        assert!(ctx.storage_path("x.db").ends_with("alpha/x.db"));
        assert!(host.context("gamma").is_none());
    }
}
