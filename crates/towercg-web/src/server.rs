//! Server assembly
//!
//! ```text
//! Server::new(config)
//!     .register(plugin, config)?   // duplicates rejected here
//!     .start().await?              // load state, construct, initialize
//!     .run(shutdown).await?        // bind and serve
//! ```
//!
//! Nothing listens for connections until every plugin has initialized.

use axum::Router;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use towercg_core::{EventBus, ServerConfig};
use towercg_plugins::{Plugin, PluginHost, PluginSet};
use towercg_state::{FileStorageEngine, PersistenceEngine, StateStore};
use tracing::info;

use crate::auth::{AllowAll, Authenticator};
use crate::broadcast::DiffBroadcaster;
use crate::connection::ConnectionRegistry;
use crate::error::{Result, ServerError};
use crate::gateway::ConnectionGateway;
use crate::routes::create_router;
use crate::state::AppState;

pub struct Server {
    config: ServerConfig,
    plugins: PluginSet,
    authenticator: Arc<dyn Authenticator>,
    engine: Option<Arc<dyn PersistenceEngine>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            plugins: PluginSet::new(),
            authenticator: Arc::new(AllowAll),
            engine: None,
        }
    }

    /// Register a plugin with its configuration overrides.
    pub fn register<P: Plugin + 'static>(mut self, plugin: P, config: Value) -> Result<Self> {
        self.plugins.register(plugin, config)?;
        Ok(self)
    }

    pub fn with_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    /// Persist somewhere other than the configured state file.
    pub fn with_persistence(mut self, engine: Arc<dyn PersistenceEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Load state, construct and initialize every plugin.
    pub async fn start(self) -> Result<Running> {
        let config = self.config;
        config.ensure_paths()?;

        let bus = if config.logging.log_all_events {
            EventBus::with_event_logging()
        } else {
            EventBus::new()
        };

        let engine = match self.engine {
            Some(engine) => engine,
            None => {
                let path = config.state_file();
                info!("Persisting state to {}", path.display());
                Arc::new(FileStorageEngine::new(path))
            }
        };
        let store =
            StateStore::open(engine, self.plugins.reducers(), config.background_policy()).await?;

        let host = PluginHost::construct(self.plugins, &store, &bus, &config)?;

        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = DiffBroadcaster::attach(&store, Arc::clone(&registry));

        let mut gateway = ConnectionGateway::new(
            store.clone(),
            bus.clone(),
            host.command_router(),
            registry,
            self.authenticator,
        )
        .with_packet_logging(config.logging.log_packets);
        if config.rebroadcast_events {
            gateway = gateway.with_rebroadcast();
        }
        let gateway = Arc::new(gateway);

        host.initialize_all().await?;

        let state = AppState::new(Arc::clone(&gateway));
        let app = create_router(state.clone(), host.routes());

        Ok(Running {
            config,
            store,
            bus,
            gateway,
            state,
            app,
            _host: host,
            _broadcaster: broadcaster,
        })
    }
}

/// A fully initialized server, ready to accept connections
pub struct Running {
    config: ServerConfig,
    store: StateStore,
    bus: EventBus,
    gateway: Arc<ConnectionGateway>,
    state: AppState,
    app: Router,
    _host: PluginHost,
    _broadcaster: DiffBroadcaster,
}

impl Running {
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn gateway(&self) -> &Arc<ConnectionGateway> {
        &self.gateway
    }

    pub fn router(&self) -> Router {
        self.app.clone()
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            info!("Listening on http://{} (websocket at /ws)", addr);
        }

        axum::serve(listener, self.app.clone())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServerError::Serve)?;

        info!("Server shutdown complete after {}s", self.state.uptime_secs());
        Ok(())
    }
}
