//! Connection gateway
//!
//! Transport-independent side of a client connection. The websocket layer
//! calls `connect` once, feeds every text frame to `handle_inbound`, drains
//! the returned receiver into the socket, and calls `disconnect` when the
//! socket closes.
//!
//! Per connection: `Connected -> Authenticated -> steady state ->
//! Disconnected`. Unauthenticated connections stay registered so command
//! replies can reach them, but receive no state and may not emit events.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use towercg_core::{EventBus, EventName, EventPattern, Subscription};
use towercg_plugins::{Command, CommandReply, CommandRouter};
use towercg_state::StateStore;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::auth::{AuthRequest, Authenticator, Credentials};
use crate::connection::{Connection, ConnectionRegistry};
use crate::protocol::{self, Envelope, Inbound, NOT_AUTHENTICATED};

/// What `handle_inbound` did with a frame
#[derive(Debug)]
pub enum InboundOutcome {
    /// Routed on a separate task; the reply is sent when it finishes
    Command(JoinHandle<()>),
    /// Answered immediately without running a handler
    Rejected,
    /// Published on the bus to this many subscribers
    Published(usize),
    /// Ignored
    Dropped,
}

pub struct ConnectionGateway {
    store: StateStore,
    bus: EventBus,
    router: Arc<CommandRouter>,
    registry: Arc<ConnectionRegistry>,
    authenticator: Arc<dyn Authenticator>,
    log_packets: bool,
    _rebroadcast: Option<Subscription>,
}

impl ConnectionGateway {
    pub fn new(
        store: StateStore,
        bus: EventBus,
        router: Arc<CommandRouter>,
        registry: Arc<ConnectionRegistry>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            store,
            bus,
            router,
            registry,
            authenticator,
            log_packets: false,
            _rebroadcast: None,
        }
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.log_packets = enabled;
        self
    }

    /// Push every bus event not in the internal set to authenticated
    /// connections.
    pub fn with_rebroadcast(mut self) -> Self {
        let registry = Arc::clone(&self.registry);
        let subscription = self.bus.subscribe(EventPattern::All, move |event| {
            if protocol::is_internal(event.name.as_str()) {
                return Ok(());
            }
            let frame = Envelope::new(event.name.as_str(), event.payload.clone()).encode()?;
            registry.broadcast(None, &frame);
            Ok(())
        });
        self._rebroadcast = Some(subscription);
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Authenticate and register a new connection.
    ///
    /// An authenticated connection finds its snapshot already queued on
    /// the returned receiver, ahead of any diff.
    pub async fn connect(
        &self,
        credentials: Credentials,
    ) -> (Connection, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let request = AuthRequest {
            connection_id: id,
            credentials,
        };
        let authenticated = self.authenticator.authenticate(&request).await;
        let connection = Connection { id, authenticated };
        let (tx, rx) = mpsc::unbounded_channel();

        let registration = self.registry.begin_registration();
        if authenticated {
            let (version, tree) = self.store.snapshot();
            match Envelope::snapshot(&tree).encode() {
                Ok(frame) => {
                    let _ = tx.send(frame);
                }
                Err(e) => warn!(connection = %id, "Failed to encode snapshot: {}", e),
            }
            registration.insert(connection, version, tx);
            info!(connection = %id, version, "Client connected");
        } else {
            registration.insert(connection, u64::MAX, tx);
            info!(connection = %id, "Client connected without authentication");
        }

        (connection, rx)
    }

    pub fn handle_inbound(&self, connection: &Connection, text: &str) -> InboundOutcome {
        if self.log_packets {
            trace!(connection = %connection.id, "<< {}", text);
        }

        match protocol::parse_inbound(text) {
            Ok(Inbound::Command(command)) => self.handle_command(connection, command),
            Ok(Inbound::Event { name, payload }) => self.handle_event(connection, name, payload),
            Err(e) => {
                warn!(connection = %connection.id, "Ignoring frame: {}", e);
                InboundOutcome::Dropped
            }
        }
    }

    /// Unregister the connection. Replies still in flight are discarded.
    pub fn disconnect(&self, connection: &Connection) {
        if self.registry.remove(connection.id) {
            info!(connection = %connection.id, "Client disconnected");
        }
    }

    fn handle_command(&self, connection: &Connection, command: Command) -> InboundOutcome {
        if !connection.authenticated {
            let reply = CommandReply::error(command.correlation_id, NOT_AUTHENTICATED);
            send_reply(&self.registry, connection.id, reply);
            return InboundOutcome::Rejected;
        }

        let router = Arc::clone(&self.router);
        let registry = Arc::clone(&self.registry);
        let id = connection.id;
        InboundOutcome::Command(tokio::spawn(async move {
            let reply = router.route(command).await;
            send_reply(&registry, id, reply);
        }))
    }

    fn handle_event(&self, connection: &Connection, name: String, payload: Value) -> InboundOutcome {
        if !connection.authenticated {
            trace!(connection = %connection.id, event = %name, "Dropping event from unauthenticated client");
            return InboundOutcome::Dropped;
        }
        if protocol::is_internal(&name) {
            warn!(connection = %connection.id, event = %name, "Clients may not emit internal events");
            return InboundOutcome::Dropped;
        }
        match EventName::new(name) {
            Ok(name) => InboundOutcome::Published(self.bus.publish(name, payload)),
            Err(e) => {
                warn!(connection = %connection.id, "Ignoring client event: {}", e);
                InboundOutcome::Dropped
            }
        }
    }
}

fn send_reply(registry: &ConnectionRegistry, id: Uuid, reply: CommandReply) {
    let correlation_id = reply.correlation_id.clone();
    match Envelope::reply(reply).encode() {
        Ok(frame) => {
            if !registry.send_to(id, frame) {
                debug!(
                    connection = %id,
                    correlation_id = %correlation_id,
                    "Connection closed before reply, discarding"
                );
            }
        }
        Err(e) => warn!(connection = %id, "Failed to encode reply: {}", e),
    }
}
