//! towercg-web: the towercg server
//!
//! Integrates:
//! - WebSocket state sync (`/ws`): snapshot on connect, diffs afterwards
//! - Command request/reply over the same socket
//! - Client events republished on the bus
//! - Plugin HTTP routes mounted at `/<plugin>`

pub mod auth;
pub mod broadcast;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod routes;
pub mod server;
pub mod state;
pub mod websocket;

pub use auth::{AllowAll, AuthRequest, Authenticator, Credentials, StaticCredentials};
pub use broadcast::DiffBroadcaster;
pub use connection::{Connection, ConnectionRegistry};
pub use error::{Result, ServerError};
pub use gateway::{ConnectionGateway, InboundOutcome};
pub use protocol::Envelope;
pub use server::{Running, Server};
