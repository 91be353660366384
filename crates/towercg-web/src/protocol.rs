//! Wire protocol
//!
//! Every frame in either direction is a JSON envelope
//! `{"name": .., "payload": .., "correlationId"?: ..}`. The name decides
//! what the frame is: a snapshot, a diff, a command, a reply, or an
//! ordinary bus event.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use towercg_plugins::{Command, CommandReply};
use towercg_state::{StateTree, TreeDiff};

/// Full state tree, always the first frame an authenticated client gets
pub const STATE: &str = "towercg.state";
/// Structural diff from the previous tree
pub const STATE_CHANGED: &str = "towercg.stateChanged";
/// Client-to-server command
pub const CLIENT_COMMAND: &str = "towercg-client.command";
/// Replies are named `reply.<correlationId>`
pub const REPLY_PREFIX: &str = "reply.";

pub const NOT_AUTHENTICATED: &str = "Not authenticated.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(
        rename = "correlationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<String>,
}

impl Envelope {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            correlation_id: None,
        }
    }

    pub fn snapshot(tree: &StateTree) -> Self {
        Self::new(STATE, tree.to_value())
    }

    pub fn diff(diff: &TreeDiff) -> serde_json::Result<Self> {
        Ok(Self::new(STATE_CHANGED, serde_json::to_value(diff)?))
    }

    pub fn reply(reply: CommandReply) -> Self {
        Self {
            name: format!("{}{}", REPLY_PREFIX, reply.correlation_id),
            payload: reply.payload,
            correlation_id: Some(reply.correlation_id),
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// What an inbound frame asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Command(Command),
    Event { name: String, payload: Value },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Malformed command: {0}")]
    MalformedCommand(#[source] serde_json::Error),
}

/// Sort an inbound text frame into a command or an event.
pub fn parse_inbound(text: &str) -> Result<Inbound, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
    if envelope.name == CLIENT_COMMAND {
        let command =
            serde_json::from_value(envelope.payload).map_err(ProtocolError::MalformedCommand)?;
        return Ok(Inbound::Command(command));
    }
    Ok(Inbound::Event {
        name: envelope.name,
        payload: envelope.payload,
    })
}

/// Names that never travel the generic event path, in either direction.
/// Diffs and snapshots have their own delivery, commands and replies are
/// point to point.
pub fn is_internal(name: &str) -> bool {
    matches!(name, STATE | STATE_CHANGED | CLIENT_COMMAND) || name.starts_with(REPLY_PREFIX)
}
