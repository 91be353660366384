//! Live connection registry
//!
//! Each connection owns an unbounded outbound queue drained by its
//! transport task, so pushing to one slow client never blocks a dispatch
//! or another client. Removing a connection drops its sender; anything
//! sent to it afterwards is discarded.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// A connection as seen by the code that serves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub id: Uuid,
    pub authenticated: bool,
}

struct Entry {
    authenticated: bool,
    /// Version of the snapshot this connection was sent; diffs for this
    /// version or older are already reflected in it.
    baseline: u64,
    connected_at: DateTime<Utc>,
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<Uuid, Entry>>,
}

/// Write access held while a new connection takes its snapshot
pub struct Registration<'a> {
    guard: RwLockWriteGuard<'a, HashMap<Uuid, Entry>>,
}

impl Registration<'_> {
    pub fn insert(
        mut self,
        connection: Connection,
        baseline: u64,
        tx: mpsc::UnboundedSender<String>,
    ) {
        self.guard.insert(
            connection.id,
            Entry {
                authenticated: connection.authenticated,
                baseline,
                connected_at: Utc::now(),
                tx,
            },
        );
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the registry for one insertion. Broadcasts wait until the
    /// returned guard is consumed or dropped.
    pub fn begin_registration(&self) -> Registration<'_> {
        Registration {
            guard: self.entries.write().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Queue a frame for one connection. Returns false if it is gone.
    pub fn send_to(&self, id: Uuid, frame: String) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        match entries.get(&id) {
            Some(entry) => entry.tx.send(frame).is_ok(),
            None => {
                trace!(connection = %id, "Dropping frame for closed connection");
                false
            }
        }
    }

    /// Queue a frame for every authenticated connection. With `version`,
    /// connections whose snapshot already covers it are skipped.
    pub fn broadcast(&self, version: Option<u64>, frame: &str) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut sent = 0;
        for entry in entries.values() {
            if !entry.authenticated {
                continue;
            }
            if matches!(version, Some(v) if entry.baseline >= v) {
                continue;
            }
            if entry.tx.send(frame.to_string()).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    pub fn remove(&self, id: Uuid) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        match removed {
            Some(entry) => {
                let secs = (Utc::now() - entry.connected_at).num_seconds();
                debug!(connection = %id, "Connection removed after {}s", secs);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
