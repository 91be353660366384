//! Shared state for HTTP handlers

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::gateway::ConnectionGateway;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ConnectionGateway>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(gateway: Arc<ConnectionGateway>) -> Self {
        Self {
            gateway,
            started_at: Utc::now(),
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
