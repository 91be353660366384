//! Actions: the only way to change the state tree

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request to recompute the state tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Action {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// An action without a payload.
    pub fn of(kind: impl Into<String>) -> Self {
        Self::new(kind, Value::Null)
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}
