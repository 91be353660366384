//! Plugin identities and namespaced names
//!
//! Every command and event name has the shape `<namespace>.<local-name>`.
//! The namespace is either a plugin identity or one of the system
//! namespaces (`towercg`, `global`). Matching is on the exact prefix and
//! the first `.` separator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Unique identity of a registered plugin.
///
/// Used both as the plugin's key in the state tree and as the prefix of
/// every command and event name it owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PluginName(String);

impl PluginName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.contains('.') {
            return Err(Error::InvalidPluginName(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build `<self>.<local>`.
    pub fn qualify(&self, local: &str) -> Result<EventName> {
        EventName::namespaced(&self.0, local)
    }

    /// Strip `<self>.` from `name`, returning the local part.
    pub fn strip<'a>(&self, name: &'a str) -> Option<&'a str> {
        name.strip_prefix(self.0.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
    }
}

impl TryFrom<String> for PluginName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PluginName> for String {
    fn from(name: PluginName) -> Self {
        name.0
    }
}

impl FromStr for PluginName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for PluginName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PluginName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A fully qualified `<namespace>.<local-name>` event or command name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventName {
    full: String,
    split: usize,
}

impl EventName {
    /// Parse a fully qualified name. The namespace ends at the first `.`;
    /// both sides must be non-empty.
    pub fn new(full: impl Into<String>) -> Result<Self> {
        let full = full.into();
        match full.find('.') {
            Some(split) if split > 0 && split + 1 < full.len() => Ok(Self { full, split }),
            _ => Err(Error::InvalidEventName(full)),
        }
    }

    pub fn namespaced(namespace: &str, local: &str) -> Result<Self> {
        if namespace.is_empty() || namespace.contains('.') || local.is_empty() {
            return Err(Error::InvalidEventName(format!("{}.{}", namespace, local)));
        }
        Ok(Self {
            full: format!("{}.{}", namespace, local),
            split: namespace.len(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.full[..self.split]
    }

    pub fn local(&self) -> &str {
        &self.full[self.split + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }
}

impl TryFrom<String> for EventName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<EventName> for String {
    fn from(name: EventName) -> Self {
        name.full
    }
}

impl FromStr for EventName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}
