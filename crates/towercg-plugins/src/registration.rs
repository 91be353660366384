//! Ordered plugin registration

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use towercg_core::{Error, PluginName, Result};
use towercg_state::{Action, Reducer};
use tracing::debug;

use crate::plugin::Plugin;

/// One registered plugin with its (unmerged) registration config
#[derive(Clone)]
pub struct PluginRegistration {
    pub name: PluginName,
    pub plugin: Arc<dyn Plugin>,
    pub config: Value,
}

/// The set of plugins a server starts with, in registration order.
///
/// Identity collisions and malformed names are rejected here, before any
/// plugin is constructed.
#[derive(Clone, Default)]
pub struct PluginSet {
    entries: Vec<PluginRegistration>,
    names: HashSet<String>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: Plugin + 'static>(&mut self, plugin: P, config: Value) -> Result<&mut Self> {
        self.register_arc(Arc::new(plugin), config)
    }

    pub fn register_arc(&mut self, plugin: Arc<dyn Plugin>, config: Value) -> Result<&mut Self> {
        let name = PluginName::new(plugin.name())?;
        if !self.names.insert(name.to_string()) {
            return Err(Error::DuplicatePlugin(name.to_string()));
        }
        debug!(plugin = %name, "Registered plugin");
        self.entries.push(PluginRegistration {
            name,
            plugin,
            config,
        });
        Ok(self)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginRegistration> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One reducer per plugin, keyed by plugin name, for `StateStore::open`.
    pub fn reducers(&self) -> Vec<Arc<dyn Reducer>> {
        self.entries
            .iter()
            .map(|e| {
                Arc::new(PluginReducer {
                    name: e.name.clone(),
                    plugin: Arc::clone(&e.plugin),
                }) as Arc<dyn Reducer>
            })
            .collect()
    }
}

impl IntoIterator for PluginSet {
    type Item = PluginRegistration;
    type IntoIter = std::vec::IntoIter<PluginRegistration>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

struct PluginReducer {
    name: PluginName,
    plugin: Arc<dyn Plugin>,
}

impl Reducer for PluginReducer {
    fn namespace(&self) -> &str {
        self.name.as_str()
    }

    fn default_state(&self) -> Value {
        self.plugin.default_state()
    }

    fn reduce(&self, state: &Value, action: &Action) -> Option<Value> {
        self.plugin.reduce(state, action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Named(&'static str);

    impl Plugin for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn default_state(&self) -> Value {
            json!({"owner": self.0})
        }
    }

    #[test]
    fn test_registration_order_is_kept() {
        let mut set = PluginSet::new();
        set.register(Named("b"), json!({})).unwrap();
        set.register(Named("a"), json!({})).unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["b", "a"]);

        let reducers = set.reducers();
        assert_eq!(reducers[0].namespace(), "b");
        assert_eq!(reducers[1].default_state(), json!({"owner": "a"}));
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let mut set = PluginSet::new();
        set.register(Named("scoreboard"), json!({})).unwrap();
        let err = set.register(Named("scoreboard"), json!({})).err().unwrap();
        assert!(matches!(err, Error::DuplicatePlugin(ref n) if n == "scoreboard"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_malformed_identity_rejected() {
        let mut set = PluginSet::new();
        assert!(matches!(
            set.register(Named("has.dot"), json!({})),
            Err(Error::InvalidPluginName(_))
        ));
        assert!(set.register(Named(""), json!({})).is_err());
        assert!(set.is_empty());
    }
}
