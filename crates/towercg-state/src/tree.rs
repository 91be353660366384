//! The namespaced state tree
//!
//! Each plugin's sub-state sits behind an `Arc`. A reducer that ignores an
//! action leaves its `Arc` untouched, so two trees share every unchanged
//! sub-state and `Arc::ptr_eq` tells the differ what it may skip.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct StateTree {
    entries: BTreeMap<String, Arc<Value>>,
}

impl StateTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, key: String, value: Arc<Value>) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Arc<Value>> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<Value>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deep copy into a plain JSON object.
    pub fn to_map(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), Value::clone(v)))
            .collect()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.to_map())
    }
}

impl PartialEq for StateTree {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().all(|(k, v)| {
                other
                    .entries
                    .get(k)
                    .is_some_and(|o| Arc::ptr_eq(v, o) || v == o)
            })
    }
}

impl Serialize for StateTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v.as_ref())?;
        }
        map.end()
    }
}

impl FromIterator<(String, Value)> for StateTree {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        }
    }
}
