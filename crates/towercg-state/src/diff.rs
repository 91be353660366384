//! Structural diffs between state trees
//!
//! A `TreeDiff` maps each changed namespace to a `Delta`. Objects are
//! diffed key by key and arrays index by index; anything else that
//! differs is a whole-value `Modify`. Key order never matters, only value
//! equality. Applying `diff(old, new)` to `old` yields `new`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, StateStoreError};
use crate::tree::StateTree;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Delta {
    /// Key or index that did not exist before
    Insert { value: Value },
    /// Key that no longer exists
    Delete,
    /// Whole-value replacement
    Modify { old: Value, new: Value },
    /// Per-key changes inside an object
    Object { fields: BTreeMap<String, Delta> },
    /// Per-index changes inside an array; `len` is the new length
    Array {
        len: usize,
        items: BTreeMap<usize, Delta>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeDiff(BTreeMap<String, Delta>);

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, namespace: &str) -> Option<&Delta> {
        self.0.get(namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Apply to a plain JSON copy of the old tree.
    pub fn apply_to(&self, tree: &mut Map<String, Value>) -> Result<()> {
        for (key, delta) in &self.0 {
            apply_field(tree, key, delta)?;
        }
        Ok(())
    }
}

/// Diff two trees. Sub-states shared by reference are skipped without
/// being compared.
pub fn diff_trees(old: &StateTree, new: &StateTree) -> TreeDiff {
    let mut changes = BTreeMap::new();

    for (key, new_value) in new.iter() {
        match old.get(key) {
            Some(old_value) if Arc::ptr_eq(old_value, new_value) => {}
            Some(old_value) => {
                if let Some(delta) = diff(old_value, new_value) {
                    changes.insert(key.to_string(), delta);
                }
            }
            None => {
                changes.insert(
                    key.to_string(),
                    Delta::Insert {
                        value: Value::clone(new_value),
                    },
                );
            }
        }
    }
    for key in old.keys() {
        if !new.contains(key) {
            changes.insert(key.to_string(), Delta::Delete);
        }
    }

    TreeDiff(changes)
}

/// Diff two values; `None` when they are equal.
pub fn diff(old: &Value, new: &Value) -> Option<Delta> {
    if old == new {
        return None;
    }

    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut fields = BTreeMap::new();
            for (key, new_value) in new_map {
                match old_map.get(key) {
                    Some(old_value) => {
                        if let Some(delta) = diff(old_value, new_value) {
                            fields.insert(key.clone(), delta);
                        }
                    }
                    None => {
                        fields.insert(
                            key.clone(),
                            Delta::Insert {
                                value: new_value.clone(),
                            },
                        );
                    }
                }
            }
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    fields.insert(key.clone(), Delta::Delete);
                }
            }
            Some(Delta::Object { fields })
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            let mut items = BTreeMap::new();
            for (index, new_value) in new_items.iter().enumerate() {
                let delta = match old_items.get(index) {
                    Some(old_value) => diff(old_value, new_value),
                    None => Some(Delta::Insert {
                        value: new_value.clone(),
                    }),
                };
                if let Some(delta) = delta {
                    items.insert(index, delta);
                }
            }
            Some(Delta::Array {
                len: new_items.len(),
                items,
            })
        }
        _ => Some(Delta::Modify {
            old: old.clone(),
            new: new.clone(),
        }),
    }
}

fn apply_field(map: &mut Map<String, Value>, key: &str, delta: &Delta) -> Result<()> {
    match delta {
        Delta::Insert { value } => {
            map.insert(key.to_string(), value.clone());
        }
        Delta::Delete => {
            if map.remove(key).is_none() {
                return Err(StateStoreError::DiffApply(format!("no key '{}' to delete", key)));
            }
        }
        _ => {
            let target = map
                .get_mut(key)
                .ok_or_else(|| StateStoreError::DiffApply(format!("no key '{}' to change", key)))?;
            apply_value(target, delta)?;
        }
    }
    Ok(())
}

fn apply_value(target: &mut Value, delta: &Delta) -> Result<()> {
    match delta {
        Delta::Modify { new, .. } => *target = new.clone(),
        Delta::Insert { value } => *target = value.clone(),
        Delta::Object { fields } => {
            let map = target.as_object_mut().ok_or_else(|| {
                StateStoreError::DiffApply("object delta applied to a non-object".into())
            })?;
            for (key, delta) in fields {
                apply_field(map, key, delta)?;
            }
        }
        Delta::Array { len, items } => {
            let array = target.as_array_mut().ok_or_else(|| {
                StateStoreError::DiffApply("array delta applied to a non-array".into())
            })?;
            array.truncate(*len);
            for (&index, delta) in items {
                match delta {
                    Delta::Insert { value } if index == array.len() => array.push(value.clone()),
                    _ => {
                        let slot = array.get_mut(index).ok_or_else(|| {
                            StateStoreError::DiffApply(format!("index {} out of range", index))
                        })?;
                        apply_value(slot, delta)?;
                    }
                }
            }
            if array.len() != *len {
                return Err(StateStoreError::DiffApply(format!(
                    "array has {} items after apply, expected {}",
                    array.len(),
                    len
                )));
            }
        }
        Delta::Delete => {
            return Err(StateStoreError::DiffApply(
                "delete delta without a containing key".into(),
            ))
        }
    }
    Ok(())
}
