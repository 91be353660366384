//! Reducer helpers
//!
//! Small builders for the reducer shapes plugins write over and over.
//! Each returns a `ReduceFn` that yields `None` for actions it does not
//! handle, so unchanged sub-states keep their identity.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::action::Action;

pub type ReduceFn = Arc<dyn Fn(&Value, &Action) -> Option<Value> + Send + Sync>;

/// Sets the value to the action payload; `reset_action` restores
/// `reset_value`.
pub fn setter(action: &str, reset_action: &str, reset_value: Value) -> ReduceFn {
    let action = action.to_string();
    let reset_action = reset_action.to_string();
    Arc::new(move |_state: &Value, a: &Action| {
        if a.kind == reset_action {
            Some(reset_value.clone())
        } else if a.kind == action {
            Some(a.payload.clone())
        } else {
            None
        }
    })
}

/// Flips a boolean; `reset_action` restores `reset_value`.
pub fn toggle(action: &str, reset_action: &str, reset_value: bool) -> ReduceFn {
    let action = action.to_string();
    let reset_action = reset_action.to_string();
    Arc::new(move |state: &Value, a: &Action| {
        if a.kind == reset_action {
            Some(Value::Bool(reset_value))
        } else if a.kind == action {
            Some(Value::Bool(!state.as_bool().unwrap_or(false)))
        } else {
            None
        }
    })
}

/// Manages an object as a key/value map.
///
/// `action` with payload `{"key": k, "value": v}` sets `k` to `v`;
/// `reset_action` with payload `{"key": k}` removes `k`. Payloads without
/// a string `key` are ignored.
pub fn keyed_setter(action: &str, reset_action: &str) -> ReduceFn {
    let action = action.to_string();
    let reset_action = reset_action.to_string();
    Arc::new(move |state: &Value, a: &Action| {
        if a.kind != action && a.kind != reset_action {
            return None;
        }
        let key = a.payload.get("key").and_then(Value::as_str)?;
        let mut map = state.as_object().cloned().unwrap_or_default();
        if a.kind == reset_action {
            map.remove(key)?;
        } else {
            let value = a.payload.get("value").cloned().unwrap_or(Value::Null);
            map.insert(key.to_string(), value);
        }
        Some(Value::Object(map))
    })
}

/// Runs one reducer per field of an object state. The object is rebuilt
/// only if at least one field changed.
pub fn combine(fields: Vec<(&str, ReduceFn)>) -> ReduceFn {
    let fields: Vec<(String, ReduceFn)> = fields
        .into_iter()
        .map(|(name, f)| (name.to_string(), f))
        .collect();
    Arc::new(move |state: &Value, a: &Action| {
        let mut next: Option<Map<String, Value>> = None;
        for (name, reduce) in &fields {
            let current = state.get(name).unwrap_or(&Value::Null);
            if let Some(changed) = reduce(current, a) {
                next.get_or_insert_with(|| state.as_object().cloned().unwrap_or_default())
                    .insert(name.clone(), changed);
            }
        }
        next.map(Value::Object)
    })
}
