//! Counter plugin
//!
//! Keeps `{"value": n}` and exposes `increment`, `reset` and `get`
//! commands plus `GET /counter/`. Mostly useful to check that a client
//! sees replies and diffs end to end.

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use towercg_state::Action;

use crate::command::CommandTable;
use crate::plugin::{Plugin, PluginContext};

const INCREMENT: &str = "counter/increment";
const SET: &str = "counter/set";
const RESET: &str = "counter/reset";

#[derive(Debug, Default)]
pub struct CounterPlugin;

impl CounterPlugin {
    pub fn new() -> Self {
        Self
    }
}

fn current(state: &Value) -> i64 {
    state.get("value").and_then(Value::as_i64).unwrap_or(0)
}

impl Plugin for CounterPlugin {
    fn name(&self) -> &str {
        "counter"
    }

    fn default_config(&self) -> Value {
        json!({"step": 1})
    }

    fn default_state(&self) -> Value {
        json!({"value": 0})
    }

    fn reduce(&self, state: &Value, action: &Action) -> Option<Value> {
        match action.kind.as_str() {
            INCREMENT => {
                let step = action.payload.as_i64().unwrap_or(1);
                Some(json!({"value": current(state) + step}))
            }
            SET => action.payload.as_i64().map(|value| json!({"value": value})),
            RESET => (current(state) != 0).then(|| json!({"value": 0})),
            _ => None,
        }
    }

    fn register_commands(&self, commands: &mut CommandTable, _ctx: &PluginContext) {
        commands
            .register_sync("increment", |ctx, payload| {
                let step = payload
                    .get("by")
                    .and_then(Value::as_i64)
                    .or_else(|| ctx.config_value("step").and_then(Value::as_i64))
                    .unwrap_or(1);
                let (_, state) = ctx.dispatch_with_state(Action::new(INCREMENT, json!(step)));
                Ok(Some(json!(current(&state))))
            })
            .register_sync("set", |ctx, payload| {
                let value = payload
                    .get("value")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| anyhow::anyhow!("'value' must be an integer"))?;
                ctx.dispatch(Action::new(SET, json!(value)));
                Ok(Some(json!({"value": value})))
            })
            .register_sync("reset", |ctx, _| {
                ctx.dispatch(Action::of(RESET));
                Ok(None)
            })
            .register_sync("get", |ctx, _| Ok(Some((*ctx.state()).clone())));
    }

    fn routes(&self, ctx: &PluginContext) -> Option<Router> {
        Some(
            Router::new()
                .route("/", get(value_handler))
                .with_state(ctx.clone()),
        )
    }
}

async fn value_handler(State(ctx): State<PluginContext>) -> Json<Value> {
    Json((*ctx.state()).clone())
}
