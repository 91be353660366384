//! Router composition

use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use towercg_core::PluginName;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::state::AppState;
use crate::websocket;

/// Create the complete router: liveness, the websocket endpoint, and one
/// mount per plugin that contributes routes.
pub fn create_router(state: AppState, plugin_routes: Vec<(PluginName, Router)>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .route("/", get(health_handler))
        .route("/ws", get(websocket::websocket_handler))
        .with_state(state);

    for (name, routes) in plugin_routes {
        if name.as_str() == "ws" {
            warn!(plugin = %name, "Plugin routes would shadow the websocket endpoint, not mounting");
            continue;
        }
        debug!(plugin = %name, "Mounting plugin routes at /{}", name);
        app = app.nest(&format!("/{}", name), routes);
    }

    app.layer(TraceLayer::new_for_http()).layer(cors)
}

/// GET / - liveness, no authentication
async fn health_handler() -> Json<Value> {
    Json(json!({"ok": true}))
}
