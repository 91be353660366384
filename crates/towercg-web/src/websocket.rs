//! WebSocket transport for the connection gateway
//!
//! Credentials come from the upgrade request's query string
//! (`/ws?username=..&password=..`).

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tracing::{debug, info};

use crate::auth::Credentials;
use crate::state::AppState;

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(credentials): Query<Credentials>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, credentials))
}

async fn handle_socket(socket: WebSocket, state: AppState, credentials: Credentials) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let gateway = state.gateway.clone();

    let (connection, mut outbound) = gateway.connect(credentials).await;
    let short_id = connection.id.simple().to_string();
    let short_id = &short_id[..8];

    // Task to send queued frames to the WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming frames
    let recv_gateway = gateway.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    recv_gateway.handle_inbound(&connection, &text);
                }
                Message::Close(_) => break,
                // Pings are answered by axum
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = (&mut send_task) => {
            debug!("WebSocket send side closed: {}", short_id);
            recv_task.abort();
        }
        _ = (&mut recv_task) => send_task.abort(),
    }

    gateway.disconnect(&connection);
    info!("WebSocket disconnected: {}", short_id);
}
