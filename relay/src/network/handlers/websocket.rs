//! WebSocket upgrade handler: a long-lived `/ws` session exchanging the
//! same framed [`riftdb_core::protocol::SyncMessage`]s as `/sync`, one per
//! binary frame (§4.5/§6).

use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use riftdb_core::protocol::SyncMessage;

use super::AppState;
use crate::sync_service;

/// Upgrades an HTTP connection to a WebSocket connection and runs the
/// per-connection sync loop until the client disconnects.
pub async fn ws_upgrade_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (handle, _rx) = state.registry.register(&state.config.connection);
    tracing::info!(connection_id = handle.id.0, "sync session opened");

    while let Some(frame) = socket.recv().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, "websocket read error, closing session");
                break;
            }
        };

        let bytes = match frame {
            Message::Binary(bytes) => bytes,
            Message::Close(_) => break,
            // Ping/Pong/Text are not part of the sync protocol; ignore them
            // rather than dropping the session over an unexpected frame kind.
            _ => continue,
        };

        {
            let mut metadata = handle.metadata.write().await;
            metadata.last_heartbeat = Instant::now();
        }

        let message = match SyncMessage::decode(&bytes) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "rejected malformed websocket frame, closing session");
                break;
            }
        };

        if let SyncMessage::InitiatorSync { owner_id, .. } | SyncMessage::WriteRequest { owner_id, .. } = &message {
            handle.metadata.write().await.owner_id = Some(owner_id.clone());
        }

        let response = sync_service::handle_message(state.store.as_ref(), &state.reconcile_config, message);
        if socket.send(Message::Binary(response.encode().into())).await.is_err() {
            break;
        }
    }

    state.registry.remove(handle.id);
    tracing::info!(connection_id = handle.id.0, "sync session closed");
}
