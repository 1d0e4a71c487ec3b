//! HTTP sync endpoint handler: `POST /sync` carries one framed
//! [`riftdb_core::protocol::SyncMessage`] request and returns one framed
//! response (§4.5/§6).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use riftdb_core::protocol::SyncMessage;

use super::AppState;
use crate::sync_service;

/// Decodes the request body as a `SyncMessage`, dispatches it against the
/// relay's store, and returns the encoded response frame.
///
/// A malformed frame is rejected with `400 Bad Request` rather than
/// dispatched -- the strict "unknown tag/version -> abort" decode policy
/// applies at the transport boundary too.
pub async fn http_sync_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let message = match SyncMessage::decode(&body) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(error = %err, "rejected malformed /sync frame");
            return (StatusCode::BAD_REQUEST, Vec::new()).into_response();
        }
    };

    let response = sync_service::handle_message(state.store.as_ref(), &state.reconcile_config, message);
    let encoded = response.encode();
    ([("content-type", "application/octet-stream")], encoded).into_response()
}
