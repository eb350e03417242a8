//! WebSocket route handler.

use crate::state::AppState;
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use nexus_core::HandshakeRequest;
use std::sync::Arc;

/// Hand the handshake to whichever endpoint is registered under the request
/// path right now. axum's upgrade rejection is passed through so the
/// endpoint's own upgrade hook decides how to answer it.
pub async fn upgrade(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let request = HandshakeRequest::new(uri, headers);

    match state.manager.endpoint(request.path()) {
        Some(endpoint) => endpoint.handshake(request, ws),
        None => {
            tracing::debug!(target: "nexus::api", path = %request.path(), "no endpoint registered for path");
            (StatusCode::NOT_FOUND, "Endpoint not found").into_response()
        }
    }
}
