//! Admin routes: inspect endpoints, send messages, evict connections.

use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use nexus_core::{
    BroadcastMessage, Deliver, EndpointMessage, Message, MultiMessage, NexusError, SendError,
};
use nexus_types::{
    BatchRequest, BroadcastRequest, DisconnectRequest, EndpointListResponse, EndpointSummary,
    FailedTarget, MulticastRequest, SendFailureResponse, SendMessageRequest,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Error responses of the admin API.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Send(SendError),
}

impl From<SendError> for ApiError {
    fn from(error: SendError) -> Self {
        ApiError::Send(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message).into_response(),
            ApiError::Send(error) => {
                let status = if error.is_not_found() {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::BAD_GATEWAY
                };
                (status, Json(failure_report(&error))).into_response()
            }
        }
    }
}

/// Describe every target a send failed to reach.
pub fn failure_report(error: &SendError) -> SendFailureResponse {
    let endpoint_path = match error {
        SendError::Aggregate(aggregate) => aggregate.endpoint_path().to_string(),
        leaf => leaf.target().map(|t| t.endpoint_path).unwrap_or_default(),
    };

    let failures = error
        .leaves()
        .into_iter()
        .filter_map(|leaf| {
            let target = leaf.target()?;
            Some(FailedTarget {
                endpoint_path: target.endpoint_path,
                conn_id: target.conn_id,
                error: leaf.to_string(),
            })
        })
        .collect();

    SendFailureResponse {
        error: error.to_string(),
        endpoint_path,
        failures,
    }
}

/// Decode a request payload: `text` as UTF-8, otherwise `base64`.
fn decode_payload(text: Option<String>, base64: Option<String>) -> Result<Bytes, ApiError> {
    match (text, base64) {
        (Some(_), Some(_)) => Err(ApiError::BadRequest(
            "payload must be given as either text or base64, not both".into(),
        )),
        (Some(text), None) => Ok(Bytes::from(text)),
        (None, Some(encoded)) => STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(|e| ApiError::BadRequest(format!("invalid base64 payload: {}", e))),
        (None, None) => Err(ApiError::BadRequest("missing text or base64 payload".into())),
    }
}

fn to_message(req: SendMessageRequest) -> Result<Message, ApiError> {
    let payload = decode_payload(req.text, req.base64)?;
    Ok(Message {
        kind: req.kind,
        ..Message::new(req.endpoint_path, req.conn_id, payload)
    })
}

async fn dispatch(state: &AppState, message: &(impl Deliver + ?Sized)) -> Result<StatusCode, ApiError> {
    match state.manager.send(message).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            warn!(target: "nexus::api", error = %e, failures = e.leaves().len(), "send failed");
            Err(e.into())
        }
    }
}

pub async fn list_endpoints(State(state): State<Arc<AppState>>) -> Json<EndpointListResponse> {
    let endpoints: Vec<EndpointSummary> = state
        .manager
        .endpoints()
        .iter()
        .map(|endpoint| {
            let conn_ids = endpoint.connection_ids();
            EndpointSummary {
                path: endpoint.path().to_string(),
                connection_count: conn_ids.len(),
                conn_ids,
            }
        })
        .collect();
    let total_connections = endpoints.iter().map(|e| e.connection_count).sum();

    Json(EndpointListResponse {
        endpoints,
        total_connections,
    })
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendMessageRequest>,
) -> Result<StatusCode, ApiError> {
    let message = to_message(req)?;
    dispatch(&state, &message).await
}

pub async fn multicast(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MulticastRequest>,
) -> Result<StatusCode, ApiError> {
    let payload = decode_payload(req.text, req.base64)?;
    let message = EndpointMessage {
        kind: req.kind,
        ..EndpointMessage::new(req.endpoint_path, payload).to(req.conn_ids)
    };
    dispatch(&state, &message).await
}

pub async fn batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchRequest>,
) -> Result<StatusCode, ApiError> {
    let mut messages = Vec::with_capacity(req.messages.len());
    for (index, entry) in req.messages.into_iter().enumerate() {
        let message = entry
            .map(to_message)
            .transpose()
            .map_err(|e| match e {
                ApiError::BadRequest(reason) => {
                    ApiError::BadRequest(format!("messages[{}]: {}", index, reason))
                }
                other => other,
            })?;
        messages.push(message);
    }
    dispatch(&state, &MultiMessage { messages }).await
}

pub async fn broadcast(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BroadcastRequest>,
) -> Result<StatusCode, ApiError> {
    let payload = decode_payload(req.text, req.base64)?;
    let message = BroadcastMessage {
        endpoint_path: req.endpoint_path,
        kind: req.kind,
        payload,
    };
    dispatch(&state, &message).await
}

pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DisconnectRequest>,
) -> Result<StatusCode, ApiError> {
    match state.manager.disconnect(&req.endpoint_path, &req.conn_id).await {
        Ok(true) => {
            info!(target: "nexus::api", endpoint_path = %req.endpoint_path, conn_id = %req.conn_id, "connection evicted");
            Ok(StatusCode::NO_CONTENT)
        }
        Ok(false) => Err(ApiError::NotFound(format!(
            "connection not found: endpoint_path={} conn_id={}",
            req.endpoint_path, req.conn_id
        ))),
        Err(e @ NexusError::EndpointNotFound(_)) => Err(ApiError::NotFound(e.to_string())),
        Err(e) => Err(ApiError::BadRequest(e.to_string())),
    }
}
