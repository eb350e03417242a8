//! Request and response bodies of the admin HTTP API.

use serde::{Deserialize, Serialize};

use crate::{optional_kind, ConnId, EndpointPath, MessageKind};

/// Send one message to one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub endpoint_path: EndpointPath,
    pub conn_id: ConnId,
    /// Opcode or kind name; absent or `0` falls back to the server default.
    #[serde(default, deserialize_with = "optional_kind")]
    pub kind: Option<MessageKind>,
    #[serde(default)]
    pub text: Option<String>,
    /// Standard base64 payload, used when `text` is absent.
    #[serde(default)]
    pub base64: Option<String>,
}

/// Send to some (or, with empty `conn_ids`, all) connections of one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MulticastRequest {
    pub endpoint_path: EndpointPath,
    #[serde(default)]
    pub conn_ids: Vec<ConnId>,
    #[serde(default, deserialize_with = "optional_kind")]
    pub kind: Option<MessageKind>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub base64: Option<String>,
}

/// Independent point-to-point sends. `null` entries are skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub messages: Vec<Option<SendMessageRequest>>,
}

/// Send to every connection of one endpoint, or of every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRequest {
    #[serde(default)]
    pub endpoint_path: Option<EndpointPath>,
    #[serde(default, deserialize_with = "optional_kind")]
    pub kind: Option<MessageKind>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub base64: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectRequest {
    pub endpoint_path: EndpointPath,
    pub conn_id: ConnId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSummary {
    pub path: EndpointPath,
    pub connection_count: usize,
    pub conn_ids: Vec<ConnId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointListResponse {
    pub endpoints: Vec<EndpointSummary>,
    pub total_connections: usize,
}

/// One target a send could not reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTarget {
    pub endpoint_path: EndpointPath,
    /// Absent when the whole endpoint was missing.
    pub conn_id: Option<ConnId>,
    pub error: String,
}

/// Error body returned when a send fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendFailureResponse {
    pub error: String,
    /// Scope of the failed operation ("", an endpoint path for multicast/broadcast).
    pub endpoint_path: EndpointPath,
    pub failures: Vec<FailedTarget>,
}
