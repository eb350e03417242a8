//! Connection lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConnId, EndpointPath};

/// What an endpoint does when a new connection arrives under an identity
/// that already has a live entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Evict and close the existing connection, then serve the new one.
    #[default]
    ReplaceExisting,
    /// Keep the existing connection and close the new one.
    RejectNew,
}

/// Why a serving loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The peer closed the connection.
    PeerClosed,
    /// Reading from the connection failed.
    ReadError(String),
    /// The endpoint (or the whole manager) was shut down.
    Shutdown,
    /// Removed from the table by a newer connection or an explicit disconnect.
    Evicted,
    /// The serving task was dropped or panicked before finishing.
    Aborted,
}

/// Why an accepted connection never made it into the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    DuplicateIdentity,
    EndpointShutDown,
}

/// Events emitted by an endpoint as connections come and go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    Connected {
        endpoint_path: EndpointPath,
        conn_id: ConnId,
        at: DateTime<Utc>,
    },
    Disconnected {
        endpoint_path: EndpointPath,
        conn_id: ConnId,
        reason: DisconnectReason,
        at: DateTime<Utc>,
    },
    Rejected {
        endpoint_path: EndpointPath,
        conn_id: ConnId,
        reason: RejectReason,
        at: DateTime<Utc>,
    },
}

impl ConnectionEvent {
    pub fn endpoint_path(&self) -> &str {
        match self {
            ConnectionEvent::Connected { endpoint_path, .. }
            | ConnectionEvent::Disconnected { endpoint_path, .. }
            | ConnectionEvent::Rejected { endpoint_path, .. } => endpoint_path,
        }
    }

    pub fn conn_id(&self) -> &str {
        match self {
            ConnectionEvent::Connected { conn_id, .. }
            | ConnectionEvent::Disconnected { conn_id, .. }
            | ConnectionEvent::Rejected { conn_id, .. } => conn_id,
        }
    }
}
