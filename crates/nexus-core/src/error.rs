//! Error types for Nexus.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use nexus_types::{ConnId, EndpointPath};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure of the underlying duplex connection.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("text frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("socket error: {0}")]
    Socket(#[from] axum::Error),

    #[error("{0}")]
    Other(String),
}

/// Failure of a registry operation outside the send path.
#[derive(Error, Debug)]
pub enum NexusError {
    #[error("endpoint not found: {0}")]
    EndpointNotFound(EndpointPath),

    #[error("endpoint already registered: {0}")]
    DuplicateEndpoint(EndpointPath),

    #[error("connection already registered: endpoint_path={endpoint_path} conn_id={conn_id}")]
    DuplicateConnection {
        endpoint_path: EndpointPath,
        conn_id: ConnId,
    },

    #[error("endpoint shut down: {0}")]
    EndpointShutDown(EndpointPath),
}

/// The upgrade hook refused to produce a connection.
#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("websocket handshake rejected: {0}")]
    Handshake(#[from] WebSocketUpgradeRejection),

    #[error("upgrade refused: {0}")]
    Refused(String),
}

/// Failure of a send operation.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("endpoint not found: {0}")]
    EndpointNotFound(EndpointPath),

    #[error("connection not found: endpoint_path={endpoint_path} conn_id={conn_id}")]
    ConnectionNotFound {
        endpoint_path: EndpointPath,
        conn_id: ConnId,
    },

    #[error("write failed: endpoint_path={endpoint_path} conn_id={conn_id}: {source}")]
    Write {
        endpoint_path: EndpointPath,
        conn_id: ConnId,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// A single addressable target that a send failed to reach.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub endpoint_path: EndpointPath,
    /// `None` when the endpoint itself was missing.
    pub conn_id: Option<ConnId>,
}

impl SendError {
    /// The target of a leaf error. Aggregates have no single target.
    pub fn target(&self) -> Option<Target> {
        match self {
            SendError::EndpointNotFound(endpoint_path) => Some(Target {
                endpoint_path: endpoint_path.clone(),
                conn_id: None,
            }),
            SendError::ConnectionNotFound {
                endpoint_path,
                conn_id,
            }
            | SendError::Write {
                endpoint_path,
                conn_id,
                ..
            } => Some(Target {
                endpoint_path: endpoint_path.clone(),
                conn_id: Some(conn_id.clone()),
            }),
            SendError::Aggregate(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SendError::EndpointNotFound(_) | SendError::ConnectionNotFound { .. }
        )
    }

    /// Leaf errors in order, descending into aggregates.
    pub fn leaves(&self) -> Vec<&SendError> {
        match self {
            SendError::Aggregate(aggregate) => aggregate.leaves(),
            leaf => vec![leaf],
        }
    }
}

/// Addressing scope an aggregate was raised under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateScope {
    /// Multicast to (some of) one endpoint's connections.
    Endpoint(EndpointPath),
    /// Broadcast to one endpoint, or to every endpoint when `None`.
    Broadcast(Option<EndpointPath>),
    /// Independent point-to-point sends; errors keep the batch order.
    Batch,
}

/// Per-target failures collected from one multi-target send.
#[derive(Debug)]
pub struct AggregateError {
    pub scope: AggregateScope,
    pub errors: Vec<SendError>,
}

impl AggregateError {
    pub fn new(scope: AggregateScope, errors: Vec<SendError>) -> Self {
        Self { scope, errors }
    }

    /// Endpoint path the aggregate is addressed to; empty for a global
    /// broadcast or a batch.
    pub fn endpoint_path(&self) -> &str {
        match &self.scope {
            AggregateScope::Endpoint(path) | AggregateScope::Broadcast(Some(path)) => path,
            AggregateScope::Broadcast(None) | AggregateScope::Batch => "",
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn leaves(&self) -> Vec<&SendError> {
        self.errors.iter().flat_map(SendError::leaves).collect()
    }

    /// Every target that failed, in error order.
    pub fn failed_targets(&self) -> Vec<Target> {
        self.leaves().into_iter().filter_map(SendError::target).collect()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            AggregateScope::Endpoint(path) => {
                write!(f, "endpoint message send error: endpoint_path={}", path)?
            }
            AggregateScope::Broadcast(path) => write!(
                f,
                "broadcast message send error: endpoint_path={}",
                path.as_deref().unwrap_or("")
            )?,
            AggregateScope::Batch => write!(f, "multi message send error:")?,
        }
        for error in &self.errors {
            write!(f, "\n - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
