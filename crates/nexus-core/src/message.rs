//! Outbound message variants.
//!
//! Each variant carries its own addressing and implements [`Deliver`]:
//!
//! | variant              | target                                          | failure                          |
//! |----------------------|-------------------------------------------------|----------------------------------|
//! | [`Message`]          | one connection                                  | the single error                 |
//! | [`EndpointMessage`]  | listed connections, or all of one endpoint      | aggregate scoped to the endpoint |
//! | [`MultiMessage`]     | a sequence of [`Message`]s                      | aggregate in batch order         |
//! | [`BroadcastMessage`] | every connection of one endpoint, or everywhere | aggregate scoped to the broadcast|
//!
//! Multi-target sends are best effort: every target is attempted and every
//! failure reported. An unset kind becomes the manager's default kind before
//! anything is written.

use crate::error::{AggregateError, AggregateScope, SendError};
use crate::manager::Manager;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use nexus_types::{ConnId, EndpointPath, Frame, MessageKind};

/// Something that knows how to address and deliver itself.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, manager: &Manager) -> Result<(), SendError>;
}

/// Point-to-point message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub endpoint_path: EndpointPath,
    pub conn_id: ConnId,
    /// `None` means the manager's default kind.
    pub kind: Option<MessageKind>,
    pub payload: Bytes,
}

impl Message {
    pub fn new(
        endpoint_path: impl Into<EndpointPath>,
        conn_id: impl Into<ConnId>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            endpoint_path: endpoint_path.into(),
            conn_id: conn_id.into(),
            kind: None,
            payload: payload.into(),
        }
    }

    pub fn text(
        endpoint_path: impl Into<EndpointPath>,
        conn_id: impl Into<ConnId>,
        text: impl Into<String>,
    ) -> Self {
        let text: String = text.into();
        Self::new(endpoint_path, conn_id, text).with_kind(MessageKind::Text)
    }

    pub fn binary(
        endpoint_path: impl Into<EndpointPath>,
        conn_id: impl Into<ConnId>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self::new(endpoint_path, conn_id, data).with_kind(MessageKind::Binary)
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

#[async_trait]
impl Deliver for Message {
    async fn deliver(&self, manager: &Manager) -> Result<(), SendError> {
        let endpoint = manager
            .endpoint(&self.endpoint_path)
            .ok_or_else(|| SendError::EndpointNotFound(self.endpoint_path.clone()))?;
        let sink = endpoint
            .connection(&self.conn_id)
            .ok_or_else(|| SendError::ConnectionNotFound {
                endpoint_path: self.endpoint_path.clone(),
                conn_id: self.conn_id.clone(),
            })?;

        let frame = Frame::new(manager.resolve_kind(self.kind), self.payload.clone());
        crate::connection::write_frame(
            &self.endpoint_path,
            &self.conn_id,
            &sink,
            frame,
            manager.write_timeout(),
        )
        .await
    }
}

/// Multicast within one endpoint. An empty `conn_ids` targets every
/// connection registered when the send starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointMessage {
    pub endpoint_path: EndpointPath,
    pub conn_ids: Vec<ConnId>,
    pub kind: Option<MessageKind>,
    pub payload: Bytes,
}

impl EndpointMessage {
    pub fn new(endpoint_path: impl Into<EndpointPath>, payload: impl Into<Bytes>) -> Self {
        Self {
            endpoint_path: endpoint_path.into(),
            conn_ids: Vec::new(),
            kind: None,
            payload: payload.into(),
        }
    }

    pub fn to<I, S>(mut self, conn_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ConnId>,
    {
        self.conn_ids = conn_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

#[async_trait]
impl Deliver for EndpointMessage {
    async fn deliver(&self, manager: &Manager) -> Result<(), SendError> {
        let endpoint = manager
            .endpoint(&self.endpoint_path)
            .ok_or_else(|| SendError::EndpointNotFound(self.endpoint_path.clone()))?;

        let frame = Frame::new(manager.resolve_kind(self.kind), self.payload.clone());
        let errors = endpoint
            .fan_out(&self.conn_ids, &frame, manager.write_timeout())
            .await;

        aggregate(AggregateScope::Endpoint(self.endpoint_path.clone()), errors)
    }
}

/// Independent point-to-point messages, sent one after another in order.
/// `None` entries are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiMessage {
    pub messages: Vec<Option<Message>>,
}

impl MultiMessage {
    pub fn new(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            messages: messages.into_iter().map(Some).collect(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(Some(message));
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[async_trait]
impl Deliver for MultiMessage {
    async fn deliver(&self, manager: &Manager) -> Result<(), SendError> {
        let mut errors = Vec::new();
        for message in self.messages.iter().flatten() {
            if let Err(e) = message.deliver(manager).await {
                errors.push(e);
            }
        }
        aggregate(AggregateScope::Batch, errors)
    }
}

/// Broadcast to every connection of one endpoint, or of every endpoint when
/// `endpoint_path` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMessage {
    pub endpoint_path: Option<EndpointPath>,
    pub kind: Option<MessageKind>,
    pub payload: Bytes,
}

impl BroadcastMessage {
    /// Broadcast to all endpoints.
    pub fn everywhere(payload: impl Into<Bytes>) -> Self {
        Self {
            endpoint_path: None,
            kind: None,
            payload: payload.into(),
        }
    }

    pub fn endpoint(endpoint_path: impl Into<EndpointPath>, payload: impl Into<Bytes>) -> Self {
        Self {
            endpoint_path: Some(endpoint_path.into()),
            kind: None,
            payload: payload.into(),
        }
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

#[async_trait]
impl Deliver for BroadcastMessage {
    async fn deliver(&self, manager: &Manager) -> Result<(), SendError> {
        let frame = Frame::new(manager.resolve_kind(self.kind), self.payload.clone());
        let timeout = manager.write_timeout();
        let all: &[ConnId] = &[];

        let errors = match &self.endpoint_path {
            Some(path) => {
                let endpoint = manager
                    .endpoint(path)
                    .ok_or_else(|| SendError::EndpointNotFound(path.clone()))?;
                endpoint.fan_out(all, &frame, timeout).await
            }
            None => {
                let endpoints = manager.endpoints();
                tracing::debug!(target: "nexus::dispatch", endpoints = endpoints.len(), "global broadcast");
                join_all(endpoints.iter().map(|e| e.fan_out(all, &frame, timeout)))
                    .await
                    .into_iter()
                    .flatten()
                    .collect()
            }
        };

        aggregate(AggregateScope::Broadcast(self.endpoint_path.clone()), errors)
    }
}

/// Any of the message variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Message(Message),
    Endpoint(EndpointMessage),
    Multi(MultiMessage),
    Broadcast(BroadcastMessage),
}

#[async_trait]
impl Deliver for Outbound {
    async fn deliver(&self, manager: &Manager) -> Result<(), SendError> {
        match self {
            Outbound::Message(m) => m.deliver(manager).await,
            Outbound::Endpoint(m) => m.deliver(manager).await,
            Outbound::Multi(m) => m.deliver(manager).await,
            Outbound::Broadcast(m) => m.deliver(manager).await,
        }
    }
}

impl From<Message> for Outbound {
    fn from(message: Message) -> Self {
        Outbound::Message(message)
    }
}

impl From<EndpointMessage> for Outbound {
    fn from(message: EndpointMessage) -> Self {
        Outbound::Endpoint(message)
    }
}

impl From<MultiMessage> for Outbound {
    fn from(message: MultiMessage) -> Self {
        Outbound::Multi(message)
    }
}

impl From<BroadcastMessage> for Outbound {
    fn from(message: BroadcastMessage) -> Self {
        Outbound::Broadcast(message)
    }
}

fn aggregate(scope: AggregateScope, errors: Vec<SendError>) -> Result<(), SendError> {
    if errors.is_empty() {
        return Ok(());
    }
    tracing::debug!(target: "nexus::dispatch", scope = ?scope, failures = errors.len(), "send completed with failures");
    Err(AggregateError::new(scope, errors).into())
}
