//! Endpoint/connection registry and message dispatch for Nexus.
//!
//! A [`Manager`] maps endpoint paths to [`Endpoint`]s. Each endpoint accepts
//! WebSocket connections through its auth and upgrade hooks, runs one serving
//! loop per connection, and pushes decoded frames onto its inbound channel.
//! Outbound traffic is addressed with one of the message variants in
//! [`message`] and dispatched through [`Manager::send`].

mod connection;
mod endpoint;
mod error;
mod hooks;
mod inbound;
pub mod local;
mod manager;
pub mod message;
pub mod ws;

pub use connection::{FrameSink, FrameSource, SharedSink};
pub use endpoint::{Endpoint, EndpointConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_INBOUND_CAPACITY};
pub use error::{
    AggregateError, AggregateScope, NexusError, SendError, Target, TransportError, UpgradeError,
};
pub use hooks::{
    default_auth, default_auth_failed, default_upgrade, default_upgrade_failed, AuthDecision,
    AuthFn, HandshakeRequest, RejectFn, UpgradeFailFn, UpgradeFn, UpgradeSettings,
};
pub use inbound::{InboundChannel, InboundReceiver};
pub use manager::{Manager, ManagerConfig};
pub use message::{BroadcastMessage, Deliver, EndpointMessage, Message, MultiMessage, Outbound};

pub use nexus_types::{
    ConnId, ConnectionEvent, DisconnectReason, DuplicatePolicy, EndpointPath, Frame,
    InboundMessage, MessageKind, RejectReason,
};

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, NexusError>;
