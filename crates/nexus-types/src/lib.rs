//! Shared types for the Nexus endpoint registry.

mod api;
mod event;
mod frame;

pub use api::*;
pub use event::*;
pub use frame::*;

/// Identity of a connection, unique within its endpoint.
pub type ConnId = String;

/// Path an endpoint is mounted at.
pub type EndpointPath = String;
