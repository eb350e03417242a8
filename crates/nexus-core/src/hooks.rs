//! Handshake hooks: authentication, upgrade, and their failure responders.

use crate::error::UpgradeError;
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Query,
    },
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use nexus_types::ConnId;
use std::collections::HashMap;
use std::sync::Arc;

/// The parts of an inbound handshake request the hooks get to see.
#[derive(Debug, Clone, Default)]
pub struct HandshakeRequest {
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl HandshakeRequest {
    pub fn new(uri: Uri, headers: HeaderMap) -> Self {
        Self { uri, headers }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Percent-decoded query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let Query(mut params) = Query::<HashMap<String, String>>::try_from_uri(&self.uri).ok()?;
        params.remove(name)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

/// Outcome of the auth hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Accept the connection under the given identity.
    Accept(ConnId),
    Reject,
}

pub type AuthFn = Arc<dyn Fn(&HandshakeRequest) -> AuthDecision + Send + Sync>;

pub type RejectFn = Arc<dyn Fn(&HandshakeRequest) -> Response + Send + Sync>;

/// Turns the extracted upgrade (or axum's rejection of it) into an upgrade
/// ready to be accepted.
pub type UpgradeFn = Arc<
    dyn Fn(
            &HandshakeRequest,
            Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
        ) -> Result<WebSocketUpgrade, UpgradeError>
        + Send
        + Sync,
>;

pub type UpgradeFailFn = Arc<dyn Fn(&HandshakeRequest, &UpgradeError) -> Response + Send + Sync>;

/// Protocol settings the default upgrade hook applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeSettings {
    pub max_message_size: Option<usize>,
    pub max_frame_size: Option<usize>,
    /// Subprotocols in order of preference.
    pub protocols: Vec<String>,
}

impl UpgradeSettings {
    pub fn apply(&self, mut ws: WebSocketUpgrade) -> WebSocketUpgrade {
        if let Some(size) = self.max_message_size {
            ws = ws.max_message_size(size);
        }
        if let Some(size) = self.max_frame_size {
            ws = ws.max_frame_size(size);
        }
        if !self.protocols.is_empty() {
            ws = ws.protocols(self.protocols.clone());
        }
        ws
    }
}

/// Accept everyone under a fresh random identity.
pub fn default_auth() -> AuthFn {
    Arc::new(|_request: &HandshakeRequest| AuthDecision::Accept(uuid::Uuid::new_v4().to_string()))
}

/// `401 Unauthorized`.
pub fn default_auth_failed() -> RejectFn {
    Arc::new(|_request: &HandshakeRequest| {
        (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
    })
}

/// Accept any well-formed upgrade, applying `settings`.
pub fn default_upgrade(settings: UpgradeSettings) -> UpgradeFn {
    Arc::new(
        move |_request: &HandshakeRequest,
              ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>|
              -> Result<WebSocketUpgrade, UpgradeError> { Ok(settings.apply(ws?)) },
    )
}

/// `500` with a generic body.
pub fn default_upgrade_failed() -> UpgradeFailFn {
    Arc::new(|_request: &HandshakeRequest, _error: &UpgradeError| {
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to upgrade to WebSocket").into_response()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> HandshakeRequest {
        let mut headers = HeaderMap::new();
        headers.insert("x-user", "alice".parse().unwrap());
        HandshakeRequest::new(uri.parse().unwrap(), headers)
    }

    #[test]
    fn test_query_param_is_decoded() {
        let req = request("/chat?id=user%201&room=a");
        assert_eq!(req.path(), "/chat");
        assert_eq!(req.query_param("id").as_deref(), Some("user 1"));
        assert_eq!(req.query_param("missing"), None);
        assert_eq!(request("/chat").query_param("id"), None);
    }

    #[test]
    fn test_header_lookup() {
        let req = request("/chat");
        assert_eq!(req.header("x-user"), Some("alice"));
        assert_eq!(req.header("x-other"), None);
    }

    #[test]
    fn test_default_auth_assigns_unique_ids() {
        let auth = default_auth();
        let req = request("/chat");
        let (AuthDecision::Accept(a), AuthDecision::Accept(b)) = (auth(&req), auth(&req)) else {
            panic!("default auth must accept");
        };
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_default_responders() {
        let req = request("/chat");
        assert_eq!(default_auth_failed()(&req).status(), StatusCode::UNAUTHORIZED);
        let err = UpgradeError::Refused("nope".into());
        assert_eq!(
            default_upgrade_failed()(&req, &err).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
