//! Endpoint construction from configuration.

use crate::config::{EndpointSettings, IdentitySource};
use nexus_core::{AuthDecision, Endpoint, EndpointConfig, HandshakeRequest};

/// Query parameter carrying the identity for [`IdentitySource::Query`].
pub const IDENTITY_PARAM: &str = "id";

pub fn build(settings: &EndpointSettings) -> Endpoint {
    let mut config = EndpointConfig::default()
        .with_inbound_capacity(settings.inbound_capacity)
        .with_duplicate_policy(settings.duplicate_policy)
        .with_upgrade_settings(settings.upgrade_settings());

    if settings.identity == IdentitySource::Query {
        config = config.with_auth(query_identity);
    }

    Endpoint::new(settings.path.clone(), config)
}

/// Accept under the `id` query parameter; reject when it is missing or empty.
pub fn query_identity(request: &HandshakeRequest) -> AuthDecision {
    match request.query_param(IDENTITY_PARAM) {
        Some(id) if !id.is_empty() => AuthDecision::Accept(id),
        _ => AuthDecision::Reject,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_types::DuplicatePolicy;

    fn request(uri: &str) -> HandshakeRequest {
        HandshakeRequest::new(uri.parse().unwrap(), Default::default())
    }

    #[test]
    fn test_query_identity() {
        assert_eq!(
            query_identity(&request("/chat?id=alice")),
            AuthDecision::Accept("alice".into())
        );
        assert_eq!(query_identity(&request("/chat?id=")), AuthDecision::Reject);
        assert_eq!(query_identity(&request("/chat")), AuthDecision::Reject);
    }

    #[test]
    fn test_build_applies_settings() {
        let settings = EndpointSettings {
            identity: IdentitySource::Query,
            duplicate_policy: DuplicatePolicy::RejectNew,
            ..EndpointSettings::new("/chat")
        };
        let endpoint = build(&settings);
        assert_eq!(endpoint.path(), "/chat");
        assert_eq!(endpoint.duplicate_policy(), DuplicatePolicy::RejectNew);
        assert_eq!(endpoint.authenticate(&request("/chat")), AuthDecision::Reject);

        let random = build(&EndpointSettings::new("/feed"));
        assert!(matches!(random.authenticate(&request("/feed")), AuthDecision::Accept(_)));
    }
}
