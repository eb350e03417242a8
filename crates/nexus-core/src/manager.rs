//! Top-level registry of endpoints and entry point for dispatch.

use crate::connection::SharedSink;
use crate::endpoint::Endpoint;
use crate::error::{NexusError, SendError};
use crate::inbound::InboundReceiver;
use crate::message::Deliver;
use crate::Result;
use dashmap::{mapref::entry::Entry, DashMap};
use nexus_types::{ConnectionEvent, EndpointPath, MessageKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Dispatch settings shared by every send.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Kind given to messages that leave theirs unset.
    pub default_kind: MessageKind,
    /// Upper bound on a single frame write. `None` waits indefinitely.
    pub write_timeout: Option<Duration>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_kind: MessageKind::Text,
            write_timeout: None,
        }
    }
}

/// Maps endpoint paths to endpoints.
pub struct Manager {
    endpoints: DashMap<EndpointPath, Arc<Endpoint>>,
    config: ManagerConfig,
}

impl Manager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            endpoints: DashMap::new(),
            config,
        }
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.config.write_timeout
    }

    /// Normalize an unset kind to the configured default.
    pub fn resolve_kind(&self, kind: Option<MessageKind>) -> MessageKind {
        kind.unwrap_or(self.config.default_kind)
    }

    /// Register `endpoint` under its path, replacing any endpoint already there.
    ///
    /// A replaced endpoint is shut down, closing its connections, and returned.
    pub fn register(&self, endpoint: impl Into<Arc<Endpoint>>) -> Option<Arc<Endpoint>> {
        let endpoint = endpoint.into();
        let path = endpoint.path().to_string();
        let previous = self.endpoints.insert(path.clone(), endpoint);

        match &previous {
            Some(old) => {
                warn!(target: "nexus::registry", path = %path, connections = old.connection_count(), "replacing registered endpoint");
                old.shutdown();
            }
            None => info!(target: "nexus::registry", path = %path, "registered endpoint"),
        }
        previous
    }

    /// Register `endpoint`, failing if its path is taken.
    pub fn try_register(&self, endpoint: impl Into<Arc<Endpoint>>) -> Result<Arc<Endpoint>> {
        let endpoint = endpoint.into();
        match self.endpoints.entry(endpoint.path().to_string()) {
            Entry::Occupied(occupied) => Err(NexusError::DuplicateEndpoint(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                info!(target: "nexus::registry", path = %endpoint.path(), "registered endpoint");
                vacant.insert(endpoint.clone());
                Ok(endpoint)
            }
        }
    }

    /// Remove and shut down the endpoint at `path`.
    pub fn unregister(&self, path: &str) -> Option<Arc<Endpoint>> {
        let (_, endpoint) = self.endpoints.remove(path)?;
        info!(target: "nexus::registry", path, "unregistered endpoint");
        endpoint.shutdown();
        Some(endpoint)
    }

    pub fn endpoint(&self, path: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.get(path).map(|entry| entry.value().clone())
    }

    /// Every registered endpoint, sorted by path.
    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        let mut endpoints: Vec<Arc<Endpoint>> =
            self.endpoints.iter().map(|entry| entry.value().clone()).collect();
        endpoints.sort_by(|a, b| a.path().cmp(b.path()));
        endpoints
    }

    pub fn paths(&self) -> Vec<EndpointPath> {
        self.endpoints().iter().map(|e| e.path().to_string()).collect()
    }

    /// Write half of `conn_id` on the endpoint at `path`.
    pub fn connection(&self, path: &str, conn_id: &str) -> Option<SharedSink> {
        self.endpoint(path)?.connection(conn_id)
    }

    /// Number of connections on the endpoint at `path`.
    ///
    /// Fails with [`NexusError::EndpointNotFound`] for an unknown path, as do
    /// the other per-path accessors.
    pub fn connection_count(&self, path: &str) -> Result<usize> {
        Ok(self.require(path)?.connection_count())
    }

    pub fn total_connections(&self) -> usize {
        self.endpoints.iter().map(|e| e.value().connection_count()).sum()
    }

    pub fn inbound(&self, path: &str) -> Result<InboundReceiver> {
        Ok(self.require(path)?.inbound())
    }

    pub fn subscribe(&self, path: &str) -> Result<broadcast::Receiver<ConnectionEvent>> {
        Ok(self.require(path)?.subscribe())
    }

    /// Evict `conn_id` from the endpoint at `path`. `Ok(false)` if it was absent.
    pub async fn disconnect(&self, path: &str, conn_id: &str) -> Result<bool> {
        let endpoint = self.require(path)?;
        Ok(endpoint.disconnect(conn_id).await)
    }

    /// Deliver a message using its own addressing.
    pub async fn send<M: Deliver + ?Sized>(&self, message: &M) -> std::result::Result<(), SendError> {
        message.deliver(self).await
    }

    /// Shut down every endpoint.
    pub fn shutdown(&self) {
        for endpoint in self.endpoints() {
            endpoint.shutdown();
        }
    }

    fn require(&self, path: &str) -> Result<Arc<Endpoint>> {
        self.endpoint(path)
            .ok_or_else(|| NexusError::EndpointNotFound(path.to_string()))
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("endpoints", &self.paths())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointConfig;
    use crate::local;
    use crate::message::BroadcastMessage;

    #[test]
    fn test_register_and_lookup() {
        let manager = Manager::default();
        assert!(manager.register(Endpoint::new("/chat", EndpointConfig::default())).is_none());
        assert!(manager.endpoint("/chat").is_some());
        assert!(manager.endpoint("/other").is_none());
        assert_eq!(manager.paths(), vec!["/chat".to_string()]);
    }

    #[test]
    fn test_register_replaces_and_shuts_down_previous() {
        let manager = Manager::default();
        let first = manager.try_register(Endpoint::new("/chat", EndpointConfig::default())).unwrap();
        let displaced = manager
            .register(Endpoint::new("/chat", EndpointConfig::default()))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &displaced));
        assert!(first.is_shut_down());
        assert!(!manager.endpoint("/chat").unwrap().is_shut_down());
    }

    #[test]
    fn test_try_register_rejects_duplicate_path() {
        let manager = Manager::default();
        manager.try_register(Endpoint::new("/chat", EndpointConfig::default())).unwrap();
        let err = manager
            .try_register(Endpoint::new("/chat", EndpointConfig::default()))
            .unwrap_err();
        assert!(matches!(err, NexusError::DuplicateEndpoint(path) if path == "/chat"));
    }

    #[test]
    fn test_unknown_path_accessors_fail() {
        let manager = Manager::default();
        assert!(matches!(
            manager.connection_count("/missing"),
            Err(NexusError::EndpointNotFound(_))
        ));
        assert!(manager.inbound("/missing").is_err());
        assert!(manager.subscribe("/missing").is_err());
        assert!(manager.connection("/missing", "u1").is_none());
    }

    #[tokio::test]
    async fn test_counts_and_disconnect() {
        let (_p1, s1, _) = local::pair();
        let (_p2, s2, _) = local::pair();
        let manager = Manager::default();
        manager.register(
            Endpoint::new("/a", EndpointConfig::default().with_connection("u1", s1)),
        );
        manager.register(
            Endpoint::new("/b", EndpointConfig::default().with_connection("u2", s2)),
        );

        assert_eq!(manager.connection_count("/a").unwrap(), 1);
        assert_eq!(manager.total_connections(), 2);
        assert!(manager.connection("/a", "u1").is_some());
        assert!(manager.connection("/a", "u2").is_none());

        assert!(manager.disconnect("/a", "u1").await.unwrap());
        assert!(!manager.disconnect("/a", "u1").await.unwrap());
        assert_eq!(manager.total_connections(), 1);
    }

    #[tokio::test]
    async fn test_replaced_and_shut_down_endpoints_close_seeded_connections() {
        let manager = Manager::default();

        let (mut displaced_peer, sink, _source) = local::pair();
        manager.register(Endpoint::new("/chat", EndpointConfig::default().with_connection("seed", sink)));
        let displaced = manager
            .register(Endpoint::new("/chat", EndpointConfig::default()))
            .unwrap();
        assert_eq!(displaced.connection_count(), 0);
        assert_eq!(displaced_peer.recv().await, None);

        let (mut peer, sink, _source) = local::pair();
        manager.register(Endpoint::new("/x", EndpointConfig::default().with_connection("seed", sink)));
        manager.shutdown();
        assert_eq!(manager.connection_count("/x").unwrap(), 0);

        manager
            .send(&BroadcastMessage::endpoint("/x", "after-shutdown"))
            .await
            .unwrap();
        assert_eq!(peer.recv().await, None);
    }

    #[test]
    fn test_unregister_shuts_down() {
        let manager = Manager::default();
        manager.register(Endpoint::new("/chat", EndpointConfig::default()));
        let removed = manager.unregister("/chat").unwrap();
        assert!(removed.is_shut_down());
        assert!(manager.endpoint("/chat").is_none());
        assert!(manager.unregister("/chat").is_none());
    }

    #[test]
    fn test_resolve_kind_uses_default() {
        let manager = Manager::new(ManagerConfig {
            default_kind: MessageKind::Binary,
            write_timeout: None,
        });
        assert_eq!(manager.resolve_kind(None), MessageKind::Binary);
        assert_eq!(manager.resolve_kind(Some(MessageKind::Text)), MessageKind::Text);
    }
}
