//! Endpoints: named mount points owning a connection table.
//!
//! Connection lifecycle:
//!
//! ```text
//! Pending --auth--> Authenticated --upgrade--> Upgraded --attach--> Serving --read error/cancel--> Closed
//!    \--reject--> (auth_failed)   \--fail--> (upgrade_failed)
//! ```
//!
//! Rejections never touch the table. Once serving, the connection's entry is
//! removed and its sink closed on every exit path, including the serving
//! future being dropped or unwinding.

use crate::connection::{close_sink, write_frame, FrameSource, SharedSink};
use crate::error::{NexusError, SendError};
use crate::hooks::{
    default_auth, default_auth_failed, default_upgrade, default_upgrade_failed, AuthDecision,
    AuthFn, HandshakeRequest, RejectFn, UpgradeFailFn, UpgradeFn, UpgradeSettings,
};
use crate::inbound::{InboundChannel, InboundReceiver};
use crate::Result;
use axum::{
    extract::ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use nexus_types::{
    ConnId, ConnectionEvent, DisconnectReason, DuplicatePolicy, EndpointPath, Frame,
    InboundMessage, RejectReason,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Inbound channel capacity when none is configured.
pub const DEFAULT_INBOUND_CAPACITY: usize = 64;

/// Connection event channel capacity when none is configured.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Endpoint configuration. Unset hooks get the defaults from [`crate::hooks`].
pub struct EndpointConfig {
    /// Decides accept/reject and supplies the connection identity.
    /// Default: accept everyone under a random UUID.
    pub auth: Option<AuthFn>,
    /// Writes the rejection response. Default: `401 Unauthorized`.
    pub auth_failed: Option<RejectFn>,
    /// Performs the WebSocket upgrade. Default: accept, applying `upgrade_settings`.
    pub upgrade: Option<UpgradeFn>,
    /// Writes the handshake-failure response. Default: `500`.
    pub upgrade_failed: Option<UpgradeFailFn>,
    /// Caller-supplied inbound channel. Default: a new one of `inbound_capacity`.
    pub inbound: Option<InboundChannel>,
    pub inbound_capacity: usize,
    /// Pre-seeded, send-only table entries.
    pub connections: Vec<(ConnId, SharedSink)>,
    pub duplicate_policy: DuplicatePolicy,
    pub upgrade_settings: UpgradeSettings,
    pub event_capacity: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            auth: None,
            auth_failed: None,
            upgrade: None,
            upgrade_failed: None,
            inbound: None,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            connections: Vec::new(),
            duplicate_policy: DuplicatePolicy::default(),
            upgrade_settings: UpgradeSettings::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EndpointConfig {
    pub fn with_auth<F>(mut self, auth: F) -> Self
    where
        F: Fn(&HandshakeRequest) -> AuthDecision + Send + Sync + 'static,
    {
        self.auth = Some(Arc::new(auth));
        self
    }

    pub fn with_auth_failed<F>(mut self, responder: F) -> Self
    where
        F: Fn(&HandshakeRequest) -> Response + Send + Sync + 'static,
    {
        self.auth_failed = Some(Arc::new(responder));
        self
    }

    pub fn with_upgrade(mut self, upgrade: UpgradeFn) -> Self {
        self.upgrade = Some(upgrade);
        self
    }

    pub fn with_upgrade_failed<F>(mut self, responder: F) -> Self
    where
        F: Fn(&HandshakeRequest, &crate::UpgradeError) -> Response + Send + Sync + 'static,
    {
        self.upgrade_failed = Some(Arc::new(responder));
        self
    }

    pub fn with_inbound(mut self, channel: InboundChannel) -> Self {
        self.inbound = Some(channel);
        self
    }

    pub fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity;
        self
    }

    pub fn with_connection(mut self, conn_id: impl Into<ConnId>, sink: SharedSink) -> Self {
        self.connections.push((conn_id.into(), sink));
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_upgrade_settings(mut self, settings: UpgradeSettings) -> Self {
        self.upgrade_settings = settings;
        self
    }
}

struct Hooks {
    auth: AuthFn,
    auth_failed: RejectFn,
    upgrade: UpgradeFn,
    upgrade_failed: UpgradeFailFn,
}

#[derive(Clone)]
struct ConnectionEntry {
    sink: SharedSink,
    serial: u64,
    cancel: CancellationToken,
    connected_at: DateTime<Utc>,
    /// A serving loop owns this entry and removes it on exit. Seeded entries
    /// have no loop.
    served: bool,
}

impl ConnectionEntry {
    /// Stop the entry's serving loop (if any) and close its connection.
    async fn evict(self, endpoint_path: &str, conn_id: &str) {
        self.cancel.cancel();
        close_sink(endpoint_path, conn_id, &self.sink).await;
    }
}

/// A named mount point owning a table of live connections.
pub struct Endpoint {
    path: EndpointPath,
    connections: DashMap<ConnId, ConnectionEntry>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: InboundReceiver,
    hooks: Hooks,
    duplicate_policy: DuplicatePolicy,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: CancellationToken,
    next_serial: AtomicU64,
}

impl Endpoint {
    pub fn new(path: impl Into<EndpointPath>, config: EndpointConfig) -> Self {
        let EndpointConfig {
            auth,
            auth_failed,
            upgrade,
            upgrade_failed,
            inbound,
            inbound_capacity,
            connections,
            duplicate_policy,
            upgrade_settings,
            event_capacity,
        } = config;

        let (inbound_tx, inbound_rx) = inbound
            .unwrap_or_else(|| InboundChannel::bounded(inbound_capacity))
            .into_parts();
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let shutdown = CancellationToken::new();

        let table = DashMap::new();
        let mut serial = 0;
        for (conn_id, sink) in connections {
            table.insert(
                conn_id,
                ConnectionEntry {
                    sink,
                    serial,
                    cancel: shutdown.child_token(),
                    connected_at: Utc::now(),
                    served: false,
                },
            );
            serial += 1;
        }

        Self {
            path: path.into(),
            connections: table,
            inbound_tx,
            inbound_rx,
            hooks: Hooks {
                auth: auth.unwrap_or_else(default_auth),
                auth_failed: auth_failed.unwrap_or_else(default_auth_failed),
                upgrade: upgrade.unwrap_or_else(|| default_upgrade(upgrade_settings)),
                upgrade_failed: upgrade_failed.unwrap_or_else(default_upgrade_failed),
            },
            duplicate_policy,
            events,
            shutdown,
            next_serial: AtomicU64::new(serial),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy
    }

    /// Write half of the connection registered under `conn_id`.
    pub fn connection(&self, conn_id: &str) -> Option<SharedSink> {
        self.connections.get(conn_id).map(|entry| entry.sink.clone())
    }

    pub fn contains(&self, conn_id: &str) -> bool {
        self.connections.contains_key(conn_id)
    }

    pub fn connected_at(&self, conn_id: &str) -> Option<DateTime<Utc>> {
        self.connections.get(conn_id).map(|entry| entry.connected_at)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Registered identities, sorted.
    pub fn connection_ids(&self) -> Vec<ConnId> {
        let mut ids: Vec<ConnId> = self.connections.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn inbound(&self) -> InboundReceiver {
        self.inbound_rx.clone()
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop every serving loop, close seeded connections and refuse new ones.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!(target: "nexus::endpoint", path = %self.path, connections = self.connection_count(), "shutting down endpoint");
        self.shutdown.cancel();

        // Serving loops remove their own entries once cancelled.
        let seeded: Vec<ConnId> = self
            .connections
            .iter()
            .filter(|entry| !entry.served)
            .map(|entry| entry.key().clone())
            .collect();
        for conn_id in seeded {
            if let Some((conn_id, entry)) = self.connections.remove_if(&conn_id, |_, e| !e.served) {
                self.spawn_eviction(conn_id, entry);
            }
        }
    }

    /// Remove `conn_id` from the table and close it. Returns whether it was present.
    pub async fn disconnect(&self, conn_id: &str) -> bool {
        let Some((_, entry)) = self.connections.remove(conn_id) else {
            return false;
        };
        info!(target: "nexus::endpoint", path = %self.path, conn_id, "disconnecting connection");
        entry.evict(&self.path, conn_id).await;
        true
    }

    /// Evict `entry` without waiting for its close to finish.
    fn spawn_eviction(&self, conn_id: ConnId, entry: ConnectionEntry) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let path = self.path.clone();
                handle.spawn(async move { entry.evict(&path, &conn_id).await });
            }
            Err(_) => {
                // Dropping the sink is all that is left without a runtime.
                entry.cancel.cancel();
                debug!(target: "nexus::endpoint", path = %self.path, conn_id = %conn_id, "no runtime, dropping connection unclosed");
            }
        }
    }

    /// Run the auth hook.
    pub fn authenticate(&self, request: &HandshakeRequest) -> AuthDecision {
        (self.hooks.auth)(request)
    }

    /// Drive a handshake: auth, then upgrade, then serve on the upgraded socket.
    ///
    /// Auth and upgrade failures are answered by the configured responders and
    /// never reach the connection table.
    pub fn handshake(
        self: Arc<Self>,
        request: HandshakeRequest,
        ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    ) -> Response {
        if self.is_shut_down() {
            return (StatusCode::SERVICE_UNAVAILABLE, "Endpoint shut down").into_response();
        }

        let conn_id = match self.authenticate(&request) {
            AuthDecision::Accept(conn_id) => conn_id,
            AuthDecision::Reject => {
                debug!(target: "nexus::endpoint", path = %self.path, uri = %request.uri, "handshake rejected by auth hook");
                return (self.hooks.auth_failed)(&request);
            }
        };

        let ws = match (self.hooks.upgrade)(&request, ws) {
            Ok(ws) => ws,
            Err(e) => {
                warn!(target: "nexus::endpoint", path = %self.path, conn_id = %conn_id, error = %e, "upgrade failed");
                return (self.hooks.upgrade_failed)(&request, &e);
            }
        };

        let path = self.path.clone();
        let failed_id = conn_id.clone();
        ws.on_failed_upgrade(move |e| {
            warn!(target: "nexus::endpoint", path = %path, conn_id = %failed_id, error = %e, "connection upgrade failed after handshake");
        })
        .on_upgrade(move |socket| async move {
            let (sink, source) = crate::ws::split(socket);
            self.serve(conn_id, sink, source).await;
        })
    }

    /// Register a connection and serve it until its read side fails or it is
    /// cancelled. Each frame read is pushed onto the inbound channel in order.
    pub async fn serve(
        self: Arc<Self>,
        conn_id: ConnId,
        sink: SharedSink,
        mut source: Box<dyn FrameSource>,
    ) {
        let (serial, cancel, displaced) = match self.attach(&conn_id, &sink) {
            Ok(attached) => attached,
            Err(e) => {
                let reason = match e {
                    NexusError::EndpointShutDown(_) => RejectReason::EndpointShutDown,
                    _ => RejectReason::DuplicateIdentity,
                };
                warn!(target: "nexus::endpoint", path = %self.path, conn_id = %conn_id, error = %e, "refusing connection");
                close_sink(&self.path, &conn_id, &sink).await;
                self.emit(ConnectionEvent::Rejected {
                    endpoint_path: self.path.clone(),
                    conn_id,
                    reason,
                    at: Utc::now(),
                });
                return;
            }
        };

        let guard = ConnectionGuard {
            endpoint: self.clone(),
            conn_id: conn_id.clone(),
            serial,
            sink,
            armed: true,
        };

        // The old peer may be slow to close; do not hold up this connection's reads.
        if let Some(previous) = displaced {
            info!(target: "nexus::endpoint", path = %self.path, conn_id = %conn_id, "replacing connection with the same identity");
            self.spawn_eviction(conn_id.clone(), previous);
        }

        info!(target: "nexus::endpoint", path = %self.path, conn_id = %conn_id, "connection established");
        self.emit(ConnectionEvent::Connected {
            endpoint_path: self.path.clone(),
            conn_id: conn_id.clone(),
            at: Utc::now(),
        });

        let reason = loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break DisconnectReason::Shutdown,
                read = source.recv_frame() => match read {
                    Ok(frame) => frame,
                    Err(crate::TransportError::Closed) => break DisconnectReason::PeerClosed,
                    Err(e) => break DisconnectReason::ReadError(e.to_string()),
                },
            };

            tracing::trace!(target: "nexus::endpoint", path = %self.path, conn_id = %conn_id, kind = %frame.kind, len = frame.payload.len(), "frame received");
            let message = InboundMessage::new(self.path.clone(), conn_id.clone(), frame);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break DisconnectReason::Shutdown,
                pushed = self.inbound_tx.send(message) => {
                    // The endpoint holds a receiver, so this only fails if it is gone.
                    if pushed.is_err() {
                        break DisconnectReason::Shutdown;
                    }
                }
            }
        };

        guard.release(reason).await;
    }

    /// Insert a serving connection, applying the duplicate policy. Returns the
    /// entry it displaced, which the caller must evict.
    fn attach(
        &self,
        conn_id: &ConnId,
        sink: &SharedSink,
    ) -> Result<(u64, CancellationToken, Option<ConnectionEntry>)> {
        if self.is_shut_down() {
            return Err(NexusError::EndpointShutDown(self.path.clone()));
        }

        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        let entry = ConnectionEntry {
            sink: sink.clone(),
            serial,
            cancel: cancel.clone(),
            connected_at: Utc::now(),
            served: true,
        };

        let displaced = match self.connections.entry(conn_id.clone()) {
            Entry::Occupied(mut occupied) => match self.duplicate_policy {
                DuplicatePolicy::RejectNew => {
                    return Err(NexusError::DuplicateConnection {
                        endpoint_path: self.path.clone(),
                        conn_id: conn_id.clone(),
                    });
                }
                DuplicatePolicy::ReplaceExisting => Some(occupied.insert(entry)),
            },
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                None
            }
        };

        Ok((serial, cancel, displaced))
    }

    /// Write `frame` to `conn_ids`, or to every connection when `conn_ids` is
    /// empty. Returns one error per failed target.
    pub(crate) async fn fan_out(
        &self,
        conn_ids: &[ConnId],
        frame: &Frame,
        timeout: Option<Duration>,
    ) -> Vec<SendError> {
        // Snapshot the targets so no table lock is held across a write.
        let targets: Vec<(ConnId, Option<SharedSink>)> = if conn_ids.is_empty() {
            self.connections
                .iter()
                .map(|entry| (entry.key().clone(), Some(entry.sink.clone())))
                .collect()
        } else {
            conn_ids
                .iter()
                .map(|id| (id.clone(), self.connection(id)))
                .collect()
        };

        debug!(target: "nexus::dispatch", path = %self.path, targets = targets.len(), kind = %frame.kind, "fan out");

        let writes = targets.into_iter().map(|(conn_id, sink)| async move {
            match sink {
                Some(sink) => write_frame(&self.path, &conn_id, &sink, frame.clone(), timeout).await,
                None => Err(SendError::ConnectionNotFound {
                    endpoint_path: self.path.clone(),
                    conn_id,
                }),
            }
        });

        join_all(writes)
            .await
            .into_iter()
            .filter_map(|result| result.err())
            .collect()
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn disconnected(&self, conn_id: &str, reason: DisconnectReason) {
        match &reason {
            DisconnectReason::ReadError(error) => {
                warn!(target: "nexus::endpoint", path = %self.path, conn_id, error = %error, "connection lost")
            }
            DisconnectReason::Aborted => {
                warn!(target: "nexus::endpoint", path = %self.path, conn_id, "serving loop aborted")
            }
            _ => {
                info!(target: "nexus::endpoint", path = %self.path, conn_id, reason = ?reason, "connection closed")
            }
        }
        self.emit(ConnectionEvent::Disconnected {
            endpoint_path: self.path.clone(),
            conn_id: conn_id.to_string(),
            reason,
            at: Utc::now(),
        });
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("path", &self.path)
            .field("connections", &self.connections.len())
            .field("duplicate_policy", &self.duplicate_policy)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Removes a serving connection from its table when the loop ends, however
/// it ends.
struct ConnectionGuard {
    endpoint: Arc<Endpoint>,
    conn_id: ConnId,
    serial: u64,
    sink: SharedSink,
    armed: bool,
}

impl ConnectionGuard {
    /// Remove our own entry. An entry that replaced ours is left alone.
    fn detach(&self) -> bool {
        self.endpoint
            .connections
            .remove_if(&self.conn_id, |_, entry| entry.serial == self.serial)
            .is_some()
    }

    async fn release(mut self, reason: DisconnectReason) {
        self.armed = false;
        let removed = self.detach();
        close_sink(&self.endpoint.path, &self.conn_id, &self.sink).await;
        let reason = if removed { reason } else { DisconnectReason::Evicted };
        self.endpoint.disconnected(&self.conn_id, reason);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.detach();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let sink = self.sink.clone();
            let path = self.endpoint.path.clone();
            let conn_id = self.conn_id.clone();
            handle.spawn(async move { close_sink(&path, &conn_id, &sink).await });
        }
        self.endpoint
            .disconnected(&self.conn_id, DisconnectReason::Aborted);
    }
}
