//! Background consumers for inbound traffic and connection events.

use crate::state::AppState;
use nexus_core::{
    ConnectionEvent, DisconnectReason, InboundMessage, InboundReceiver, Manager, Message,
};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Spawn an inbound consumer and an event logger for every endpoint.
pub fn spawn_workers(state: &Arc<AppState>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    for settings in &state.config.endpoints {
        let (Ok(inbound), Ok(events)) = (
            state.manager.inbound(&settings.path),
            state.manager.subscribe(&settings.path),
        ) else {
            warn!(target: "nexus::startup", path = %settings.path, "configured endpoint is not registered");
            continue;
        };

        handles.push(tokio::spawn(consume(
            state.manager.clone(),
            inbound,
            settings.echo,
            cancel.clone(),
        )));
        handles.push(tokio::spawn(log_events(events, cancel.clone())));
    }

    handles
}

/// Drain an endpoint's inbound channel until cancelled, optionally echoing
/// each message back to its sender.
pub async fn consume(
    manager: Arc<Manager>,
    inbound: InboundReceiver,
    echo: bool,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = inbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        debug!(
            target: "nexus::inbound",
            endpoint_path = %message.endpoint_path,
            conn_id = %message.conn_id,
            kind = %message.kind,
            len = message.payload.len(),
            "message received"
        );

        if echo {
            send_echo(&manager, &message).await;
        }
    }
}

async fn send_echo(manager: &Manager, message: &InboundMessage) {
    let reply = Message::new(
        message.endpoint_path.clone(),
        message.conn_id.clone(),
        message.payload.clone(),
    )
    .with_kind(message.kind);

    if let Err(e) = manager.send(&reply).await {
        warn!(target: "nexus::inbound", conn_id = %message.conn_id, error = %e, "echo failed");
    }
}

/// Log connection lifecycle events until cancelled.
pub async fn log_events(mut events: broadcast::Receiver<ConnectionEvent>, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(ConnectionEvent::Disconnected {
                endpoint_path,
                conn_id,
                reason: reason @ (DisconnectReason::ReadError(_) | DisconnectReason::Aborted),
                ..
            }) => {
                warn!(target: "nexus::events", %endpoint_path, %conn_id, ?reason, "unexpected connection loss");
            }
            Ok(ConnectionEvent::Rejected {
                endpoint_path,
                conn_id,
                reason,
                ..
            }) => {
                info!(target: "nexus::events", %endpoint_path, %conn_id, ?reason, "connection rejected");
            }
            Ok(event) => {
                debug!(target: "nexus::events", endpoint_path = %event.endpoint_path(), conn_id = %event.conn_id(), "{:?}", event);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(target: "nexus::events", skipped, "event logger fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
