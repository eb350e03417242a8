//! In-process connections.
//!
//! [`pair`] builds a connection whose far end is a [`LocalPeer`] in the same
//! process. Useful for bridging in-process producers into an endpoint and for
//! exercising endpoints without sockets.

use crate::connection::{FrameSink, FrameSource, SharedSink};
use crate::error::TransportError;
use async_trait::async_trait;
use nexus_types::Frame;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Create an in-process connection.
///
/// Returns the peer side plus the sink and source halves to hand to an
/// endpoint. Writes to the sink fail with [`TransportError::Closed`] once the
/// peer is dropped.
pub fn pair() -> (LocalPeer, SharedSink, Box<dyn FrameSource>) {
    let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
    let (from_peer_tx, from_peer_rx) = mpsc::unbounded_channel();

    let peer = LocalPeer {
        outgoing: Some(from_peer_tx),
        incoming: to_peer_rx,
    };
    let sink = Arc::new(LocalSink {
        tx: Mutex::new(Some(to_peer_tx)),
    });
    let source = Box::new(LocalSource { rx: from_peer_rx });

    (peer, sink, source)
}

/// Far end of an in-process connection.
pub struct LocalPeer {
    outgoing: Option<mpsc::UnboundedSender<Result<Frame, TransportError>>>,
    incoming: mpsc::UnboundedReceiver<Frame>,
}

impl LocalPeer {
    /// Send a frame towards the endpoint.
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.deliver(Ok(frame))
    }

    /// Make the endpoint's next read fail with `error`.
    pub fn fail_read(&self, error: TransportError) -> Result<(), TransportError> {
        self.deliver(Err(error))
    }

    fn deliver(&self, item: Result<Frame, TransportError>) -> Result<(), TransportError> {
        self.outgoing
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send(item)
            .map_err(|_| TransportError::Closed)
    }

    /// Close the peer's write direction; the endpoint reads `Closed` next.
    pub fn hang_up(&mut self) {
        self.outgoing = None;
    }

    /// Next frame written by the endpoint, or `None` once the endpoint
    /// closed the connection and every frame has been drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.incoming.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        self.incoming.try_recv().ok()
    }
}

struct LocalSink {
    tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

#[async_trait]
impl FrameSink for LocalSink {
    async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        match self.tx.lock().await.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&self) {
        self.tx.lock().await.take();
    }
}

struct LocalSource {
    rx: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
}

#[async_trait]
impl FrameSource for LocalSource {
    async fn recv_frame(&mut self) -> Result<Frame, TransportError> {
        self.rx.recv().await.unwrap_or(Err(TransportError::Closed))
    }
}
