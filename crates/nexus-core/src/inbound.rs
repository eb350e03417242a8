//! Inbound message channel shared by an endpoint's serving loops.

use nexus_types::InboundMessage;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Bounded channel an endpoint pushes decoded frames onto.
///
/// A full channel suspends the serving loops (and thus reads from peers)
/// until a consumer catches up.
pub struct InboundChannel {
    tx: mpsc::Sender<InboundMessage>,
    rx: InboundReceiver,
}

impl InboundChannel {
    /// Create a channel holding up to `capacity` messages (at least one).
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: InboundReceiver {
                inner: Arc::new(Mutex::new(rx)),
            },
        }
    }

    /// Receiver handle; clones compete for the same messages.
    pub fn receiver(&self) -> InboundReceiver {
        self.rx.clone()
    }

    pub(crate) fn into_parts(self) -> (mpsc::Sender<InboundMessage>, InboundReceiver) {
        (self.tx, self.rx)
    }
}

/// Consumer side of an [`InboundChannel`].
#[derive(Clone)]
pub struct InboundReceiver {
    inner: Arc<Mutex<mpsc::Receiver<InboundMessage>>>,
}

impl InboundReceiver {
    /// Wait for the next message. Returns `None` only after every sender is gone.
    pub async fn recv(&self) -> Option<InboundMessage> {
        self.inner.lock().await.recv().await
    }

    /// Next message if one is ready and no other consumer is waiting.
    pub fn try_recv(&self) -> Option<InboundMessage> {
        self.inner.try_lock().ok()?.try_recv().ok()
    }
}
