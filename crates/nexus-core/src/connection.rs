//! Duplex connection abstraction.
//!
//! A connection is split into a shared write half ([`FrameSink`]), held by the
//! endpoint's table and used by every dispatch path, and an exclusively owned
//! read half ([`FrameSource`]) driven by the connection's serving loop.

use crate::error::{SendError, TransportError};
use async_trait::async_trait;
use nexus_types::Frame;
use std::sync::Arc;
use std::time::Duration;

/// Write half of a connection. Implementations serialize concurrent writers.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, frame: Frame) -> Result<(), TransportError>;

    /// Close the connection. Calling it more than once is harmless.
    async fn close(&self);
}

/// Read half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Next data frame. An orderly close by the peer is `TransportError::Closed`.
    async fn recv_frame(&mut self) -> Result<Frame, TransportError>;
}

pub type SharedSink = Arc<dyn FrameSink>;

/// Upper bound on closing a connection. A peer that stopped reading, or a
/// write stuck holding the sink, is abandoned after this long.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Write one frame, tagging any failure with its target.
pub(crate) async fn write_frame(
    endpoint_path: &str,
    conn_id: &str,
    sink: &SharedSink,
    frame: Frame,
    timeout: Option<Duration>,
) -> Result<(), SendError> {
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, sink.send_frame(frame))
            .await
            .unwrap_or_else(|_| Err(TransportError::Timeout(limit))),
        None => sink.send_frame(frame).await,
    };

    result.map_err(|source| {
        tracing::debug!(
            target: "nexus::dispatch",
            endpoint_path,
            conn_id,
            error = %source,
            "write failed"
        );
        SendError::Write {
            endpoint_path: endpoint_path.to_string(),
            conn_id: conn_id.to_string(),
            source,
        }
    })
}

/// Close `sink`, giving up after [`CLOSE_TIMEOUT`].
pub(crate) async fn close_sink(endpoint_path: &str, conn_id: &str, sink: &SharedSink) {
    if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
        tracing::warn!(
            target: "nexus::endpoint",
            endpoint_path,
            conn_id,
            "close timed out, abandoning connection"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HungSink;

    #[async_trait]
    impl FrameSink for HungSink {
        async fn send_frame(&self, _frame: Frame) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn close(&self) {
            std::future::pending::<()>().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_gives_up_on_a_hung_sink() {
        let sink: SharedSink = Arc::new(HungSink);
        let started = tokio::time::Instant::now();
        close_sink("/chat", "u1", &sink).await;
        assert!(started.elapsed() >= CLOSE_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_timeout_is_tagged_with_target() {
        let sink: SharedSink = Arc::new(HungSink);
        let err = write_frame("/chat", "u1", &sink, Frame::text("x"), Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SendError::Write { ref conn_id, source: TransportError::Timeout(_), .. } if conn_id == "u1"
        ));
    }
}
