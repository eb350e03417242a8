//! axum WebSocket adapter for the connection abstraction.

use crate::connection::{FrameSink, FrameSource, SharedSink};
use crate::error::TransportError;
use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use nexus_types::{Frame, MessageKind};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Split an upgraded socket into the halves an endpoint serves.
pub fn split(socket: WebSocket) -> (SharedSink, Box<dyn FrameSource>) {
    let (tx, rx) = socket.split();
    (
        Arc::new(WsSink {
            inner: Mutex::new(tx),
        }),
        Box::new(WsSource { inner: rx }),
    )
}

struct WsSink {
    inner: Mutex<SplitSink<WebSocket, WsMessage>>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        let message = to_ws_message(frame)?;
        self.inner.lock().await.send(message).await?;
        Ok(())
    }

    async fn close(&self) {
        let mut sink = self.inner.lock().await;
        // Either call fails once the socket is already gone.
        let _ = sink.send(WsMessage::Close(None)).await;
        let _ = sink.close().await;
    }
}

struct WsSource {
    inner: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn recv_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            match self.inner.next().await {
                None | Some(Ok(WsMessage::Close(_))) => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(TransportError::Socket(e)),
                Some(Ok(message)) => {
                    if let Some(frame) = from_ws_message(message) {
                        return Ok(frame);
                    }
                    tracing::trace!(target: "nexus::ws::ping", "control frame");
                }
            }
        }
    }
}

fn to_ws_message(frame: Frame) -> Result<WsMessage, TransportError> {
    match frame.kind {
        MessageKind::Text => {
            let text =
                String::from_utf8(frame.payload.to_vec()).map_err(|_| TransportError::InvalidUtf8)?;
            Ok(WsMessage::Text(text.into()))
        }
        MessageKind::Binary => Ok(WsMessage::Binary(frame.payload)),
    }
}

/// Data frames only; ping/pong/close yield `None`.
fn from_ws_message(message: WsMessage) -> Option<Frame> {
    match message {
        WsMessage::Text(text) => Some(Frame::text(text.as_str())),
        WsMessage::Binary(data) => Some(Frame::binary(data)),
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) => None,
    }
}
