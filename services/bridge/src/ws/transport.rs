//! A uniform duplex message link over either side of a bridge session.
//!
//! The telephony side is an axum server socket and the agent side is a
//! tokio-tungstenite client socket. Both are adapted to [`Link`] so the session
//! loop handles them identically.

use anyhow::{Result, bail};
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{WebSocketStream, tungstenite::Message as WsMessage};
use tracing::trace;

/// A transport-neutral WebSocket message. Pings and pongs are handled by the
/// socket libraries and never surface here.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
    Close,
}

type BoxSink = Pin<Box<dyn Sink<WireMessage, Error = anyhow::Error> + Send>>;
type BoxStream = Pin<Box<dyn Stream<Item = Result<WireMessage>> + Send>>;

pub struct Link {
    name: &'static str,
    tx: BoxSink,
    rx: BoxStream,
    closed: bool,
}

impl Link {
    pub fn new<S, R>(name: &'static str, sink: S, stream: R) -> Self
    where
        S: Sink<WireMessage, Error = anyhow::Error> + Send + 'static,
        R: Stream<Item = Result<WireMessage>> + Send + 'static,
    {
        Self {
            name,
            tx: Box::pin(sink),
            rx: Box::pin(stream),
            closed: false,
        }
    }

    /// Wraps an accepted axum socket.
    pub fn from_axum(name: &'static str, socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(anyhow::Error::from)
            .with(|msg: WireMessage| async move {
                Ok::<_, anyhow::Error>(match msg {
                    WireMessage::Text(text) => Message::Text(text.into()),
                    WireMessage::Binary(data) => Message::Binary(data),
                    WireMessage::Close => Message::Close(None),
                })
            });
        let stream = stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(WireMessage::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(data)) => Some(Ok(WireMessage::Binary(data))),
                Ok(Message::Close(_)) => Some(Ok(WireMessage::Close)),
                Ok(Message::Ping(_) | Message::Pong(_)) => None,
                Err(e) => Some(Err(anyhow::Error::from(e))),
            }
        });
        Self::new(name, sink, stream)
    }

    /// Wraps an established tokio-tungstenite client connection.
    pub fn from_tungstenite<S>(name: &'static str, socket: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(anyhow::Error::from)
            .with(|msg: WireMessage| async move {
                Ok::<_, anyhow::Error>(match msg {
                    WireMessage::Text(text) => WsMessage::Text(text.into()),
                    WireMessage::Binary(data) => WsMessage::Binary(data),
                    WireMessage::Close => WsMessage::Close(None),
                })
            });
        let stream = stream.filter_map(|msg| async move {
            match msg {
                Ok(WsMessage::Text(text)) => Some(Ok(WireMessage::Text(text.as_str().to_owned()))),
                Ok(WsMessage::Binary(data)) => Some(Ok(WireMessage::Binary(data))),
                Ok(WsMessage::Close(_)) => Some(Ok(WireMessage::Close)),
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => None,
                Err(e) => Some(Err(anyhow::Error::from(e))),
            }
        });
        Self::new(name, sink, stream)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn send(&mut self, msg: WireMessage) -> Result<()> {
        if self.closed {
            bail!("{} link is closed", self.name);
        }
        self.tx.send(msg).await
    }

    /// Next inbound message; `None` once the peer has gone or we closed.
    pub async fn next(&mut self) -> Option<Result<WireMessage>> {
        if self.closed {
            return None;
        }
        self.rx.next().await
    }

    /// Sends a close frame and shuts the sink. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // The peer may already be gone; that is fine.
        if let Err(e) = self.tx.send(WireMessage::Close).await {
            trace!(link = self.name, error = %e, "Close frame not delivered");
        }
        let _ = self.tx.close().await;
    }
}

/// Two in-memory links wired back to back.
#[cfg(test)]
pub(crate) fn pair(near: &'static str, far: &'static str) -> (Link, Link) {
    use futures::channel::mpsc;

    let (near_tx, far_rx) = mpsc::unbounded::<WireMessage>();
    let (far_tx, near_rx) = mpsc::unbounded::<WireMessage>();
    (
        Link::new(near, near_tx.sink_map_err(anyhow::Error::from), near_rx.map(Ok)),
        Link::new(far, far_tx.sink_map_err(anyhow::Error::from), far_rx.map(Ok)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (mut a, mut b) = pair("a", "b");
        a.send(WireMessage::Text("one".to_string())).await.unwrap();
        a.send(WireMessage::Binary(Bytes::from_static(&[1, 2])))
            .await
            .unwrap();

        assert_eq!(
            b.next().await.unwrap().unwrap(),
            WireMessage::Text("one".to_string())
        );
        assert_eq!(
            b.next().await.unwrap().unwrap(),
            WireMessage::Binary(Bytes::from_static(&[1, 2]))
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_visible_to_peer() {
        let (mut a, mut b) = pair("a", "b");
        a.close().await;
        a.close().await;
        assert!(a.is_closed());
        assert!(a.send(WireMessage::Close).await.is_err());
        assert!(a.next().await.is_none());

        assert_eq!(b.next().await.unwrap().unwrap(), WireMessage::Close);
        assert!(b.next().await.is_none());
    }
}
