//! Line transports.
//!
//! The connection driver speaks lines; this trait papers over the
//! difference between a CRLF-framed byte stream (plain TCP or TLS) and a
//! WebSocket whose text frames may carry several `\n`-separated lines.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use munin_proto::LineCodec;
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tokio_util::codec::Framed;

/// One line in, one line out.
#[async_trait]
pub trait LineTransport: Send {
    /// Next inbound line; `None` when the peer is gone.
    async fn next_line(&mut self) -> Option<Result<String, std::io::Error>>;
    /// Write one line (framing added by the transport).
    async fn send_line(&mut self, line: &str) -> Result<(), std::io::Error>;
    /// Flush and close.
    async fn shutdown(&mut self);
}

/// CRLF framing over any byte stream.
pub struct FramedTransport<S> {
    inner: Framed<S, LineCodec>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> FramedTransport<S> {
    pub fn new(stream: S, codec: LineCodec) -> Self {
        FramedTransport {
            inner: Framed::new(stream, codec),
        }
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> LineTransport for FramedTransport<S> {
    async fn next_line(&mut self) -> Option<Result<String, std::io::Error>> {
        self.inner.next().await
    }

    async fn send_line(&mut self, line: &str) -> Result<(), std::io::Error> {
        self.inner.send(line.to_string()).await
    }

    async fn shutdown(&mut self) {
        let _ = self.inner.flush().await;
        let _ = self.inner.close().await;
    }
}

/// WebSocket text frames; binary frames are ignored.
pub struct WsTransport<S> {
    inner: WebSocketStream<S>,
    /// Lines from a multi-line frame not yet consumed.
    pending: VecDeque<String>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> WsTransport<S> {
    pub fn new(stream: WebSocketStream<S>) -> Self {
        WsTransport {
            inner: stream,
            pending: VecDeque::new(),
        }
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> LineTransport for WsTransport<S> {
    async fn next_line(&mut self) -> Option<Result<String, std::io::Error>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(Ok(line));
            }
            match self.inner.next().await? {
                Ok(WsMessage::Text(text)) => {
                    for line in text.split('\n') {
                        let line = line.trim_end_matches('\r');
                        if !line.is_empty() {
                            self.pending.push_back(line.to_string());
                        }
                    }
                }
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Binary(_)) => {}
                Ok(WsMessage::Close(_)) | Ok(WsMessage::Frame(_)) => return None,
                Err(e) => {
                    return Some(Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )))
                }
            }
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<(), std::io::Error> {
        self.inner
            .send(WsMessage::Text(line.to_string()))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
    }

    async fn shutdown(&mut self) {
        let _ = self.inner.close(None).await;
    }
}
