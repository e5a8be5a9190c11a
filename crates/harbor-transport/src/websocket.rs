//! WebSocket transport over an upgraded axum socket.
//!
//! The host's HTTP layer performs the upgrade; this module wraps the
//! resulting socket into the framed reader/writer pair the session
//! loops consume. Inbound frames are size-capped, outbound writes carry
//! a fixed deadline.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tracing::{debug, warn};

use crate::traits::{Frame, FrameReader, FrameWriter, TransportError};

/// Split an upgraded socket into the session's transport halves.
#[must_use]
pub fn split_socket(
    socket: WebSocket,
    max_inbound_size: usize,
    write_timeout: Duration,
) -> (WsFrameReader, WsFrameWriter) {
    let (sink, stream) = socket.split();
    (
        WsFrameReader {
            stream,
            max_inbound_size,
        },
        WsFrameWriter {
            sink,
            write_timeout,
        },
    )
}

/// Inbound half of a WebSocket session transport.
pub struct WsFrameReader {
    stream: SplitStream<WebSocket>,
    max_inbound_size: usize,
}

#[async_trait]
impl FrameReader for WsFrameReader {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => {
                if text.len() > self.max_inbound_size {
                    return Err(TransportError::Oversized {
                        len: text.len(),
                        max: self.max_inbound_size,
                    });
                }
                Ok(Some(Frame::Data(Bytes::from(text.into_bytes()))))
            }
            Some(Ok(Message::Binary(data))) => {
                if data.len() > self.max_inbound_size {
                    return Err(TransportError::Oversized {
                        len: data.len(),
                        max: self.max_inbound_size,
                    });
                }
                Ok(Some(Frame::Data(Bytes::from(data))))
            }
            // axum answers pings itself; both directions of keepalive
            // surface as activity so the idle timer sees them.
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => Ok(Some(Frame::Keepalive)),
            Some(Ok(Message::Close(_))) => {
                debug!("Received close frame");
                Ok(None)
            }
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket receive error");
                Err(TransportError::Ws(e))
            }
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }
}

/// Outbound half of a WebSocket session transport.
pub struct WsFrameWriter {
    sink: SplitSink<WebSocket, Message>,
    write_timeout: Duration,
}

#[async_trait]
impl FrameWriter for WsFrameWriter {
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
        // The wire format is JSON, so frames go out as text.
        let text = String::from_utf8(data.to_vec())
            .map_err(|e| TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        match tokio::time::timeout(self.write_timeout, self.sink.send(Message::Text(text))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(error = %e, "WebSocket send error");
                Err(TransportError::Ws(e))
            }
            Err(_) => {
                warn!(timeout = ?self.write_timeout, "WebSocket write deadline exceeded");
                Err(TransportError::Timeout)
            }
        }
    }

    async fn close(&mut self) {
        // Best effort; the peer may already be gone.
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}
