//! Transport traits for harbor sessions.
//!
//! The read and write halves are separate traits because a session runs
//! them on two independent tasks for the lifetime of the connection.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport errors. Every variant is fatal to the session it occurs on.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    Closed,

    /// A write did not complete within its deadline.
    #[error("Write timed out")]
    Timeout,

    /// Inbound frame exceeds the configured cap.
    #[error("Frame size {len} exceeds maximum {max}")]
    Oversized { len: usize, max: usize },

    /// WebSocket-level failure.
    #[error("WebSocket error: {0}")]
    Ws(#[from] axum::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single inbound transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete data frame.
    Data(Bytes),
    /// Protocol-level keepalive. Carries no payload for the session,
    /// but counts as inbound activity for idle tracking.
    Keepalive,
}

/// Inbound half of a session's transport.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next inbound event.
    ///
    /// Returns `Ok(None)` on a clean close. Protocol-level keepalive
    /// traffic surfaces as [`Frame::Keepalive`] so the caller's idle
    /// timer observes it.
    ///
    /// # Errors
    ///
    /// Any error is terminal for the session.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;
}

/// Outbound half of a session's transport.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send one frame, bounded by the writer's per-write deadline.
    ///
    /// # Errors
    ///
    /// A timeout or write failure is terminal for the session; callers
    /// must not retry.
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Close the connection. Idempotent best-effort.
    async fn close(&mut self);
}
