//! # harbor-transport
//!
//! Transport abstraction for the harbor realtime hub.
//!
//! A session talks to its peer through a pair of framed halves: a
//! [`FrameReader`] feeding the read loop and a [`FrameWriter`] drained
//! by the write loop. Both halves treat any error as terminal for the
//! session; there is no resynchronization and no retry.
//!
//! The only shipped implementation rides an axum WebSocket
//! ([`websocket::split_socket`]); the traits exist so the session loops
//! can be driven by an in-memory transport in tests.

pub mod traits;
pub mod websocket;

pub use traits::{Frame, FrameReader, FrameWriter, TransportError};
pub use websocket::{split_socket, WsFrameReader, WsFrameWriter};
