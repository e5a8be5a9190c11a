//! # harbor-protocol
//!
//! Wire message definitions for the harbor realtime hub.
//!
//! Messages are JSON objects exchanged over a framed transport. Every
//! message is an [`Envelope`] carrying a [`MsgKind`] tag plus optional
//! room, content, sender, timestamp, and structured-data fields.
//!
//! The hub stamps `timestamp` server-side on everything it sends out;
//! client-supplied timestamps are only echoed back on `pong` replies.

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError};
pub use envelope::{now_unix, Envelope, MsgKind};
