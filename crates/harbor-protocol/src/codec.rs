//! JSON codec for harbor envelopes.
//!
//! The transport delivers whole frames, so no length prefixing or
//! resynchronization happens here: one frame is one JSON envelope.
//! Anything else is a protocol error, fatal to the session per the
//! hub's error taxonomy.

use bytes::Bytes;
use thiserror::Error;

use crate::envelope::Envelope;

/// Default cap on inbound frame size in bytes.
pub const DEFAULT_MAX_INBOUND_SIZE: usize = 512;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Inbound frame exceeds the configured cap.
    #[error("Frame size {len} exceeds maximum {max}")]
    Oversized { len: usize, max: usize },

    /// JSON encoding/decoding error.
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encode an envelope to a JSON frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(envelope)?;
    Ok(Bytes::from(payload))
}

/// Decode an envelope from a JSON frame.
///
/// # Errors
///
/// Returns an error if the frame exceeds `max_size` or is not a valid
/// envelope.
pub fn decode(data: &[u8], max_size: usize) -> Result<Envelope, ProtocolError> {
    if data.len() > max_size {
        return Err(ProtocolError::Oversized {
            len: data.len(),
            max: max_size,
        });
    }

    let envelope = serde_json::from_slice(data)?;
    Ok(envelope)
}
