//! Envelope types for the harbor wire protocol.
//!
//! An envelope is the single message shape exchanged in both directions.
//! Optional fields are omitted from the JSON when unset.

use serde::de::{Deserializer, Error as _};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Message kind tag.
///
/// Unknown tags are preserved as [`MsgKind::Other`] so the hub can name
/// the offending type in its error reply instead of failing the decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MsgKind {
    /// Join (or switch to) a room.
    Join,
    /// Leave the current room.
    Leave,
    /// A chat message, room-scoped or global.
    Message,
    /// Keepalive request.
    Ping,
    /// Keepalive reply.
    Pong,
    /// Error report, always private to one session.
    Error,
    /// Room membership snapshot, carried in `data`.
    UserList,
    /// Any tag this version does not recognize.
    Other(String),
}

impl MsgKind {
    /// Get the wire tag for this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            MsgKind::Join => "join",
            MsgKind::Leave => "leave",
            MsgKind::Message => "message",
            MsgKind::Ping => "ping",
            MsgKind::Pong => "pong",
            MsgKind::Error => "error",
            MsgKind::UserList => "user_list",
            MsgKind::Other(tag) => tag,
        }
    }
}

impl From<&str> for MsgKind {
    fn from(tag: &str) -> Self {
        match tag {
            "join" => MsgKind::Join,
            "leave" => MsgKind::Leave,
            "message" => MsgKind::Message,
            "ping" => MsgKind::Ping,
            "pong" => MsgKind::Pong,
            "error" => MsgKind::Error,
            "user_list" => MsgKind::UserList,
            other => MsgKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MsgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MsgKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MsgKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        if tag.is_empty() {
            return Err(D::Error::custom("message type cannot be empty"));
        }
        Ok(MsgKind::from(tag.as_str()))
    }
}

/// Current unix time in seconds.
#[must_use]
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A wire message.
///
/// Envelopes are immutable values: the hub never mutates one after
/// construction, it builds fresh ones and fans them out by clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MsgKind,

    /// Target or source room.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub room: Option<String>,

    /// Text payload.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content: Option<String>,

    /// Sender's user id.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,

    /// Sender's display name.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub username: Option<String>,

    /// Unix seconds, assigned by the server on outbound messages.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<i64>,

    /// Structured payload, e.g. the username list for `user_list`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<serde_json::Value>,
}

impl Envelope {
    /// Create an empty envelope of the given kind.
    #[must_use]
    pub fn new(kind: MsgKind) -> Self {
        Self {
            kind,
            room: None,
            content: None,
            user_id: None,
            username: None,
            timestamp: None,
            data: None,
        }
    }

    /// Set the room.
    #[must_use]
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    /// Set the text content.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Set the sender identity.
    #[must_use]
    pub fn with_sender(mut self, user_id: impl Into<String>, username: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.username = Some(username.into());
        self
    }

    /// Set the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the structured data payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Stamp the envelope with the current server time.
    #[must_use]
    pub fn stamped(self) -> Self {
        let now = now_unix();
        self.with_timestamp(now)
    }

    /// Private welcome sent to a freshly registered session.
    #[must_use]
    pub fn welcome(session_id: &str) -> Self {
        Envelope::new(MsgKind::Message)
            .with_sender("system", "System")
            .with_content(format!("Welcome! Your session id: {session_id}"))
            .stamped()
    }

    /// Room notification that a user joined.
    #[must_use]
    pub fn joined(room: &str, user_id: &str, username: &str) -> Self {
        Envelope::new(MsgKind::Join)
            .with_room(room)
            .with_sender(user_id, username)
            .with_content(format!("{username} joined the room"))
            .stamped()
    }

    /// Room notification that a user left.
    #[must_use]
    pub fn left(room: &str, user_id: &str, username: &str) -> Self {
        Envelope::new(MsgKind::Leave)
            .with_room(room)
            .with_sender(user_id, username)
            .with_content(format!("{username} left the room"))
            .stamped()
    }

    /// Membership snapshot for a room.
    #[must_use]
    pub fn user_list(room: &str, usernames: Vec<String>) -> Self {
        Envelope::new(MsgKind::UserList)
            .with_room(room)
            .with_data(serde_json::Value::from(usernames))
            .stamped()
    }

    /// Keepalive reply echoing the inbound timestamp.
    #[must_use]
    pub fn pong(timestamp: Option<i64>) -> Self {
        let mut env = Envelope::new(MsgKind::Pong);
        env.timestamp = timestamp;
        env
    }

    /// Private error report.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Envelope::new(MsgKind::Error)
            .with_content(message)
            .stamped()
    }
}
