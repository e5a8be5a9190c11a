//! The hub: session registry and message routing.
//!
//! The hub owns every live session handle and the room index, guarded
//! together behind one reader/writer lock. All mutating operations
//! (register, unregister, dispatch, broadcasts — a broadcast may evict a
//! stalled session) take the write lock; pure lookups take the read
//! lock. There is no hub task: every operation runs synchronously on
//! the caller's task, and none of them blocks on a consumer.

use crate::mailbox::{Mailbox, MailboxError};
use crate::rooms::{validate_room_name, RoomIndex};
use harbor_protocol::{now_unix, Envelope, MsgKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a session ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh session ID.
    #[must_use]
    pub fn generate() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Self(format!("sess_{timestamp:x}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// No registered session with the given ID.
    #[error("No such session: {0}")]
    NoSuchSession(String),

    /// Target session's mailbox is at capacity.
    #[error("Mailbox full for session: {0}")]
    MailboxFull(String),

    /// Target session's mailbox has been closed.
    #[error("Mailbox closed for session: {0}")]
    MailboxClosed(String),
}

/// The hub's view of one registered session.
///
/// The handle carries the authenticated identity and the sending half
/// of the session's mailbox. The session's transport and outbox are
/// never reachable through here; all cross-session traffic goes through
/// [`Mailbox::enqueue`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Unique session ID.
    pub id: SessionId,
    /// Authenticated user ID.
    pub user_id: String,
    /// Authenticated display name.
    pub username: String,
    /// Current room, if any.
    pub room: Option<String>,
    /// Outbound mailbox.
    pub mailbox: Mailbox,
}

impl SessionHandle {
    /// Create a new session handle.
    #[must_use]
    pub fn new(
        id: SessionId,
        user_id: impl Into<String>,
        username: impl Into<String>,
        room: Option<String>,
        mailbox: Mailbox,
    ) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            username: username.into(),
            room,
            mailbox,
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Number of registered sessions.
    pub sessions: usize,
    /// Number of live rooms.
    pub rooms: usize,
    /// Sessions evicted for a stalled mailbox since startup.
    pub evictions: u64,
}

/// Registry plus room index, mutated only under the hub's write lock.
struct HubState {
    sessions: HashMap<SessionId, SessionHandle>,
    rooms: RoomIndex,
    evictions: u64,
}

impl HubState {
    /// Remove a session from the registry and its room.
    ///
    /// Returns the handle and the room it was in, if any.
    fn remove(&mut self, id: &SessionId) -> Option<(SessionHandle, Option<String>)> {
        let handle = self.sessions.remove(id)?;
        let room = self.rooms.leave(id);
        Some((handle, room))
    }

    /// Drop a session whose mailbox stalled. Terminal for that session;
    /// no leave notification is re-entered from inside a fan-out.
    fn evict(&mut self, id: &SessionId, reason: &MailboxError) {
        warn!(session = %id, reason = %reason, "Evicting session with stalled mailbox");
        self.remove(id);
        self.evictions += 1;
    }

    /// Enqueue onto every member of a room; evict members that cannot
    /// keep up. Returns the number of deliveries.
    fn broadcast_room(&mut self, room: &str, envelope: &Envelope) -> usize {
        let mut delivered = 0;
        let mut stalled = Vec::new();

        for id in self.rooms.members(room) {
            let Some(handle) = self.sessions.get(&id) else {
                continue;
            };
            match handle.mailbox.enqueue(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => stalled.push((id, err)),
            }
        }

        for (id, err) in stalled {
            self.evict(&id, &err);
        }

        delivered
    }

    /// Enqueue onto every registered session; evict the stalled ones.
    fn broadcast_all(&mut self, envelope: &Envelope) -> usize {
        let mut delivered = 0;
        let mut stalled = Vec::new();

        let ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        for id in ids {
            let Some(handle) = self.sessions.get(&id) else {
                continue;
            };
            match handle.mailbox.enqueue(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => stalled.push((id, err)),
            }
        }

        for (id, err) in stalled {
            self.evict(&id, &err);
        }

        delivered
    }

    /// Private delivery to one session, with the eviction policy applied
    /// on failure.
    fn reply(&mut self, id: &SessionId, envelope: Envelope) {
        let Some(handle) = self.sessions.get(id) else {
            return;
        };
        if let Err(err) = handle.mailbox.enqueue(envelope) {
            self.evict(id, &err);
        }
    }

    /// Sorted display names of a room's members.
    fn room_users(&self, room: &str) -> Vec<String> {
        let mut users: Vec<String> = self
            .rooms
            .members(room)
            .iter()
            .filter_map(|id| self.sessions.get(id))
            .map(|h| h.username.clone())
            .collect();
        users.sort();
        users
    }

    /// Sorted display names of every registered session.
    fn all_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.sessions.values().map(|h| h.username.clone()).collect();
        users.sort();
        users
    }

    /// Announce a join and the refreshed membership to a room.
    fn notify_joined(&mut self, room: &str, user_id: &str, username: &str) {
        self.broadcast_room(room, &Envelope::joined(room, user_id, username));
        let users = self.room_users(room);
        self.broadcast_room(room, &Envelope::user_list(room, users));
    }

    /// Announce a leave and the refreshed membership to a room.
    fn notify_left(&mut self, room: &str, user_id: &str, username: &str) {
        self.broadcast_room(room, &Envelope::left(room, user_id, username));
        let users = self.room_users(room);
        self.broadcast_room(room, &Envelope::user_list(room, users));
    }
}

/// The central session registry and router.
pub struct Hub {
    state: RwLock<HubState>,
}

impl Hub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HubState {
                sessions: HashMap::new(),
                rooms: RoomIndex::new(),
                evictions: 0,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HubState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HubState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a session.
    ///
    /// Identity resolution and room validation are preconditions handled
    /// by the lifecycle controller; registration itself always succeeds.
    /// The new session gets a private welcome, and its room (if any)
    /// gets a `join` notification followed by a refreshed `user_list`.
    pub fn register(&self, handle: SessionHandle) {
        let mut state = self.write();

        let id = handle.id.clone();
        let user_id = handle.user_id.clone();
        let username = handle.username.clone();
        let room = handle.room.clone();

        if let Err(err) = handle.mailbox.enqueue(Envelope::welcome(id.as_str())) {
            debug!(session = %id, error = %err, "Could not deliver welcome");
        }
        state.sessions.insert(id.clone(), handle);

        if let Some(room) = room {
            state.rooms.join(&id, &room);
            state.notify_joined(&room, &user_id, &username);
        }

        info!(session = %id, user = %username, "Session registered");
    }

    /// Unregister a session.
    ///
    /// Idempotent; returns `false` if the session was not registered.
    /// If the session held a room, the room gets a `leave` notification
    /// and a refreshed `user_list`. Dropping the handle closes the
    /// mailbox, which lets the session's write loop flush out and end.
    pub fn unregister(&self, id: &SessionId) -> bool {
        let mut state = self.write();

        let Some((handle, room)) = state.remove(id) else {
            return false;
        };

        if let Some(room) = room {
            state.notify_left(&room, &handle.user_id, &handle.username);
        }

        info!(session = %id, user = %handle.username, "Session unregistered");
        true
    }

    /// Route an inbound message from a session.
    ///
    /// `origin` is the session the message arrived on; sender identity
    /// is taken from its registered handle, never from the wire. All
    /// outbound notifications carry a server-assigned timestamp.
    pub fn dispatch(&self, origin: &SessionId, envelope: Envelope) {
        let mut state = self.write();

        let (user_id, username) = match state.sessions.get(origin) {
            Some(h) => (h.user_id.clone(), h.username.clone()),
            None => {
                debug!(session = %origin, "Dispatch from unregistered session");
                return;
            }
        };

        match envelope.kind {
            MsgKind::Join => {
                let Some(room) = envelope.room.as_deref().map(str::to_string) else {
                    state.reply(origin, Envelope::error("Join requires a room"));
                    return;
                };
                if let Err(reason) = validate_room_name(&room) {
                    state.reply(origin, Envelope::error(reason));
                    return;
                }

                state.rooms.join(origin, &room);
                if let Some(h) = state.sessions.get_mut(origin) {
                    h.room = Some(room.clone());
                }
                state.notify_joined(&room, &user_id, &username);
            }

            MsgKind::Leave => {
                if let Some(room) = state.rooms.leave(origin) {
                    if let Some(h) = state.sessions.get_mut(origin) {
                        h.room = None;
                    }
                    state.notify_left(&room, &user_id, &username);
                }
            }

            MsgKind::Message => {
                let outbound = Envelope {
                    kind: MsgKind::Message,
                    room: envelope.room,
                    content: envelope.content,
                    user_id: Some(user_id),
                    username: Some(username),
                    timestamp: Some(now_unix()),
                    data: envelope.data,
                };
                let delivered = match outbound.room.clone() {
                    Some(room) => state.broadcast_room(&room, &outbound),
                    None => state.broadcast_all(&outbound),
                };
                debug!(session = %origin, recipients = delivered, "Message routed");
            }

            MsgKind::Ping => {
                let pong = Envelope::pong(envelope.timestamp).with_sender(user_id, username);
                state.reply(origin, pong);
            }

            // Inbound pong is plain keepalive traffic; the read loop's
            // idle timer already accounted for it.
            MsgKind::Pong => {}

            other => {
                debug!(session = %origin, kind = %other, "Unknown message type");
                state.reply(
                    origin,
                    Envelope::error(format!("Unknown message type: {other}")),
                );
            }
        }
    }

    /// Fan a message out to every member of a room.
    ///
    /// The timestamp is stamped server-side. Members whose mailbox is
    /// full are evicted rather than blocking the broadcast. Returns the
    /// number of deliveries.
    pub fn broadcast_to_room(&self, room: &str, envelope: Envelope) -> usize {
        self.write().broadcast_room(room, &envelope.stamped())
    }

    /// Fan a message out to every registered session.
    pub fn broadcast_to_all(&self, envelope: Envelope) -> usize {
        self.write().broadcast_all(&envelope.stamped())
    }

    /// Point-to-point delivery to one session.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NoSuchSession`] for an unknown ID, or a
    /// mailbox condition if the message could not be enqueued. Unlike
    /// fan-out, a failed point-to-point send has no session-level
    /// effect.
    pub fn send_to_session(&self, id: &SessionId, envelope: Envelope) -> Result<(), HubError> {
        let state = self.read();
        let handle = state
            .sessions
            .get(id)
            .ok_or_else(|| HubError::NoSuchSession(id.to_string()))?;

        handle
            .mailbox
            .enqueue(envelope.stamped())
            .map_err(|err| match err {
                MailboxError::Full => HubError::MailboxFull(id.to_string()),
                MailboxError::Closed => HubError::MailboxClosed(id.to_string()),
            })
    }

    /// Display names, either for one room or for every session.
    #[must_use]
    pub fn list_users(&self, room: Option<&str>) -> Vec<String> {
        let state = self.read();
        match room {
            Some(room) => state.room_users(room),
            None => state.all_users(),
        }
    }

    /// Check whether a session is registered.
    #[must_use]
    pub fn is_registered(&self, id: &SessionId) -> bool {
        self.read().sessions.contains_key(id)
    }

    /// The room a session is currently in.
    #[must_use]
    pub fn room_of(&self, id: &SessionId) -> Option<String> {
        self.read().rooms.room_of(id).map(str::to_string)
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let state = self.read();
        HubStats {
            sessions: state.sessions.len(),
            rooms: state.rooms.room_count(),
            evictions: state.evictions,
        }
    }

    /// Drop every session handle at once.
    ///
    /// Shutdown support: closing every mailbox lets each write loop
    /// flush its buffered tail and terminate. No leave notifications
    /// are sent; there is nobody left to observe them. Returns the
    /// number of sessions drained.
    pub fn drain_all(&self) -> usize {
        let mut state = self.write();
        let drained = state.sessions.len();
        state.sessions.clear();
        state.rooms.clear();
        info!(sessions = drained, "Hub drained");
        drained
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
