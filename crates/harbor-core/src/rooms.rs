//! Room membership index.
//!
//! Rooms exist implicitly: a room is a non-empty entry in the index, and
//! the entry is deleted the moment its last member leaves. The index
//! never owns sessions; members are session-id keys into the hub
//! registry.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::hub::SessionId;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 128;

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room name contains invalid characters");
    }
    Ok(())
}

/// Mapping of room names to member sessions, with a reverse map so a
/// member's current room is always consistent with its presence in that
/// room's set.
#[derive(Debug, Default)]
pub struct RoomIndex {
    rooms: HashMap<String, HashSet<SessionId>>,
    member_rooms: HashMap<SessionId, String>,
}

impl RoomIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a session into a room, leaving any prior room first.
    ///
    /// Returns the room the session left, if any.
    pub fn join(&mut self, session_id: &SessionId, room: &str) -> Option<String> {
        let prior = self.leave(session_id);

        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(session_id.clone());
        self.member_rooms
            .insert(session_id.clone(), room.to_string());

        debug!(session = %session_id, room = %room, "Joined room");
        prior
    }

    /// Remove a session from its current room, deleting the room entry
    /// if it empties.
    ///
    /// Returns the room left, if the session was in one.
    pub fn leave(&mut self, session_id: &SessionId) -> Option<String> {
        let room = self.member_rooms.remove(session_id)?;

        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(session_id);
            if members.is_empty() {
                self.rooms.remove(&room);
                debug!(room = %room, "Deleted empty room");
            }
        }

        debug!(session = %session_id, room = %room, "Left room");
        Some(room)
    }

    /// Get the room a session is currently in.
    #[must_use]
    pub fn room_of(&self, session_id: &SessionId) -> Option<&str> {
        self.member_rooms.get(session_id).map(String::as_str)
    }

    /// Get a snapshot of the member session ids of a room.
    ///
    /// Always a copy, never a live view: callers iterate it while
    /// mutating the index (evicting slow members mid-broadcast).
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<SessionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check if a room exists (has at least one member).
    #[must_use]
    pub fn contains_room(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Get the number of member sessions of a room.
    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, HashSet::len)
    }

    /// Get the number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Get all room names.
    #[must_use]
    pub fn room_names(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    /// Remove every membership.
    pub fn clear(&mut self) {
        self.rooms.clear();
        self.member_rooms.clear();
    }
}
