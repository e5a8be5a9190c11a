//! # harbor-core
//!
//! Session registry, room index, and message routing for the harbor
//! realtime hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Mailbox** - Bounded per-session outbound queue
//! - **RoomIndex** - Room name to member-session mapping
//! - **Hub** - Session registry and dispatch state machine
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│     Hub     │────▶│  RoomIndex  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │   Mailbox   │ (one per session)
//!                     └─────────────┘
//! ```
//!
//! The hub guards the registry and the room index as one unit of state
//! behind a single reader/writer lock. Fan-out never blocks: a full
//! mailbox gets its session evicted instead.

pub mod hub;
pub mod mailbox;
pub mod rooms;

pub use hub::{Hub, HubError, HubStats, SessionHandle, SessionId};
pub use mailbox::{mailbox, Mailbox, MailboxError, Outbox, DEFAULT_MAILBOX_CAPACITY};
pub use rooms::{validate_room_name, RoomIndex, MAX_ROOM_NAME_LENGTH};
