//! Application layer - room session orchestration.
//!
//! The `RoomSession` event loop is the only writer of a room's presence
//! registry and message log; consumers observe it through the
//! `RoomSnapshot` watch on its handle.

mod room_session;
mod snapshot;

pub use room_session::{RoomIdentity, RoomSession, RoomSessionHandle};
pub use snapshot::RoomSnapshot;
