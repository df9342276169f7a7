//! Presence domain: who is in a room and what they are doing.

mod participant;
mod registry;

pub use participant::{Participant, PresenceEntry, PresenceState};
pub use registry::PresenceRegistry;
