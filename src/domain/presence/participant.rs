//! Participant records and wire-facing presence payloads.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{ParticipantId, Timestamp};

/// Ephemeral state a participant advertises to the room.
///
/// This is what travels over the channel in `presence-update` events and
/// inside `presence-sync` snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceState {
    pub display_name: String,
    pub is_typing: bool,
}

impl PresenceState {
    /// Creates an online, not-typing state.
    pub fn online(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            is_typing: false,
        }
    }

    /// Returns a copy with the typing flag set.
    pub fn with_typing(mut self, is_typing: bool) -> Self {
        self.is_typing = is_typing;
        self
    }
}

/// One participant's presence as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub participant_id: ParticipantId,
    #[serde(flatten)]
    pub state: PresenceState,
}

impl PresenceEntry {
    /// Creates a presence entry for a participant.
    pub fn new(participant_id: ParticipantId, state: PresenceState) -> Self {
        Self {
            participant_id,
            state,
        }
    }
}

/// A participant as tracked by the local presence registry.
///
/// Unique per (room, participant id). Created on the first presence event
/// referencing the id, updated on every subsequent event, removed when a
/// snapshot no longer lists it or when the liveness window lapses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub is_typing: bool,
    pub last_seen_at: Timestamp,

    /// When the current typing streak started; drives auto-expiry.
    #[serde(skip)]
    pub(crate) typing_since: Option<Timestamp>,
}

impl Participant {
    /// Creates a participant record from a wire entry, stamped with the
    /// local arrival time.
    pub fn from_entry(entry: PresenceEntry, seen_at: Timestamp) -> Self {
        let typing_since = entry.state.is_typing.then_some(seen_at);
        Self {
            participant_id: entry.participant_id,
            display_name: entry.state.display_name,
            is_typing: entry.state.is_typing,
            last_seen_at: seen_at,
            typing_since,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::new(s).unwrap()
    }

    #[test]
    fn from_entry_stamps_arrival_time() {
        let now = Timestamp::now();
        let entry = PresenceEntry::new(pid("a"), PresenceState::online("Ada"));
        let participant = Participant::from_entry(entry, now);

        assert_eq!(participant.last_seen_at, now);
        assert!(!participant.is_typing);
        assert!(participant.typing_since.is_none());
    }

    #[test]
    fn from_entry_records_typing_start() {
        let now = Timestamp::now();
        let entry = PresenceEntry::new(pid("a"), PresenceState::online("Ada").with_typing(true));
        let participant = Participant::from_entry(entry, now);

        assert!(participant.is_typing);
        assert_eq!(participant.typing_since, Some(now));
    }

    #[test]
    fn presence_entry_serializes_flat() {
        let entry = PresenceEntry::new(pid("a"), PresenceState::online("Ada"));
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["participantId"], "a");
        assert_eq!(json["displayName"], "Ada");
        assert_eq!(json["isTyping"], false);
    }
}
