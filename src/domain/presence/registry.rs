//! Per-room presence registry.
//!
//! Rebuilt from full snapshots and incremental updates. Presence is
//! advisory, not authoritative, so reconciliation is last-write-wins by
//! arrival order with no vector clocks.
//!
//! The registry is pure state: it never performs I/O and is mutated only
//! by its owning session's event loop, which keeps all updates for one
//! room serialized.

use std::collections::HashMap;
use std::time::Duration;

use crate::domain::foundation::{ParticipantId, Timestamp};

use super::participant::{Participant, PresenceEntry};

/// Number of missed heartbeats before a participant is considered gone.
///
/// A tab that crashes without a graceful leave stops refreshing its entry;
/// after two full heartbeat intervals with no update the entry is evicted
/// locally.
const LIVENESS_MULTIPLIER: u32 = 2;

/// Local view of who is in a room and what they are doing.
pub struct PresenceRegistry {
    entries: HashMap<ParticipantId, Participant>,
    heartbeat_interval: Duration,
    typing_quiet_period: Duration,
}

impl PresenceRegistry {
    /// Creates an empty registry.
    ///
    /// # Arguments
    ///
    /// * `heartbeat_interval` - Expected cadence of presence refreshes.
    /// * `typing_quiet_period` - How long a typing flag survives without a
    ///   fresh typing heartbeat.
    pub fn new(heartbeat_interval: Duration, typing_quiet_period: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            heartbeat_interval,
            typing_quiet_period,
        }
    }

    /// Seeds or resynchronizes the registry from a full snapshot.
    ///
    /// Participants absent from the snapshot are removed (graceful leave).
    /// Returns true if the visible participant set or any state changed.
    pub fn apply_snapshot(&mut self, snapshot: Vec<PresenceEntry>, now: Timestamp) -> bool {
        let mut next: HashMap<ParticipantId, Participant> = HashMap::with_capacity(snapshot.len());
        for entry in snapshot {
            // Within one snapshot the last entry for an id wins, matching
            // the arrival-order rule for incremental updates.
            let id = entry.participant_id.clone();
            let mut participant = Participant::from_entry(entry, now);
            if let Some(previous) = self.entries.get(&id) {
                // Keep the original typing start so a snapshot cannot
                // extend a stuck typing indicator forever.
                if participant.is_typing && previous.is_typing {
                    participant.typing_since = previous.typing_since;
                }
            }
            next.insert(id, participant);
        }

        let changed = !same_visible_state(&self.entries, &next);
        self.entries = next;
        changed
    }

    /// Applies one incremental update, last write wins.
    ///
    /// Returns true if the visible state for that participant changed.
    pub fn apply_update(&mut self, entry: PresenceEntry, now: Timestamp) -> bool {
        let id = entry.participant_id.clone();
        let mut incoming = Participant::from_entry(entry, now);

        match self.entries.get(&id) {
            Some(previous) => {
                let visible_change = previous.display_name != incoming.display_name
                    || previous.is_typing != incoming.is_typing;
                if incoming.is_typing {
                    // A repeated typing update acts as a typing heartbeat
                    // and restarts the quiet period.
                    incoming.typing_since = Some(now);
                }
                self.entries.insert(id, incoming);
                visible_change
            }
            None => {
                self.entries.insert(id, incoming);
                true
            }
        }
    }

    /// Evicts participants whose entries have not been refreshed within
    /// the liveness window (2x the heartbeat interval).
    ///
    /// Returns true if anything was evicted.
    pub fn evict_stale(&mut self, now: Timestamp) -> bool {
        let window = self.heartbeat_interval * LIVENESS_MULTIPLIER;
        let before = self.entries.len();
        self.entries
            .retain(|_, p| !now.elapsed_exceeds(&p.last_seen_at, window));
        self.entries.len() != before
    }

    /// Clears typing flags whose quiet period has lapsed.
    ///
    /// A stalled client that never sends an explicit "stopped typing"
    /// cannot leave a stuck indicator. Returns true if any flag cleared.
    pub fn expire_typing(&mut self, now: Timestamp) -> bool {
        let mut changed = false;
        for participant in self.entries.values_mut() {
            if participant.is_typing {
                let lapsed = participant
                    .typing_since
                    .map(|since| now.elapsed_exceeds(&since, self.typing_quiet_period))
                    .unwrap_or(true);
                if lapsed {
                    participant.is_typing = false;
                    participant.typing_since = None;
                    changed = true;
                }
            }
        }
        changed
    }

    /// Returns the current participant set, ordered by id for stable
    /// snapshot output.
    pub fn participants(&self) -> Vec<Participant> {
        let mut all: Vec<Participant> = self.entries.values().cloned().collect();
        all.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        all
    }

    /// Returns the ids of participants currently typing, ordered.
    pub fn typing_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self
            .entries
            .values()
            .filter(|p| p.is_typing)
            .map(|p| p.participant_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Looks up a single participant.
    pub fn get(&self, participant_id: &ParticipantId) -> Option<&Participant> {
        self.entries.get(participant_id)
    }

    /// Number of tracked participants.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no participants are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn same_visible_state(
    a: &HashMap<ParticipantId, Participant>,
    b: &HashMap<ParticipantId, Participant>,
) -> bool {
    a.len() == b.len()
        && a.iter().all(|(id, pa)| {
            b.get(id)
                .map(|pb| pa.display_name == pb.display_name && pa.is_typing == pb.is_typing)
                .unwrap_or(false)
        })
}
