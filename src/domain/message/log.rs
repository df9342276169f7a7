//! Per-room ordered, deduplicated message log.
//!
//! Merges two streams into one consistent sequence: a single historical
//! fetch performed at join time, and live insert events that may start
//! arriving before that fetch completes. Live events seen early are
//! buffered and merged once history lands.
//!
//! Like the presence registry, the log is pure state mutated only by its
//! owning session's event loop.

use std::collections::HashSet;
use std::time::Duration;

use crate::domain::foundation::{
    ClientMessageId, MessageId, ParticipantId, RealtimeError, RoomId, Timestamp,
};

use super::message::{AttachmentRef, DeliveryState, Message, StoredMessage};

/// Ordered, deduplicated sequence of messages for one room.
///
/// Ordering invariant: entries are sorted by `(created_at, message_id)`
/// ascending and a confirmed entry is never reordered. The only mutations
/// are sorted insertion of new rows and in-place dedupe replacement of a
/// matching unconfirmed entry.
///
/// Dedupe is heuristic: a confirmed row matches a local unconfirmed entry
/// when author and body agree and the send times are within the tolerance
/// window. Two rapid identical messages from the same author can therefore
/// collapse against the wrong draft; the earliest unconfirmed entry wins
/// so the collapse is at least deterministic. A client-supplied idempotency
/// token echoed back by the insert would remove the ambiguity.
pub struct MessageLog {
    room_id: RoomId,
    entries: Vec<Message>,
    known_ids: HashSet<MessageId>,
    buffered: Vec<StoredMessage>,
    history_loaded: bool,
    dedupe_tolerance: Duration,
}

impl MessageLog {
    /// Creates an empty log for a room.
    ///
    /// # Arguments
    ///
    /// * `dedupe_tolerance` - Window within which a confirmed row's server
    ///   timestamp may differ from a local entry's send time and still
    ///   reconcile.
    pub fn new(room_id: RoomId, dedupe_tolerance: Duration) -> Self {
        Self {
            room_id,
            entries: Vec::new(),
            known_ids: HashSet::new(),
            buffered: Vec::new(),
            history_loaded: false,
            dedupe_tolerance,
        }
    }

    /// Seeds the log from the historical fetch, then merges any live
    /// inserts that were buffered while the fetch was in flight.
    ///
    /// Safe to call again after a reconnect catch-up: rows already known
    /// are no-ops.
    ///
    /// Returns true if the visible log changed.
    pub fn seed_history(&mut self, history: Vec<StoredMessage>) -> Result<bool, RealtimeError> {
        let mut changed = false;
        for row in history {
            changed |= self.merge(row)?;
        }

        self.history_loaded = true;
        let buffered = std::mem::take(&mut self.buffered);
        for row in buffered {
            changed |= self.merge(row)?;
        }
        Ok(changed)
    }

    /// Applies one live insert event.
    ///
    /// Before history has loaded the row is buffered and applied later by
    /// [`seed_history`](Self::seed_history); afterwards it is merged
    /// immediately. Returns true if the visible log changed.
    pub fn apply_insert(&mut self, row: StoredMessage) -> Result<bool, RealtimeError> {
        if !self.history_loaded {
            self.buffered.push(row);
            return Ok(false);
        }
        self.merge(row)
    }

    /// Appends a local optimistic entry and returns its client id.
    pub fn append_local(
        &mut self,
        author_id: ParticipantId,
        body: impl Into<String>,
        attachment_ref: Option<AttachmentRef>,
        sent_at: Timestamp,
    ) -> ClientMessageId {
        let client_id = ClientMessageId::new();
        self.entries.push(Message::pending(
            client_id,
            self.room_id,
            author_id,
            body,
            attachment_ref,
            sent_at,
        ));
        client_id
    }

    /// Marks a pending entry failed after a terminal publish failure.
    ///
    /// The draft stays in the log so the UI can offer retry. Returns true
    /// if the entry existed and was still unconfirmed.
    pub fn mark_failed(&mut self, client_id: ClientMessageId) -> bool {
        match self.find_local_mut(client_id) {
            Some(entry) if !entry.is_confirmed() => {
                entry.delivery_state = DeliveryState::Failed;
                true
            }
            _ => false,
        }
    }

    /// Returns a failed entry to pending ahead of a retry publish.
    ///
    /// Returns the entry's body if the retry is valid.
    pub fn mark_retrying(&mut self, client_id: ClientMessageId, now: Timestamp) -> Option<String> {
        match self.find_local_mut(client_id) {
            Some(entry) if entry.delivery_state == DeliveryState::Failed => {
                entry.delivery_state = DeliveryState::Pending;
                entry.created_at = now;
                Some(entry.body.clone())
            }
            _ => None,
        }
    }

    /// Ordered view of the log.
    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    /// Timestamp of the newest confirmed entry, used as the catch-up
    /// cursor after a reconnect.
    pub fn latest_confirmed_at(&self) -> Option<Timestamp> {
        self.entries
            .iter()
            .filter(|m| m.is_confirmed())
            .map(|m| m.created_at)
            .max()
    }

    /// True once the historical fetch has been applied.
    pub fn history_loaded(&self) -> bool {
        self.history_loaded
    }

    /// Number of entries, pending included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merges one confirmed row into the log.
    fn merge(&mut self, row: StoredMessage) -> Result<bool, RealtimeError> {
        if self.known_ids.contains(&row.message_id) {
            // At-least-once delivery: a repeat of a known row is a no-op,
            // but the same id carrying different content means the log and
            // the server no longer agree.
            let existing = self
                .entries
                .iter()
                .find(|m| m.server_id == Some(row.message_id));
            if let Some(existing) = existing {
                if existing.author_id != row.author_id || existing.body != row.body {
                    return Err(RealtimeError::protocol_desync(format!(
                        "conflicting content for confirmed message {}",
                        row.message_id
                    )));
                }
            }
            return Ok(false);
        }

        self.known_ids.insert(row.message_id);

        if let Some(index) = self.find_dedupe_match(&row) {
            // Replace the optimistic entry in place, preserving its
            // position rather than appending the row a second time. The
            // entry adopts the server timestamp, so it can sit out of
            // `(created_at, server_id)` order relative to its neighbors;
            // the inversion is bounded by the dedupe tolerance, since a
            // row further away would not have matched.
            self.entries[index].confirm_with(row);
            return Ok(true);
        }

        let message = Message::confirmed(row);
        let at = self
            .entries
            .partition_point(|m| (m.created_at, m.server_id) <= (message.created_at, message.server_id));
        self.entries.insert(at, message);
        Ok(true)
    }

    /// Finds the earliest unconfirmed entry matching the dedupe key:
    /// same author, same body, send time within tolerance.
    ///
    /// Failed entries participate too: an insert that landed after its
    /// response was lost must still collapse into the draft it confirms.
    fn find_dedupe_match(&self, row: &StoredMessage) -> Option<usize> {
        self.entries.iter().position(|m| {
            m.is_unconfirmed()
                && m.author_id == row.author_id
                && m.body == row.body
                && m.created_at.abs_distance(&row.created_at)
                    <= chrono::Duration::from_std(self.dedupe_tolerance)
                        .unwrap_or_else(|_| chrono::Duration::max_value())
        })
    }

    fn find_local_mut(&mut self, client_id: ClientMessageId) -> Option<&mut Message> {
        self.entries
            .iter_mut()
            .find(|m| m.client_id == Some(client_id))
    }
}
