//! In-memory room directory for tests and local development.
//!
//! Stores message rows per room, assigns server ids and timestamps, and
//! echoes every insert as an `insert` event on the room's topic through
//! the in-memory hub, the way a hosted realtime database notifies
//! subscribers of new rows.
//!
//! # Panics
//!
//! Methods may panic if internal locks are poisoned. This adapter is for
//! tests and local development, not production storage.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::adapters::transport::InMemoryChannelHub;
use crate::domain::foundation::{MessageId, ParticipantId, RealtimeError, RoomId, Timestamp};
use crate::domain::message::{AttachmentRef, StoredMessage};
use crate::ports::{ChannelEvent, RoomDirectory};

#[derive(Default)]
struct DirectoryState {
    messages: HashMap<RoomId, Vec<StoredMessage>>,
    members: HashMap<RoomId, Vec<ParticipantId>>,
    failing_fetches: u32,
    failing_inserts: u32,
}

/// In-memory stand-in for the durable room store.
pub struct InMemoryRoomDirectory {
    hub: Arc<InMemoryChannelHub>,
    state: Mutex<DirectoryState>,
}

impl InMemoryRoomDirectory {
    /// Creates an empty directory wired to a hub for insert echoes.
    pub fn new(hub: Arc<InMemoryChannelHub>) -> Arc<Self> {
        Arc::new(Self {
            hub,
            state: Mutex::new(DirectoryState::default()),
        })
    }

    /// Pre-populates history for a room (server-assigned fields included).
    pub fn seed_messages(&self, room_id: RoomId, rows: Vec<StoredMessage>) {
        let mut state = self.state.lock().expect("directory lock poisoned");
        let messages = state.messages.entry(room_id).or_default();
        messages.extend(rows);
        messages.sort_by_key(|m| (m.created_at, m.message_id));
    }

    /// Sets the durable member list for a room.
    pub fn set_members(&self, room_id: RoomId, members: Vec<ParticipantId>) {
        self.state
            .lock()
            .expect("directory lock poisoned")
            .members
            .insert(room_id, members);
    }

    /// Makes the next `count` fetches fail with `StorageUnavailable`.
    pub fn fail_next_fetches(&self, count: u32) {
        self.state
            .lock()
            .expect("directory lock poisoned")
            .failing_fetches = count;
    }

    /// Makes the next `count` inserts fail with `StorageUnavailable`.
    pub fn fail_next_inserts(&self, count: u32) {
        self.state
            .lock()
            .expect("directory lock poisoned")
            .failing_inserts = count;
    }

    /// Number of stored rows for a room (for test assertions).
    pub fn message_count(&self, room_id: &RoomId) -> usize {
        self.state
            .lock()
            .expect("directory lock poisoned")
            .messages
            .get(room_id)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RoomDirectory for InMemoryRoomDirectory {
    async fn fetch_messages(
        &self,
        room_id: &RoomId,
        since: Option<Timestamp>,
    ) -> Result<Vec<StoredMessage>, RealtimeError> {
        let mut state = self.state.lock().expect("directory lock poisoned");
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(RealtimeError::storage_unavailable("injected fetch failure"));
        }

        let rows = state
            .messages
            .get(room_id)
            .map(|rows| {
                rows.iter()
                    .filter(|m| since.map(|s| m.created_at >= s).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn insert_message(
        &self,
        room_id: &RoomId,
        author_id: &ParticipantId,
        body: &str,
        attachment_ref: Option<AttachmentRef>,
    ) -> Result<StoredMessage, RealtimeError> {
        let row = {
            let mut state = self.state.lock().expect("directory lock poisoned");
            if state.failing_inserts > 0 {
                state.failing_inserts -= 1;
                return Err(RealtimeError::storage_unavailable(
                    "injected insert failure",
                ));
            }

            let row = StoredMessage {
                message_id: MessageId::new(),
                room_id: *room_id,
                author_id: author_id.clone(),
                body: body.to_string(),
                attachment_ref,
                created_at: Timestamp::now(),
            };
            state.messages.entry(*room_id).or_default().push(row.clone());
            row
        };

        // Echo to subscribers outside the lock.
        self.hub.server_publish(
            &room_id.topic(),
            ChannelEvent::Insert {
                message: row.clone(),
            },
        );
        Ok(row)
    }

    async fn fetch_members(&self, room_id: &RoomId) -> Result<Vec<ParticipantId>, RealtimeError> {
        let mut state = self.state.lock().expect("directory lock poisoned");
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(RealtimeError::storage_unavailable("injected fetch failure"));
        }
        Ok(state.members.get(room_id).cloned().unwrap_or_default())
    }
}
