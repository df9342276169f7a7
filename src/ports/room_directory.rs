//! Room directory port - durable storage for messages and members.
//!
//! The directory is the storage collaborator boundary: the only way the
//! realtime core reaches durable state. Network and auth failures surface
//! as `StorageUnavailable`; callers bound their own retries rather than
//! retrying indefinitely here.

use async_trait::async_trait;

use crate::domain::foundation::{ParticipantId, RealtimeError, RoomId, Timestamp};
use crate::domain::message::{AttachmentRef, StoredMessage};

/// Port for the durable room store.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Fetches messages for a room ordered by `created_at` ascending.
    ///
    /// # Arguments
    ///
    /// * `since` - Optional cursor; only rows created at or after this
    ///   instant are returned. Used by reconnect catch-up.
    ///
    /// # Errors
    ///
    /// `RealtimeError::StorageUnavailable` on any storage failure.
    async fn fetch_messages(
        &self,
        room_id: &RoomId,
        since: Option<Timestamp>,
    ) -> Result<Vec<StoredMessage>, RealtimeError>;

    /// Inserts a message, assigning its id and `created_at` server-side.
    ///
    /// Returns the stored row. The provider also echoes the row as an
    /// `insert` event on the room's topic, which is how other clients
    /// (and the sender's own log) learn about it.
    async fn insert_message(
        &self,
        room_id: &RoomId,
        author_id: &ParticipantId,
        body: &str,
        attachment_ref: Option<AttachmentRef>,
    ) -> Result<StoredMessage, RealtimeError>;

    /// Returns the ids of the room's durable members.
    async fn fetch_members(&self, room_id: &RoomId) -> Result<Vec<ParticipantId>, RealtimeError>;
}
