//! Message records: durable rows and the optimistic local view.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{ClientMessageId, MessageId, ParticipantId, RoomId, Timestamp};

/// Opaque reference to an attachment in object storage.
///
/// The realtime core moves the reference around; upload and transcoding
/// are handled by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentRef(String);

impl AttachmentRef {
    /// Wraps a storage reference.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Returns the inner reference string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A durable message row as stored by the room directory and carried in
/// `insert` events. The server assigns `message_id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub author_id: ParticipantId,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_ref: Option<AttachmentRef>,
    pub created_at: Timestamp,
}

/// Delivery state of a message in the local log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Local optimistic entry, not yet confirmed by durable storage.
    Pending,
    /// Durably stored with a server-assigned id.
    Confirmed,
    /// The publish was rejected; the draft is kept so the UI can retry.
    Failed,
}

/// A message as held by the local log.
///
/// Confirmed entries always carry a server id; entries created locally
/// keep their client id through confirmation so the UI can correlate the
/// optimistic row with its confirmed replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientMessageId>,
    pub room_id: RoomId,
    pub author_id: ParticipantId,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_ref: Option<AttachmentRef>,
    pub created_at: Timestamp,
    pub delivery_state: DeliveryState,
}

impl Message {
    /// Creates a confirmed entry from a durable row.
    pub fn confirmed(stored: StoredMessage) -> Self {
        Self {
            server_id: Some(stored.message_id),
            client_id: None,
            room_id: stored.room_id,
            author_id: stored.author_id,
            body: stored.body,
            attachment_ref: stored.attachment_ref,
            created_at: stored.created_at,
            delivery_state: DeliveryState::Confirmed,
        }
    }

    /// Creates a local optimistic entry awaiting confirmation.
    pub fn pending(
        client_id: ClientMessageId,
        room_id: RoomId,
        author_id: ParticipantId,
        body: impl Into<String>,
        attachment_ref: Option<AttachmentRef>,
        sent_at: Timestamp,
    ) -> Self {
        Self {
            server_id: None,
            client_id: Some(client_id),
            room_id,
            author_id,
            body: body.into(),
            attachment_ref,
            created_at: sent_at,
            delivery_state: DeliveryState::Pending,
        }
    }

    /// True once durable storage has acknowledged this message.
    pub fn is_confirmed(&self) -> bool {
        self.delivery_state == DeliveryState::Confirmed
    }

    /// True while the entry awaits confirmation or retry.
    pub fn is_unconfirmed(&self) -> bool {
        matches!(
            self.delivery_state,
            DeliveryState::Pending | DeliveryState::Failed
        )
    }

    /// Adopts the server row for this entry in place, preserving the
    /// entry's position in the log.
    pub(crate) fn confirm_with(&mut self, stored: StoredMessage) {
        self.server_id = Some(stored.message_id);
        self.created_at = stored.created_at;
        self.attachment_ref = stored.attachment_ref;
        self.delivery_state = DeliveryState::Confirmed;
    }
}
