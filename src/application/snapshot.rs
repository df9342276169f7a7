//! Immutable room state snapshot published to consumers.

use crate::domain::foundation::{ParticipantId, RealtimeError};
use crate::domain::message::Message;
use crate::domain::presence::Participant;
use crate::ports::ConnectionState;

/// One consistent view of a room, published on every state change.
///
/// Consumers hold a `watch::Receiver<RoomSnapshot>` and render whatever the
/// latest snapshot says; there is no incremental diff protocol. Storage and
/// send failures travel inside the snapshot in `storage_error` so the UI
/// can render a degraded-but-live room instead of tearing down.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    /// Logical connection state of the session's channel.
    pub connection_state: ConnectionState,

    /// Current participant set, ordered by id.
    pub participants: Vec<Participant>,

    /// Ids of participants currently typing, ordered.
    pub typing_ids: Vec<ParticipantId>,

    /// Ordered message log, pending entries included.
    pub messages: Vec<Message>,

    /// Most recent storage or send failure, if any. A fatal
    /// `ProtocolDesync` is recorded here alongside a `Closed` connection
    /// state.
    pub storage_error: Option<RealtimeError>,
}

impl RoomSnapshot {
    /// The empty snapshot a session starts from.
    pub fn initial() -> Self {
        Self {
            connection_state: ConnectionState::Connecting,
            participants: Vec::new(),
            typing_ids: Vec::new(),
            messages: Vec::new(),
            storage_error: None,
        }
    }

    /// True once the session is fully synchronized and accepting sends.
    pub fn is_open(&self) -> bool {
        self.connection_state == ConnectionState::Open
    }

    /// Messages whose delivery the server has confirmed.
    pub fn confirmed_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.is_confirmed())
    }
}
