//! Foundation value objects shared across the realtime domain.

mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use errors::{RealtimeError, ValidationError};
pub use ids::{ClientMessageId, MessageId, ParticipantId, RoomId};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
