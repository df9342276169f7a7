//! Error types for the realtime core.

use thiserror::Error;

/// Errors that occur during value object construction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Field '{field}' cannot be empty")]
    EmptyField { field: String },

    #[error("Field '{field}' has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    /// Creates an empty field validation error.
    pub fn empty_field(field: impl Into<String>) -> Self {
        ValidationError::EmptyField { field: field.into() }
    }

    /// Creates an invalid format validation error.
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Error taxonomy for the realtime core.
///
/// Propagation policy:
/// - `Disconnected` is returned fast from publish paths while the channel
///   is down; callers decide whether to retry. It never queues work.
/// - `StorageUnavailable` and `SendFailed` are degraded-but-live: they
///   travel to the UI inside the emitted snapshot, and the session keeps
///   running.
/// - `ProtocolDesync` is fatal to the session. The session is torn down
///   and must be rejoined from scratch; partial state repair risks silent
///   data loss.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RealtimeError {
    /// The channel transport has no open connection for the topic.
    #[error("channel transport is disconnected")]
    Disconnected,

    /// A durable fetch or insert against the room directory failed.
    #[error("room directory unavailable: {reason}")]
    StorageUnavailable { reason: String },

    /// A specific pending message could not be confirmed.
    #[error("send failed for pending message: {reason}")]
    SendFailed { reason: String },

    /// An internal invariant was violated, e.g. two confirmed messages
    /// with the same server id but different content.
    #[error("protocol desync: {reason}")]
    ProtocolDesync { reason: String },

    /// The session is not in a state that accepts the operation.
    #[error("invalid session state: {reason}")]
    InvalidState { reason: String },

    /// A value object failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl RealtimeError {
    /// Creates a StorageUnavailable error.
    pub fn storage_unavailable(reason: impl Into<String>) -> Self {
        RealtimeError::StorageUnavailable { reason: reason.into() }
    }

    /// Creates a SendFailed error.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        RealtimeError::SendFailed { reason: reason.into() }
    }

    /// Creates a ProtocolDesync error.
    pub fn protocol_desync(reason: impl Into<String>) -> Self {
        RealtimeError::ProtocolDesync { reason: reason.into() }
    }

    /// Creates an InvalidState error.
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        RealtimeError::InvalidState { reason: reason.into() }
    }

    /// True if the error is fatal to the owning session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RealtimeError::ProtocolDesync { .. })
    }
}
