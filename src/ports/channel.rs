//! Channel provider port - topic-scoped publish/subscribe.
//!
//! The channel provider is a transport collaborator offering named event
//! types and connection-state callbacks. Delivery is assumed at-least-once
//! and unordered across event types; everything that crosses this boundary
//! is a validated tagged variant, so dynamic payloads never reach the
//! presence registry or the message log.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::domain::foundation::RealtimeError;
use crate::domain::message::StoredMessage;
use crate::domain::presence::PresenceEntry;

/// Tagged wire event, validated at the transport boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ChannelEvent {
    /// Full presence snapshot for resynchronization after join or
    /// reconnect.
    PresenceSync { participants: Vec<PresenceEntry> },

    /// Incremental presence change for one participant.
    PresenceUpdate { participant: PresenceEntry },

    /// A durable message row was inserted.
    Insert { message: StoredMessage },
}

impl ChannelEvent {
    /// Event type name as used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelEvent::PresenceSync { .. } => "presence-sync",
            ChannelEvent::PresenceUpdate { .. } => "presence-update",
            ChannelEvent::Insert { .. } => "insert",
        }
    }
}

/// Observable state of a logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

/// One physical connection to a topic.
///
/// `events` yields validated channel events until the connection drops or
/// closes, at which point the stream ends and `states` reports the
/// transition. Consumers needing a connection that survives drops wrap a
/// connector in `ReconnectingChannel`.
pub struct ChannelConnection {
    /// Publish half; fails fast with `Disconnected` once the connection
    /// is down, never queues.
    pub publisher: Arc<dyn ChannelPublisher>,

    /// Inbound validated events for this connection.
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,

    /// Connection-state transitions, emitted on every open/drop/close.
    pub states: watch::Receiver<ConnectionState>,
}

/// Port for opening topic connections against the channel provider.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Opens a physical connection for a topic.
    ///
    /// A connector maintains at most one active physical connection per
    /// topic; opening a topic again supersedes the previous connection.
    async fn connect(&self, topic: &str) -> Result<ChannelConnection, RealtimeError>;
}

/// Publish half of a channel connection.
#[async_trait]
pub trait ChannelPublisher: Send + Sync {
    /// Publishes one event on the connection's topic.
    ///
    /// # Errors
    ///
    /// `RealtimeError::Disconnected` if the connection is no longer open.
    /// The event is never silently queued; callers decide whether to
    /// retry.
    async fn publish(&self, event: ChannelEvent) -> Result<(), RealtimeError>;

    /// Closes the connection gracefully.
    ///
    /// The provider treats this as a graceful leave and drops the
    /// connection's presence entries from subsequent snapshots.
    async fn close(&self);
}
