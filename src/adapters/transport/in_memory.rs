//! In-memory channel hub for tests and local development.
//!
//! Plays the channel provider: per-topic fan-out of validated events,
//! server-side presence bookkeeping, and fault injection so tests can
//! script drops and connect failures.
//!
//! # Architecture
//!
//! ```text
//! Hub (the "server")
//! ├── topic room:123
//! │   ├── connection 1 (client A) ── presence entry for A
//! │   └── connection 2 (client B) ── presence entry for B
//! └── topic room:456
//!     └── connection 3 (client C)
//! ```
//!
//! Each `InMemoryChannelConnector` models one client process and keeps at
//! most one active physical connection per topic; reconnecting a topic
//! supersedes the previous connection.
//!
//! Presence semantics mirror a hosted channel provider: a fresh
//! `presence-sync` is delivered to every new connection, a graceful close
//! removes the connection's entry and rebroadcasts the snapshot, while a
//! forced drop leaves the entry behind (the server has not noticed yet) so
//! clients exercise their local liveness eviction.
//!
//! # Panics
//!
//! Methods may panic if internal locks are poisoned. This adapter is for
//! tests and local development, not production transport.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

use crate::domain::foundation::RealtimeError;
use crate::domain::presence::PresenceEntry;
use crate::ports::{
    ChannelConnection, ChannelConnector, ChannelEvent, ChannelPublisher, ConnectionState,
};

type ConnectionId = u64;

struct ConnectionSlot {
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
}

#[derive(Default)]
struct TopicState {
    connections: HashMap<ConnectionId, ConnectionSlot>,
    presence: HashMap<ConnectionId, PresenceEntry>,
}

impl TopicState {
    fn snapshot(&self) -> Vec<PresenceEntry> {
        let mut entries: Vec<PresenceEntry> = self.presence.values().cloned().collect();
        entries.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        entries
    }

    fn broadcast(&self, event: &ChannelEvent) {
        for slot in self.connections.values() {
            // A receiver that went away is indistinguishable from a slow
            // consumer that disconnected; either way the hub moves on.
            let _ = slot.events.send(event.clone());
        }
    }
}

#[derive(Default)]
struct HubState {
    topics: HashMap<String, TopicState>,
    next_connection_id: ConnectionId,
    failing_connects: u32,
}

/// In-memory stand-in for the channel provider.
pub struct InMemoryChannelHub {
    state: Mutex<HubState>,
}

impl InMemoryChannelHub {
    /// Creates an empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState::default()),
        })
    }

    /// Creates a connector representing one client process.
    pub fn connector(self: &Arc<Self>) -> InMemoryChannelConnector {
        InMemoryChannelConnector {
            hub: Arc::clone(self),
            open_topics: Mutex::new(HashMap::new()),
        }
    }

    /// Publishes an event to every connection on a topic, as the server
    /// side would (e.g. the durable store echoing an insert).
    pub fn server_publish(&self, topic: &str, event: ChannelEvent) {
        let state = self.state.lock().expect("hub lock poisoned");
        if let Some(topic_state) = state.topics.get(topic) {
            topic_state.broadcast(&event);
        }
    }

    /// Forcibly drops every connection on a topic, simulating an
    /// unexpected transport failure.
    ///
    /// Presence entries are left in place: the server has not yet noticed
    /// the departure, so clients must rely on local liveness eviction.
    pub fn drop_connections(&self, topic: &str) {
        let mut state = self.state.lock().expect("hub lock poisoned");
        if let Some(topic_state) = state.topics.get_mut(topic) {
            for (_, slot) in topic_state.connections.drain() {
                let _ = slot.state.send(ConnectionState::Closed);
                // Dropping the sender ends the connection's event stream.
            }
        }
    }

    /// Makes the next `count` connect attempts fail with `Disconnected`,
    /// for exercising reconnect backoff.
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().expect("hub lock poisoned").failing_connects = count;
    }

    /// Number of live connections on a topic.
    pub fn connection_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .expect("hub lock poisoned")
            .topics
            .get(topic)
            .map(|t| t.connections.len())
            .unwrap_or(0)
    }

    fn connect(
        self: &Arc<Self>,
        topic: &str,
    ) -> Result<(ChannelConnection, ConnectionId), RealtimeError> {
        let mut state = self.state.lock().expect("hub lock poisoned");

        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(RealtimeError::Disconnected);
        }

        let connection_id = state.next_connection_id;
        state.next_connection_id += 1;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Open);

        let topic_state = state.topics.entry(topic.to_string()).or_default();
        // Seed the new connection with the current presence snapshot
        // before it sees any incremental traffic.
        let _ = event_tx.send(ChannelEvent::PresenceSync {
            participants: topic_state.snapshot(),
        });
        topic_state.connections.insert(
            connection_id,
            ConnectionSlot {
                events: event_tx,
                state: state_tx,
            },
        );

        let connection = ChannelConnection {
            publisher: Arc::new(InMemoryPublisher {
                hub: Arc::clone(self),
                topic: topic.to_string(),
                connection_id,
            }),
            events: event_rx,
            states: state_rx,
        };
        Ok((connection, connection_id))
    }

    fn publish(
        &self,
        topic: &str,
        connection_id: ConnectionId,
        event: ChannelEvent,
    ) -> Result<(), RealtimeError> {
        let mut state = self.state.lock().expect("hub lock poisoned");
        let topic_state = state
            .topics
            .get_mut(topic)
            .ok_or(RealtimeError::Disconnected)?;

        if !topic_state.connections.contains_key(&connection_id) {
            return Err(RealtimeError::Disconnected);
        }

        match event {
            ChannelEvent::PresenceUpdate { participant } => {
                // One presence entry per participant: a rejoining client
                // supersedes any ghost left by its previous connection.
                topic_state
                    .presence
                    .retain(|_, entry| entry.participant_id != participant.participant_id);
                topic_state
                    .presence
                    .insert(connection_id, participant.clone());
                topic_state.broadcast(&ChannelEvent::PresenceUpdate { participant });
            }
            ChannelEvent::PresenceSync { .. } => {
                // Clients publish an empty sync as a snapshot request; the
                // hub answers that connection with authoritative state.
                let snapshot = topic_state.snapshot();
                if let Some(slot) = topic_state.connections.get(&connection_id) {
                    let _ = slot.events.send(ChannelEvent::PresenceSync {
                        participants: snapshot,
                    });
                }
            }
            other => topic_state.broadcast(&other),
        }

        Ok(())
    }

    fn close(&self, topic: &str, connection_id: ConnectionId) {
        let mut state = self.state.lock().expect("hub lock poisoned");
        if let Some(topic_state) = state.topics.get_mut(topic) {
            let removed_presence = topic_state.presence.remove(&connection_id).is_some();
            if let Some(slot) = topic_state.connections.remove(&connection_id) {
                let _ = slot.state.send(ConnectionState::Closed);
            }
            // Graceful leave: remaining clients learn through a snapshot
            // that no longer lists the departed participant.
            if removed_presence {
                let snapshot = topic_state.snapshot();
                topic_state.broadcast(&ChannelEvent::PresenceSync {
                    participants: snapshot,
                });
            }
        }
    }

    fn supersede(&self, topic: &str, connection_id: ConnectionId) {
        let mut state = self.state.lock().expect("hub lock poisoned");
        if let Some(topic_state) = state.topics.get_mut(topic) {
            topic_state.presence.remove(&connection_id);
            if let Some(slot) = topic_state.connections.remove(&connection_id) {
                let _ = slot.state.send(ConnectionState::Closed);
            }
        }
    }
}

/// Connector for one simulated client process.
///
/// Keeps at most one active physical connection per topic.
pub struct InMemoryChannelConnector {
    hub: Arc<InMemoryChannelHub>,
    open_topics: Mutex<HashMap<String, ConnectionId>>,
}

#[async_trait]
impl ChannelConnector for InMemoryChannelConnector {
    async fn connect(&self, topic: &str) -> Result<ChannelConnection, RealtimeError> {
        let (connection, new_id) = self.hub.connect(topic)?;

        let previous = self
            .open_topics
            .lock()
            .expect("connector lock poisoned")
            .insert(topic.to_string(), new_id);
        if let Some(previous_id) = previous {
            self.hub.supersede(topic, previous_id);
        }

        Ok(connection)
    }
}

struct InMemoryPublisher {
    hub: Arc<InMemoryChannelHub>,
    topic: String,
    connection_id: ConnectionId,
}

#[async_trait]
impl ChannelPublisher for InMemoryPublisher {
    async fn publish(&self, event: ChannelEvent) -> Result<(), RealtimeError> {
        self.hub.publish(&self.topic, self.connection_id, event)
    }

    async fn close(&self) {
        self.hub.close(&self.topic, self.connection_id);
    }
}
