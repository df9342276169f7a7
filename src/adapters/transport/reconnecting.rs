//! Reconnect-with-backoff wrapper around a channel connector.
//!
//! Presents one logical connection per topic that survives physical
//! drops. Consumers hold a single event receiver and state watch for the
//! lifetime of the logical connection; when the physical connection dies,
//! a supervisor task reconnects with jittered exponential backoff and
//! splices the replacement's event stream into the same outward receiver
//! **before** flipping the state back to `Open`, so no subscription is
//! silently dropped across a reconnect.

use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use crate::domain::foundation::RealtimeError;
use crate::ports::{
    ChannelConnection, ChannelConnector, ChannelEvent, ChannelPublisher, ConnectionState,
};

use super::backoff::BackoffPolicy;

/// Factory for logical connections that survive drops.
pub struct ReconnectingChannel;

impl ReconnectingChannel {
    /// Opens a logical connection for a topic.
    ///
    /// The first physical connect happens inline; its failure is returned
    /// to the caller. After that, unexpected drops are handled by the
    /// supervisor: the state watch reports `Reconnecting`, publish fails
    /// fast with `Disconnected`, and once a replacement connection is up
    /// the watch reports `Open` again.
    ///
    /// Closing the returned publisher tears the logical connection down
    /// for good; so does dropping the event receiver.
    pub async fn open(
        connector: Arc<dyn ChannelConnector>,
        topic: impl Into<String>,
        policy: BackoffPolicy,
    ) -> Result<ChannelConnection, RealtimeError> {
        let topic = topic.into();
        let first = connector.connect(&topic).await?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Open);
        let slot: PublisherSlot = Arc::new(RwLock::new(first.publisher));
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            connector,
            topic,
            policy,
            out_tx,
            state_tx,
            slot: Arc::clone(&slot),
            cancel: cancel.clone(),
        };
        tokio::spawn(supervisor.run(first.events));

        Ok(ChannelConnection {
            publisher: Arc::new(ReconnectingPublisher {
                slot,
                states: state_rx.clone(),
                cancel,
            }),
            events: out_rx,
            states: state_rx,
        })
    }
}

type PublisherSlot = Arc<RwLock<Arc<dyn ChannelPublisher>>>;

struct Supervisor {
    connector: Arc<dyn ChannelConnector>,
    topic: String,
    policy: BackoffPolicy,
    out_tx: mpsc::UnboundedSender<ChannelEvent>,
    state_tx: watch::Sender<ConnectionState>,
    slot: PublisherSlot,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(self, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        loop {
            // Forward the current physical connection until it drops.
            let dropped = loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        let _ = self.state_tx.send(ConnectionState::Closed);
                        return;
                    }
                    maybe = events.recv() => match maybe {
                        Some(event) => {
                            if self.out_tx.send(event).is_err() {
                                // Consumer went away; stop supervising.
                                return;
                            }
                        }
                        None => break true,
                    }
                }
            };

            if dropped {
                tracing::warn!(topic = %self.topic, "channel dropped, reconnecting");
                let _ = self.state_tx.send(ConnectionState::Reconnecting);
            }

            let mut attempt: u32 = 0;
            let replacement = loop {
                let delay = self.policy.delay(attempt);
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        let _ = self.state_tx.send(ConnectionState::Closed);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                match self.connector.connect(&self.topic).await {
                    Ok(connection) => break connection,
                    Err(error) => {
                        attempt = attempt.saturating_add(1);
                        tracing::debug!(
                            topic = %self.topic,
                            attempt,
                            %error,
                            "reconnect attempt failed"
                        );
                    }
                }
            };

            // Splice the replacement in before reporting Open so every
            // already-registered consumer sees its events.
            *self.slot.write().await = replacement.publisher;
            events = replacement.events;
            tracing::info!(topic = %self.topic, attempts = attempt + 1, "channel reconnected");
            let _ = self.state_tx.send(ConnectionState::Open);
        }
    }
}

struct ReconnectingPublisher {
    slot: PublisherSlot,
    states: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

#[async_trait]
impl ChannelPublisher for ReconnectingPublisher {
    async fn publish(&self, event: ChannelEvent) -> Result<(), RealtimeError> {
        // Fail fast while down; never queue behind a reconnect.
        if *self.states.borrow() != ConnectionState::Open {
            return Err(RealtimeError::Disconnected);
        }
        let inner = self.slot.read().await.clone();
        inner.publish(event).await
    }

    async fn close(&self) {
        self.cancel.cancel();
        let inner = self.slot.read().await.clone();
        inner.close().await;
    }
}
