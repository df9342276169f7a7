//! Room session orchestrator.
//!
//! One session owns one room's live state: the presence registry, the
//! message log, and the logical channel connection. All mutation is
//! serialized through a single event loop task per room; the outside world
//! talks to the loop through a command channel and observes it through a
//! snapshot watch. Nothing outside the loop ever touches the registry or
//! the log, so there are no locks around domain state and no torn reads.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::adapters::transport::{BackoffPolicy, ReconnectingChannel};
use crate::config::RealtimeConfig;
use crate::domain::foundation::{
    ClientMessageId, ParticipantId, RealtimeError, RoomId, StateMachine, Timestamp,
};
use crate::domain::message::{AttachmentRef, MessageLog, StoredMessage};
use crate::domain::presence::{PresenceEntry, PresenceRegistry, PresenceState};
use crate::domain::session::SessionState;
use crate::ports::{
    ChannelConnector, ChannelEvent, ChannelPublisher, ConnectionState, RoomDirectory,
};

use super::snapshot::RoomSnapshot;

/// Who is joining, passed explicitly rather than read from ambient state.
#[derive(Debug, Clone)]
pub struct RoomIdentity {
    /// Stable id of the local participant.
    pub participant_id: ParticipantId,
    /// Name shown to other participants.
    pub display_name: String,
}

impl RoomIdentity {
    /// Creates an identity for joining a room.
    pub fn new(participant_id: ParticipantId, display_name: impl Into<String>) -> Self {
        Self {
            participant_id,
            display_name: display_name.into(),
        }
    }
}

/// Entry point for joining rooms.
pub struct RoomSession;

impl RoomSession {
    /// Joins a room, returning a handle to the running session.
    ///
    /// The transport connection is opened inline, so a provider that is
    /// down at join time fails here. Everything else - announcing
    /// presence, loading history - happens asynchronously in the session's
    /// event loop; the handle's snapshot watch reports `Connecting` until
    /// the session is fully synchronized and `Open` after.
    ///
    /// # Errors
    ///
    /// `RealtimeError::Disconnected` if the first transport connect fails.
    pub async fn join(
        connector: Arc<dyn ChannelConnector>,
        directory: Arc<dyn RoomDirectory>,
        config: RealtimeConfig,
        room_id: RoomId,
        identity: RoomIdentity,
    ) -> Result<RoomSessionHandle, RealtimeError> {
        let policy = BackoffPolicy::new(
            config.reconnect_base_delay(),
            config.reconnect_max_delay(),
            config.reconnect_jitter,
        );
        let connection = ReconnectingChannel::open(connector, room_id.topic(), policy).await?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(RoomSnapshot::initial());

        let event_loop = EventLoop {
            room_id,
            identity,
            config: config.clone(),
            directory,
            publisher: connection.publisher,
            channel_events: connection.events,
            channel_states: connection.states,
            commands: command_rx,
            completions: completion_rx,
            completion_tx,
            snapshots: snapshot_tx,
            state: SessionState::Idle,
            presence: PresenceRegistry::new(
                config.heartbeat_interval(),
                config.typing_quiet_period(),
            ),
            log: MessageLog::new(room_id, config.dedupe_tolerance()),
            storage_error: None,
            typing: false,
            catch_up_pending: false,
            presence_sync_pending: false,
            tasks: CancellationToken::new(),
        };
        tokio::spawn(event_loop.run());

        Ok(RoomSessionHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        })
    }
}

/// Handle to a running room session.
///
/// Cheap to clone-by-parts: `updates()` hands out independent snapshot
/// receivers. Dropping the handle tears the session down.
pub struct RoomSessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<RoomSnapshot>,
}

impl RoomSessionHandle {
    /// Returns a receiver of room snapshots, one per state change.
    pub fn updates(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshots.clone()
    }

    /// The latest snapshot.
    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Sends a message, returning the optimistic entry's client id.
    ///
    /// The entry appears in the next snapshot as `pending` and flips to
    /// `confirmed` when the insert echoes back. Accepted only while the
    /// session is fully joined.
    ///
    /// # Errors
    ///
    /// `RealtimeError::InvalidState` outside `Joined`; `Disconnected` if
    /// the session has already been torn down.
    pub async fn send(&self, body: impl Into<String>) -> Result<ClientMessageId, RealtimeError> {
        self.send_with_attachment(body, None).await
    }

    /// Sends a message carrying an attachment reference.
    pub async fn send_with_attachment(
        &self,
        body: impl Into<String>,
        attachment_ref: Option<AttachmentRef>,
    ) -> Result<ClientMessageId, RealtimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                body: body.into(),
                attachment_ref,
                reply: reply_tx,
            })
            .map_err(|_| RealtimeError::Disconnected)?;
        reply_rx.await.map_err(|_| RealtimeError::Disconnected)?
    }

    /// Retries a failed message.
    ///
    /// Fire-and-forget: the retry outcome shows up in the snapshot, as
    /// `confirmed` on success or back to `failed` otherwise. Ignored for
    /// entries that are not in the `failed` state.
    pub fn retry(&self, client_id: ClientMessageId) {
        let _ = self.commands.send(Command::Retry { client_id });
    }

    /// Reports the local participant's typing state.
    ///
    /// Fire-and-forget and silently ignored outside `Joined`; repeated
    /// `true` calls act as typing heartbeats that keep the indicator
    /// alive.
    pub fn set_typing(&self, typing: bool) {
        let _ = self.commands.send(Command::SetTyping(typing));
    }

    /// Leaves the room and tears the session down.
    ///
    /// Idempotent and safe while a join or send is still in flight: their
    /// completions are invalidated, and no snapshot is published after
    /// this returns.
    pub async fn leave(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(Command::Leave { done: done_tx }).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// True once the session's event loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Requests from the handle into the event loop.
enum Command {
    Send {
        body: String,
        attachment_ref: Option<AttachmentRef>,
        reply: oneshot::Sender<Result<ClientMessageId, RealtimeError>>,
    },
    Retry {
        client_id: ClientMessageId,
    },
    SetTyping(bool),
    Leave {
        done: oneshot::Sender<()>,
    },
}

/// Results posted back into the loop by spawned I/O tasks.
enum Completion {
    HistoryLoaded(Result<Vec<StoredMessage>, RealtimeError>),
    CatchUpLoaded(Result<Vec<StoredMessage>, RealtimeError>),
    SendFinished {
        client_id: ClientMessageId,
        result: Result<StoredMessage, RealtimeError>,
    },
}

struct EventLoop {
    room_id: RoomId,
    identity: RoomIdentity,
    config: RealtimeConfig,
    directory: Arc<dyn RoomDirectory>,
    publisher: Arc<dyn ChannelPublisher>,
    channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
    channel_states: watch::Receiver<ConnectionState>,
    commands: mpsc::UnboundedReceiver<Command>,
    completions: mpsc::UnboundedReceiver<Completion>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    snapshots: watch::Sender<RoomSnapshot>,
    state: SessionState,
    presence: PresenceRegistry,
    log: MessageLog,
    storage_error: Option<RealtimeError>,
    typing: bool,
    /// Set when a reconnect starts its two resynchronizations; both must
    /// clear before the session re-enters `Joined`.
    catch_up_pending: bool,
    presence_sync_pending: bool,
    /// Cancels in-flight I/O tasks on leave or fatal teardown, so a stale
    /// completion can never mutate a torn-down session.
    tasks: CancellationToken,
}

/// What the loop decided after handling one input.
enum Flow {
    Continue,
    Stop,
}

impl EventLoop {
    async fn run(mut self) {
        self.transition(SessionState::Joining);
        self.publish_snapshot();

        // Announce the local participant, then load history concurrently
        // with live events. The channel was just opened, so a publish
        // failure here only means a drop raced us; the reconnect path
        // re-announces.
        self.announce_presence().await;
        self.spawn_history_fetch(None, false);

        let mut tick = tokio::time::interval(self.config.maintenance_tick());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut states_alive = true;

        loop {
            let flow = tokio::select! {
                maybe = self.commands.recv() => match maybe {
                    Some(command) => self.handle_command(command).await,
                    // Handle dropped: tear down like an implicit leave.
                    None => {
                        self.teardown().await;
                        Flow::Stop
                    }
                },
                Some(completion) = self.completions.recv() => {
                    self.handle_completion(completion).await
                }
                maybe = self.channel_events.recv() => match maybe {
                    Some(event) => self.handle_event(event).await,
                    // The logical stream only ends when the transport is
                    // closed for good; the state watch carries the rest.
                    None => Flow::Continue,
                },
                changed = self.channel_states.changed(), if states_alive => {
                    match changed {
                        Ok(()) => {
                            let current = *self.channel_states.borrow_and_update();
                            self.handle_transport_state(current).await
                        }
                        Err(_) => {
                            states_alive = false;
                            Flow::Continue
                        }
                    }
                }
                _ = tick.tick() => self.handle_maintenance_tick(),
                _ = heartbeat.tick() => {
                    self.handle_heartbeat_tick().await;
                    Flow::Continue
                }
            };

            if matches!(flow, Flow::Stop) {
                break;
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Send {
                body,
                attachment_ref,
                reply,
            } => {
                if !self.state.accepts_sends() {
                    let _ = reply.send(Err(RealtimeError::invalid_state(format!(
                        "send rejected in {:?}",
                        self.state
                    ))));
                    return Flow::Continue;
                }

                let client_id = self.log.append_local(
                    self.identity.participant_id.clone(),
                    body.clone(),
                    attachment_ref.clone(),
                    Timestamp::now(),
                );
                let _ = reply.send(Ok(client_id));
                self.spawn_insert(client_id, body, attachment_ref);
                self.publish_snapshot();
                Flow::Continue
            }
            Command::Retry { client_id } => {
                if !self.state.accepts_sends() {
                    return Flow::Continue;
                }
                let attachment_ref = self
                    .log
                    .messages()
                    .iter()
                    .find(|m| m.client_id == Some(client_id))
                    .and_then(|m| m.attachment_ref.clone());
                if let Some(body) = self.log.mark_retrying(client_id, Timestamp::now()) {
                    self.spawn_insert(client_id, body, attachment_ref);
                    self.publish_snapshot();
                }
                Flow::Continue
            }
            Command::SetTyping(typing) => {
                if self.state.accepts_sends() {
                    self.typing = typing;
                    self.announce_presence().await;
                }
                Flow::Continue
            }
            Command::Leave { done } => {
                self.teardown().await;
                let _ = done.send(());
                Flow::Stop
            }
        }
    }

    async fn handle_completion(&mut self, completion: Completion) -> Flow {
        match completion {
            Completion::HistoryLoaded(Ok(rows)) => match self.log.seed_history(rows) {
                Ok(_) => {
                    if self.state == SessionState::Joining {
                        self.transition(SessionState::Joined);
                    }
                    self.publish_snapshot();
                    Flow::Continue
                }
                Err(error) => self.fatal(error).await,
            },
            Completion::HistoryLoaded(Err(error)) => {
                // History is the ground truth the log is seeded from; a
                // join that cannot load it has nothing consistent to show.
                tracing::error!(room_id = %self.room_id, %error, "history load failed");
                self.fatal(error).await
            }
            Completion::CatchUpLoaded(Ok(rows)) => match self.log.seed_history(rows) {
                Ok(_) => {
                    // Storage answered, so any earlier failure banner is
                    // stale; the rows themselves are the recovery.
                    self.storage_error = None;
                    self.catch_up_pending = false;
                    self.try_complete_rejoin();
                    self.publish_snapshot();
                    Flow::Continue
                }
                Err(error) => self.fatal(error).await,
            },
            Completion::CatchUpLoaded(Err(error)) => {
                tracing::error!(room_id = %self.room_id, %error, "catch-up fetch failed");
                self.fatal(error).await
            }
            Completion::SendFinished { client_id, result } => match result {
                Ok(row) => {
                    // Apply the confirmed row directly; the channel echo of
                    // the same id is a no-op when it arrives.
                    match self.log.apply_insert(row) {
                        Ok(_) => {
                            // Confirmation clears the degraded banner. Any
                            // still-failed entry keeps its own `failed`
                            // delivery state in the snapshot.
                            self.storage_error = None;
                            self.publish_snapshot();
                            Flow::Continue
                        }
                        Err(error) => self.fatal(error).await,
                    }
                }
                Err(error) => {
                    tracing::warn!(room_id = %self.room_id, %client_id, %error, "send failed");
                    self.log.mark_failed(client_id);
                    self.storage_error = Some(RealtimeError::send_failed(error.to_string()));
                    self.publish_snapshot();
                    Flow::Continue
                }
            },
        }
    }

    async fn handle_event(&mut self, event: ChannelEvent) -> Flow {
        let now = Timestamp::now();
        match event {
            ChannelEvent::PresenceSync { participants } => {
                let changed = self.presence.apply_snapshot(participants, now);
                let rejoined = if self.presence_sync_pending {
                    self.presence_sync_pending = false;
                    self.try_complete_rejoin()
                } else {
                    false
                };
                if changed || rejoined {
                    self.publish_snapshot();
                }
                Flow::Continue
            }
            ChannelEvent::PresenceUpdate { participant } => {
                if self.presence.apply_update(participant, now) {
                    self.publish_snapshot();
                }
                Flow::Continue
            }
            ChannelEvent::Insert { message } => match self.log.apply_insert(message) {
                Ok(changed) => {
                    if changed {
                        self.publish_snapshot();
                    }
                    Flow::Continue
                }
                Err(error) => self.fatal(error).await,
            },
        }
    }

    async fn handle_transport_state(&mut self, transport: ConnectionState) -> Flow {
        match transport {
            ConnectionState::Reconnecting => {
                if self.state == SessionState::Joined {
                    self.transition(SessionState::Reconnecting);
                    self.publish_snapshot();
                }
                Flow::Continue
            }
            ConnectionState::Open => {
                // Back up after a drop. Re-announce, ask the provider for
                // a fresh presence snapshot, and refetch history from just
                // before the newest confirmed row; the session stays in
                // `Reconnecting` until both resynchronizations land.
                self.announce_presence().await;
                let _ = self
                    .publisher
                    .publish(ChannelEvent::PresenceSync {
                        participants: Vec::new(),
                    })
                    .await;
                if self.state == SessionState::Joined {
                    // The watch coalesces: a fast drop-and-reopen can show
                    // up as a bare `Open`. Catch-up is still mandatory.
                    self.transition(SessionState::Reconnecting);
                }
                if self.state == SessionState::Reconnecting {
                    self.catch_up_pending = true;
                    self.presence_sync_pending = true;
                    let cursor = self
                        .log
                        .latest_confirmed_at()
                        .map(|at| at.minus(self.config.dedupe_tolerance()));
                    self.spawn_history_fetch(cursor, true);
                }
                Flow::Continue
            }
            ConnectionState::Connecting | ConnectionState::Closed => Flow::Continue,
        }
    }

    fn handle_maintenance_tick(&mut self) -> Flow {
        if !self.state.is_active() {
            return Flow::Continue;
        }
        let now = Timestamp::now();
        let evicted = self.presence.evict_stale(now);
        let expired = self.presence.expire_typing(now);
        if evicted || expired {
            self.publish_snapshot();
        }
        Flow::Continue
    }

    async fn handle_heartbeat_tick(&mut self) {
        if self.state.accepts_sends() {
            self.announce_presence().await;
        }
    }

    /// Publishes the local participant's presence entry.
    ///
    /// Failures are logged and dropped: a heartbeat lost to a drop is
    /// covered by the reconnect path's re-announce.
    async fn announce_presence(&self) {
        let entry = PresenceEntry::new(
            self.identity.participant_id.clone(),
            PresenceState::online(self.identity.display_name.clone()).with_typing(self.typing),
        );
        if let Err(error) = self
            .publisher
            .publish(ChannelEvent::PresenceUpdate { participant: entry })
            .await
        {
            tracing::debug!(room_id = %self.room_id, %error, "presence announce dropped");
        }
    }

    fn spawn_insert(
        &self,
        client_id: ClientMessageId,
        body: String,
        attachment_ref: Option<AttachmentRef>,
    ) {
        let directory = Arc::clone(&self.directory);
        let room_id = self.room_id;
        let author = self.identity.participant_id.clone();
        let tx = self.completion_tx.clone();
        let cancelled = self.tasks.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancelled.cancelled() => return,
                result = directory.insert_message(&room_id, &author, &body, attachment_ref) => result,
            };
            let _ = tx.send(Completion::SendFinished { client_id, result });
        });
    }

    fn spawn_history_fetch(&self, since: Option<Timestamp>, catch_up: bool) {
        let directory = Arc::clone(&self.directory);
        let room_id = self.room_id;
        let retry_limit = self.config.history_retry_limit;
        let retry_delay = self.config.reconnect_base_delay();
        let tx = self.completion_tx.clone();
        let cancelled = self.tasks.clone();

        tokio::spawn(async move {
            let mut last_error = RealtimeError::storage_unavailable("history fetch not attempted");
            for attempt in 0..retry_limit {
                if attempt > 0 {
                    let delay = retry_delay * 2u32.saturating_pow(attempt - 1);
                    tokio::select! {
                        _ = cancelled.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                let result = tokio::select! {
                    _ = cancelled.cancelled() => return,
                    result = directory.fetch_messages(&room_id, since) => result,
                };
                match result {
                    Ok(rows) => {
                        let completion = if catch_up {
                            Completion::CatchUpLoaded(Ok(rows))
                        } else {
                            Completion::HistoryLoaded(Ok(rows))
                        };
                        let _ = tx.send(completion);
                        return;
                    }
                    Err(error) => {
                        tracing::debug!(%room_id, attempt, %error, "history fetch attempt failed");
                        last_error = error;
                    }
                }
            }
            let completion = if catch_up {
                Completion::CatchUpLoaded(Err(last_error))
            } else {
                Completion::HistoryLoaded(Err(last_error))
            };
            let _ = tx.send(completion);
        });
    }

    /// Tears down after a fatal error.
    ///
    /// The error is recorded and a final `Closed` snapshot is published so
    /// the consumer can render the failure and rejoin from scratch.
    async fn fatal(&mut self, error: RealtimeError) -> Flow {
        tracing::error!(room_id = %self.room_id, %error, "session torn down");
        self.storage_error = Some(error);
        self.tasks.cancel();
        self.transition(SessionState::Closed);
        self.publish_snapshot();
        self.publisher.close().await;
        Flow::Stop
    }

    /// Tears down on leave. No snapshot is published at or after this
    /// point.
    async fn teardown(&mut self) {
        self.tasks.cancel();
        if self.state.can_transition_to(&SessionState::Leaving) {
            self.transition(SessionState::Leaving);
            self.transition(SessionState::Idle);
        }
        self.publisher.close().await;
        tracing::info!(room_id = %self.room_id, "left room");
    }

    /// Re-enters `Joined` once both the catch-up fetch and the fresh
    /// presence snapshot have been applied. Returns true on the
    /// transition.
    fn try_complete_rejoin(&mut self) -> bool {
        if self.state == SessionState::Reconnecting
            && !self.catch_up_pending
            && !self.presence_sync_pending
        {
            self.transition(SessionState::Joined);
            return true;
        }
        false
    }

    fn transition(&mut self, target: SessionState) {
        match self.state.transition_to(target) {
            Ok(next) => {
                tracing::debug!(room_id = %self.room_id, from = ?self.state, to = ?next, "session state");
                self.state = next;
            }
            Err(error) => tracing::error!(room_id = %self.room_id, %error, "invalid transition"),
        }
    }

    fn publish_snapshot(&self) {
        let _ = self.snapshots.send(RoomSnapshot {
            connection_state: self.connection_state(),
            participants: self.presence.participants(),
            typing_ids: self.presence.typing_ids(),
            messages: self.log.messages().to_vec(),
            storage_error: self.storage_error.clone(),
        });
    }

    fn connection_state(&self) -> ConnectionState {
        match self.state {
            SessionState::Idle | SessionState::Joining => ConnectionState::Connecting,
            SessionState::Joined => ConnectionState::Open,
            SessionState::Reconnecting => ConnectionState::Reconnecting,
            SessionState::Leaving | SessionState::Closed => ConnectionState::Closed,
        }
    }
}
