//! Integration tests for full room sessions.
//!
//! These tests drive complete sessions through the in-memory adapters:
//! 1. A session joins a room, loads history, and announces presence
//! 2. Live events and local sends flow through the single event loop
//! 3. Scripted transport drops exercise reconnect and catch-up
//! 4. Consumers observe everything through the snapshot watch
//!
//! Uses the in-memory hub and directory so sessions run end-to-end without
//! external services.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use studyhall_realtime::adapters::directory::InMemoryRoomDirectory;
use studyhall_realtime::adapters::transport::InMemoryChannelHub;
use studyhall_realtime::application::{RoomIdentity, RoomSession, RoomSessionHandle, RoomSnapshot};
use studyhall_realtime::config::RealtimeConfig;
use studyhall_realtime::domain::foundation::{MessageId, ParticipantId, RoomId};
use studyhall_realtime::ports::{ChannelConnector, ConnectionState, RoomDirectory};

// =============================================================================
// Test Infrastructure
// =============================================================================

fn fast_config() -> RealtimeConfig {
    RealtimeConfig {
        heartbeat_interval_secs: 1,
        typing_quiet_period_secs: 1,
        dedupe_tolerance_secs: 10,
        history_retry_limit: 3,
        reconnect_base_delay_ms: 5,
        reconnect_max_delay_ms: 20,
        reconnect_jitter: 0.0,
    }
}

fn identity(id: &str, name: &str) -> RoomIdentity {
    RoomIdentity::new(ParticipantId::new(id).unwrap(), name)
}

/// Call once per test; `RUST_LOG=studyhall_realtime=debug` shows the
/// session's internal transitions when a test misbehaves.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn join_room(
    hub: &Arc<InMemoryChannelHub>,
    directory: &Arc<InMemoryRoomDirectory>,
    room_id: RoomId,
    who: RoomIdentity,
) -> RoomSessionHandle {
    let connector: Arc<dyn ChannelConnector> = Arc::new(hub.connector());
    let directory: Arc<dyn RoomDirectory> = directory.clone();
    RoomSession::join(connector, directory, fast_config(), room_id, who)
        .await
        .expect("join failed")
}

/// Waits until the latest snapshot satisfies the predicate.
async fn wait_for(
    updates: &mut watch::Receiver<RoomSnapshot>,
    what: &str,
    predicate: impl Fn(&RoomSnapshot) -> bool,
) -> RoomSnapshot {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            {
                let current = updates.borrow_and_update();
                if predicate(&current) {
                    return current.clone();
                }
            }
            updates.changed().await.expect("snapshot stream ended");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

async fn wait_open(updates: &mut watch::Receiver<RoomSnapshot>) {
    wait_for(updates, "open session", |s| s.is_open()).await;
}

// =============================================================================
// Presence
// =============================================================================

#[tokio::test]
async fn participants_see_each_other() {
    init_tracing();
    let hub = InMemoryChannelHub::new();
    let directory = InMemoryRoomDirectory::new(Arc::clone(&hub));
    let room_id = RoomId::new();

    let ada = join_room(&hub, &directory, room_id, identity("ada", "Ada")).await;
    let ben = join_room(&hub, &directory, room_id, identity("ben", "Ben")).await;

    let mut ada_updates = ada.updates();
    let mut ben_updates = ben.updates();

    let seen_by_ada = wait_for(&mut ada_updates, "ben in ada's view", |s| {
        s.participants.len() == 2
    })
    .await;
    let names: Vec<&str> = seen_by_ada
        .participants
        .iter()
        .map(|p| p.display_name.as_str())
        .collect();
    assert_eq!(names, vec!["Ada", "Ben"]);

    wait_for(&mut ben_updates, "ada in ben's view", |s| {
        s.participants.len() == 2
    })
    .await;

    ada.leave().await;
    ben.leave().await;
}

#[tokio::test]
async fn graceful_leave_removes_participant_from_other_views() {
    init_tracing();
    let hub = InMemoryChannelHub::new();
    let directory = InMemoryRoomDirectory::new(Arc::clone(&hub));
    let room_id = RoomId::new();

    let ada = join_room(&hub, &directory, room_id, identity("ada", "Ada")).await;
    let ben = join_room(&hub, &directory, room_id, identity("ben", "Ben")).await;

    let mut ben_updates = ben.updates();
    wait_for(&mut ben_updates, "both present", |s| s.participants.len() == 2).await;

    ada.leave().await;

    let snapshot = wait_for(&mut ben_updates, "ada gone", |s| s.participants.len() == 1).await;
    assert_eq!(snapshot.participants[0].display_name, "Ben");

    ben.leave().await;
}

#[tokio::test]
async fn crashed_participant_is_evicted_by_liveness_timeout() {
    use studyhall_realtime::domain::presence::{PresenceEntry, PresenceState};
    use studyhall_realtime::ports::ChannelEvent;

    init_tracing();
    let hub = InMemoryChannelHub::new();
    let directory = InMemoryRoomDirectory::new(Arc::clone(&hub));
    let room_id = RoomId::new();

    // A raw client announces itself and then crashes: the forced drop
    // leaves its presence entry behind on the hub.
    let crasher = hub.connector();
    let conn = crasher.connect(&room_id.topic()).await.unwrap();
    conn.publisher
        .publish(ChannelEvent::PresenceUpdate {
            participant: PresenceEntry::new(
                ParticipantId::new("ghost").unwrap(),
                PresenceState::online("Ghost"),
            ),
        })
        .await
        .unwrap();

    let ben = join_room(&hub, &directory, room_id, identity("ben", "Ben")).await;
    let mut ben_updates = ben.updates();
    wait_for(&mut ben_updates, "ghost visible", |s| s.participants.len() == 2).await;

    hub.drop_connections(&room_id.topic());

    // Ben reconnects and the sync still lists the ghost; nothing ever
    // refreshes it, so ben's local liveness eviction clears it after two
    // missed heartbeats.
    let snapshot = wait_for(&mut ben_updates, "ghost evicted", |s| {
        s.is_open() && s.participants.len() == 1
    })
    .await;
    assert_eq!(snapshot.participants[0].display_name, "Ben");

    ben.leave().await;
}

// =============================================================================
// Typing Indicators
// =============================================================================

#[tokio::test]
async fn typing_indicator_propagates_and_clears_on_stop() {
    init_tracing();
    let hub = InMemoryChannelHub::new();
    let directory = InMemoryRoomDirectory::new(Arc::clone(&hub));
    let room_id = RoomId::new();

    let ada = join_room(&hub, &directory, room_id, identity("ada", "Ada")).await;
    let ben = join_room(&hub, &directory, room_id, identity("ben", "Ben")).await;

    let mut ada_updates = ada.updates();
    let mut ben_updates = ben.updates();
    wait_open(&mut ada_updates).await;
    wait_for(&mut ben_updates, "ada present", |s| s.participants.len() == 2).await;

    ada.set_typing(true);

    let snapshot = wait_for(&mut ben_updates, "ada typing", |s| !s.typing_ids.is_empty()).await;
    assert_eq!(snapshot.typing_ids, vec![ParticipantId::new("ada").unwrap()]);

    ada.set_typing(false);

    let snapshot = wait_for(&mut ben_updates, "typing stopped", |s| s.typing_ids.is_empty()).await;
    assert_eq!(snapshot.participants.len(), 2);

    ada.leave().await;
    ben.leave().await;
}

#[tokio::test]
async fn stale_typing_flag_expires_while_participant_stays() {
    use studyhall_realtime::domain::presence::{PresenceEntry, PresenceState};
    use studyhall_realtime::ports::ChannelEvent;

    init_tracing();
    let hub = InMemoryChannelHub::new();
    let directory = InMemoryRoomDirectory::new(Arc::clone(&hub));
    let room_id = RoomId::new();

    // A long heartbeat keeps liveness eviction far away so only the
    // typing quiet period is in play.
    let config = RealtimeConfig {
        heartbeat_interval_secs: 30,
        ..fast_config()
    };
    let connector: Arc<dyn ChannelConnector> = Arc::new(hub.connector());
    let ben = RoomSession::join(
        connector,
        Arc::clone(&directory) as Arc<dyn RoomDirectory>,
        config,
        room_id,
        identity("ben", "Ben"),
    )
    .await
    .expect("join failed");
    let mut ben_updates = ben.updates();
    wait_open(&mut ben_updates).await;

    // A raw client announces typing once and then stalls: no further
    // typing heartbeats, but the connection stays up.
    let stalled = hub.connector();
    let conn = stalled.connect(&room_id.topic()).await.unwrap();
    conn.publisher
        .publish(ChannelEvent::PresenceUpdate {
            participant: PresenceEntry::new(
                ParticipantId::new("stalled").unwrap(),
                PresenceState::online("Stalled").with_typing(true),
            ),
        })
        .await
        .unwrap();

    wait_for(&mut ben_updates, "stalled typing", |s| !s.typing_ids.is_empty()).await;

    // The quiet period lapses with no further typing heartbeat; the flag
    // clears even though no stop event ever arrives.
    let snapshot = wait_for(&mut ben_updates, "typing expired", |s| s.typing_ids.is_empty()).await;
    assert!(snapshot
        .participants
        .iter()
        .any(|p| p.display_name == "Stalled"));

    ben.leave().await;
}

// =============================================================================
// Message Flow
// =============================================================================

#[tokio::test]
async fn history_and_live_inserts_form_one_ordered_log() {
    init_tracing();
    let hub = InMemoryChannelHub::new();
    let directory = InMemoryRoomDirectory::new(Arc::clone(&hub));
    let room_id = RoomId::new();
    let seed_author = ParticipantId::new("seed").unwrap();
    directory
        .insert_message(&room_id, &seed_author, "from history", None)
        .await
        .unwrap();

    let ada = join_room(&hub, &directory, room_id, identity("ada", "Ada")).await;
    let mut ada_updates = ada.updates();
    wait_open(&mut ada_updates).await;

    // A pending "hi" collapses into its confirmed echo; another author's
    // live insert appends after it.
    ada.send("hi").await.unwrap();
    wait_for(&mut ada_updates, "hi confirmed", |s| {
        s.confirmed_messages().count() == 2
    })
    .await;

    directory
        .insert_message(&room_id, &seed_author, "live afterwards", None)
        .await
        .unwrap();

    let snapshot = wait_for(&mut ada_updates, "full log", |s| {
        s.confirmed_messages().count() == 3
    })
    .await;
    let bodies: Vec<&str> = snapshot.messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["from history", "hi", "live afterwards"]);
    assert_eq!(snapshot.messages.len(), 3);

    ada.leave().await;
}

#[tokio::test]
async fn sends_are_visible_to_other_participants() {
    init_tracing();
    let hub = InMemoryChannelHub::new();
    let directory = InMemoryRoomDirectory::new(Arc::clone(&hub));
    let room_id = RoomId::new();

    let ada = join_room(&hub, &directory, room_id, identity("ada", "Ada")).await;
    let ben = join_room(&hub, &directory, room_id, identity("ben", "Ben")).await;
    let mut ada_updates = ada.updates();
    let mut ben_updates = ben.updates();
    wait_open(&mut ada_updates).await;
    wait_open(&mut ben_updates).await;

    ada.send("hello ben").await.unwrap();

    let snapshot = wait_for(&mut ben_updates, "ada's message", |s| !s.messages.is_empty()).await;
    assert_eq!(snapshot.messages[0].body, "hello ben");
    assert!(snapshot.messages[0].is_confirmed());
    // Ben never sent anything; the entry arrived confirmed, no client id.
    assert_eq!(snapshot.messages[0].client_id, None);

    ada.leave().await;
    ben.leave().await;
}

// =============================================================================
// Reconnect
// =============================================================================

#[tokio::test]
async fn drop_during_insert_burst_loses_and_duplicates_nothing() {
    init_tracing();
    let hub = InMemoryChannelHub::new();
    let directory = InMemoryRoomDirectory::new(Arc::clone(&hub));
    let room_id = RoomId::new();
    let writer = ParticipantId::new("writer").unwrap();

    let ada = join_room(&hub, &directory, room_id, identity("ada", "Ada")).await;
    let mut ada_updates = ada.updates();
    wait_open(&mut ada_updates).await;

    // Another client keeps writing while ada's transport is cut mid-burst.
    for i in 0..50 {
        directory
            .insert_message(&room_id, &writer, &format!("burst {i}"), None)
            .await
            .unwrap();
        if i == 24 {
            hub.drop_connections(&room_id.topic());
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let snapshot = wait_for(&mut ada_updates, "all 50 messages", |s| {
        s.is_open() && s.messages.len() == 50
    })
    .await;

    assert!(snapshot.messages.iter().all(|m| m.is_confirmed()));
    let mut ids: Vec<MessageId> = snapshot
        .messages
        .iter()
        .filter_map(|m| m.server_id)
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 50, "every insert exactly once");

    ada.leave().await;
}

#[tokio::test]
async fn rejoin_waits_for_catch_up_and_fresh_presence() {
    use studyhall_realtime::domain::presence::{PresenceEntry, PresenceState};
    use studyhall_realtime::ports::ChannelEvent;

    init_tracing();
    let hub = InMemoryChannelHub::new();
    let directory = InMemoryRoomDirectory::new(Arc::clone(&hub));
    let room_id = RoomId::new();
    let writer = ParticipantId::new("writer").unwrap();

    // A long reconnect delay keeps the transport down while the room
    // changes underneath.
    let config = RealtimeConfig {
        reconnect_base_delay_ms: 500,
        reconnect_max_delay_ms: 500,
        ..fast_config()
    };
    let connector: Arc<dyn ChannelConnector> = Arc::new(hub.connector());
    let ada = RoomSession::join(
        connector,
        Arc::clone(&directory) as Arc<dyn RoomDirectory>,
        config,
        room_id,
        identity("ada", "Ada"),
    )
    .await
    .expect("join failed");
    let mut ada_updates = ada.updates();
    wait_open(&mut ada_updates).await;

    // While ada is down, a message lands and a new participant announces
    // itself.
    hub.drop_connections(&room_id.topic());
    wait_for(&mut ada_updates, "reconnecting", |s| {
        s.connection_state == ConnectionState::Reconnecting
    })
    .await;

    let late = hub.connector();
    let conn = late.connect(&room_id.topic()).await.unwrap();
    conn.publisher
        .publish(ChannelEvent::PresenceUpdate {
            participant: PresenceEntry::new(
                ParticipantId::new("late").unwrap(),
                PresenceState::online("Late"),
            ),
        })
        .await
        .unwrap();
    directory
        .insert_message(&room_id, &writer, "while down", None)
        .await
        .unwrap();

    // The first snapshot reporting Open must already reflect both
    // resynchronizations: the caught-up message and the refreshed
    // presence roster.
    let snapshot = wait_for(&mut ada_updates, "resynchronized open", |s| s.is_open()).await;
    assert!(snapshot.messages.iter().any(|m| m.body == "while down"));
    assert!(snapshot
        .participants
        .iter()
        .any(|p| p.display_name == "Late"));

    ada.leave().await;
}

#[tokio::test]
async fn session_reports_reconnecting_and_rejects_sends_while_down() {
    init_tracing();
    let hub = InMemoryChannelHub::new();
    let directory = InMemoryRoomDirectory::new(Arc::clone(&hub));
    let room_id = RoomId::new();

    let ada = join_room(&hub, &directory, room_id, identity("ada", "Ada")).await;
    let mut ada_updates = ada.updates();
    wait_open(&mut ada_updates).await;

    // Hold the transport down so Reconnecting is observable.
    hub.fail_next_connects(u32::MAX);
    hub.drop_connections(&room_id.topic());

    wait_for(&mut ada_updates, "reconnecting", |s| {
        s.connection_state == ConnectionState::Reconnecting
    })
    .await;

    let result = ada.send("into the void").await;
    assert!(result.is_err());

    // Let it back up; the session resynchronizes and sends work again.
    hub.fail_next_connects(0);
    wait_open(&mut ada_updates).await;
    ada.send("back online").await.unwrap();

    wait_for(&mut ada_updates, "post-reconnect send", |s| {
        s.messages.iter().any(|m| m.is_confirmed())
    })
    .await;

    ada.leave().await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn leave_during_pending_join_emits_no_snapshot_afterward() {
    init_tracing();
    let hub = InMemoryChannelHub::new();
    let directory = InMemoryRoomDirectory::new(Arc::clone(&hub));
    let room_id = RoomId::new();

    // Pin the session in Joining: the first history fetch fails and the
    // retry sleeps far longer than the test runs.
    directory.fail_next_fetches(1);
    let config = RealtimeConfig {
        reconnect_base_delay_ms: 60_000,
        reconnect_max_delay_ms: 60_000,
        ..fast_config()
    };
    let connector: Arc<dyn ChannelConnector> = Arc::new(hub.connector());
    let handle = RoomSession::join(
        connector,
        Arc::clone(&directory) as Arc<dyn RoomDirectory>,
        config,
        room_id,
        identity("ada", "Ada"),
    )
    .await
    .expect("join failed");

    let mut updates = handle.updates();
    handle.leave().await;

    // Drain whatever was published before the leave, then confirm nothing
    // arrives afterward and the session never reported itself open.
    let last = updates.borrow_and_update().clone();
    assert_ne!(last.connection_state, ConnectionState::Open);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!updates.has_changed().unwrap_or(false));
    assert_ne!(updates.borrow().connection_state, ConnectionState::Open);
    assert_eq!(hub.connection_count(&room_id.topic()), 0);
}

#[tokio::test]
async fn dropping_the_handle_tears_the_session_down() {
    init_tracing();
    let hub = InMemoryChannelHub::new();
    let directory = InMemoryRoomDirectory::new(Arc::clone(&hub));
    let room_id = RoomId::new();

    let ada = join_room(&hub, &directory, room_id, identity("ada", "Ada")).await;
    let mut updates = ada.updates();
    wait_open(&mut updates).await;

    drop(ada);

    tokio::time::timeout(Duration::from_secs(5), async {
        while hub.connection_count(&room_id.topic()) > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session held its connection after handle drop");
}
