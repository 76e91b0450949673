//! Transport service tests driven through registry queues

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::config::{ReplayConfig, TransportConfig};
use crate::error::SyncError;
use crate::event_store::{Event, EventEnvelope, EventStore};
use crate::replay::{OptimizedReplayManager, SnapshotManager};
use crate::test_utils::{
    counter_reducer, memory_store, recv_message_of_type, recv_timeout, seed_events, try_drain,
    RecvTimeoutError, DEFAULT_TEST_TIMEOUT, SHORT_TEST_TIMEOUT,
};

async fn socket_service(config: &TransportConfig) -> (Arc<EventStore>, Arc<SocketService>) {
    let (_, store) = memory_store(0);
    let snapshots = Arc::new(SnapshotManager::new(
        store.clone(),
        counter_reducer(),
        ReplayConfig {
            default_page_size: 4,
            ..Default::default()
        },
    ));
    let replay = Arc::new(OptimizedReplayManager::new(snapshots));
    let service = Arc::new(SocketService::new(replay, config));
    service.start().await.unwrap();
    (store, service)
}

fn quiet_config() -> TransportConfig {
    TransportConfig {
        heartbeat_interval: Duration::from_secs(3600),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_ping_gets_pong() {
    let (_, service) = socket_service(&quiet_config()).await;
    let (client_id, mut rx) = service.registry().register(BTreeSet::new());

    service.handle_client_message(&client_id, r#"{"type":"ping"}"#).await;
    let reply = recv_timeout(&mut rx, DEFAULT_TEST_TIMEOUT).await.unwrap();
    assert_eq!(reply.type_name(), "pong");
}

#[tokio::test]
async fn test_unparseable_frame_gets_error_and_stays_connected() {
    let (_, service) = socket_service(&quiet_config()).await;
    let (client_id, mut rx) = service.registry().register(BTreeSet::new());

    service.handle_client_message(&client_id, "not json").await;
    service
        .handle_client_message(&client_id, r#"{"type":"launch_rockets"}"#)
        .await;

    let first = recv_timeout(&mut rx, DEFAULT_TEST_TIMEOUT).await.unwrap();
    let second = recv_timeout(&mut rx, DEFAULT_TEST_TIMEOUT).await.unwrap();
    assert_eq!(first.type_name(), "error");
    assert_eq!(second.type_name(), "error");
    assert!(service.registry().contains(&client_id));
}

#[tokio::test]
async fn test_sync_request_replies_with_state() {
    let (store, service) = socket_service(&quiet_config()).await;
    seed_events(&store, "room-1", 3).await;
    let (client_id, mut rx) = service.registry().register(BTreeSet::new());

    service
        .handle_client_message(&client_id, r#"{"type":"sync_request","payload":{"actorId":"room-1"}}"#)
        .await;

    match recv_timeout(&mut rx, DEFAULT_TEST_TIMEOUT).await.unwrap() {
        ServerMessage::SyncResponse(sync) => {
            assert_eq!(sync.actor_id, "room-1");
            assert_eq!(sync.version, 3);
            assert_eq!(sync.state["count"], 3);
        }
        other => panic!("expected sync_response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_incremental_sync_request_uses_page_size() {
    let (store, service) = socket_service(&quiet_config()).await;
    seed_events(&store, "room-1", 10).await;
    let (client_id, mut rx) = service.registry().register(BTreeSet::new());

    service
        .handle_client_message(
            &client_id,
            r#"{"type":"incremental_sync_request","payload":{"actorId":"room-1","knownVersion":2}}"#,
        )
        .await;

    match recv_timeout(&mut rx, DEFAULT_TEST_TIMEOUT).await.unwrap() {
        ServerMessage::IncrementalSyncResponse(page) => {
            let versions: Vec<u64> = page.events.iter().map(|e| e.version).collect();
            assert_eq!(versions, vec![3, 4, 5, 6]);
            assert!(page.has_more);
            assert_eq!(page.next_version, 6);
            assert_eq!(page.latest_version, 10);
        }
        other => panic!("expected incremental_sync_response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_incremental_sync_request_rejects_zero_page() {
    let (_, service) = socket_service(&quiet_config()).await;
    let (client_id, mut rx) = service.registry().register(BTreeSet::new());

    service
        .handle_client_message(
            &client_id,
            r#"{"type":"incremental_sync_request","payload":{"actorId":"a","knownVersion":0,"maxEvents":0}}"#,
        )
        .await;
    let reply = recv_timeout(&mut rx, DEFAULT_TEST_TIMEOUT).await.unwrap();
    assert_eq!(reply.type_name(), "error");
}

#[tokio::test]
async fn test_subscribe_scopes_broadcasts() {
    let (_, service) = socket_service(&quiet_config()).await;
    let (client_id, mut rx) = service.registry().register(BTreeSet::new());

    service
        .handle_client_message(
            &client_id,
            r#"{"type":"subscribe","payload":{"channelId":"c1","actorId":"room-2"}}"#,
        )
        .await;
    assert_eq!(
        service.registry().client_info(&client_id).unwrap().actor_filter,
        BTreeSet::from(["room-2".to_string()])
    );

    let registry = service.registry();
    let skipped = EventEnvelope::seal(Event::new("room-1", "x", json!({}), 1));
    let wanted = EventEnvelope::seal(Event::new("room-2", "x", json!({}), 1));
    assert_eq!(registry.broadcast_event(&skipped), 0);
    assert_eq!(registry.broadcast_event(&wanted), 1);

    let got = recv_timeout(&mut rx, DEFAULT_TEST_TIMEOUT).await.unwrap();
    assert_eq!(got.actor_id(), Some("room-2"));

    service
        .handle_client_message(
            &client_id,
            r#"{"type":"unsubscribe","payload":{"channelId":"c1","actorId":"room-2"}}"#,
        )
        .await;
    assert!(service.registry().client_info(&client_id).unwrap().actor_filter.is_empty());
    assert!(try_drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_subscribe_without_actor_is_silent() {
    let (_, service) = socket_service(&quiet_config()).await;
    let (client_id, mut rx) = service.registry().register(BTreeSet::new());

    service
        .handle_client_message(&client_id, r#"{"type":"subscribe","payload":{"channelId":"c1"}}"#)
        .await;
    assert_eq!(
        recv_timeout(&mut rx, SHORT_TEST_TIMEOUT).await,
        Err(RecvTimeoutError::Timeout)
    );
    assert!(service.registry().client_info(&client_id).unwrap().actor_filter.is_empty());
}

#[tokio::test]
async fn test_socket_shutdown_clears_registry() {
    let (_, service) = socket_service(&quiet_config()).await;
    let (_, mut rx) = service.registry().register(BTreeSet::new());
    assert_eq!(service.connection_info().await.active_connections, 1);

    service.shutdown().await.unwrap();
    assert!(!service.is_running());
    assert_eq!(service.connection_info().await.active_connections, 0);
    assert_eq!(
        recv_timeout(&mut rx, DEFAULT_TEST_TIMEOUT).await,
        Err(RecvTimeoutError::Closed)
    );

    // Restart is allowed after a shutdown.
    service.start().await.unwrap();
    assert!(service.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_reaches_every_client() {
    let config = TransportConfig {
        heartbeat_interval: Duration::from_secs(1),
        ..Default::default()
    };
    let (_, service) = socket_service(&config).await;
    let (_, mut a) = service.registry().register(BTreeSet::new());
    let (_, mut b) = service.registry().register(BTreeSet::from(["room-1".to_string()]));

    tokio::time::advance(Duration::from_millis(1100)).await;
    assert_eq!(recv_timeout(&mut a, DEFAULT_TEST_TIMEOUT).await.unwrap().type_name(), "heartbeat");
    assert_eq!(recv_timeout(&mut b, DEFAULT_TEST_TIMEOUT).await.unwrap().type_name(), "heartbeat");

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stream_open_requires_running() {
    let service = StreamService::new(&quiet_config());
    assert!(matches!(service.open(BTreeSet::new()), Err(SyncError::Transport(_))));
}

#[tokio::test]
async fn test_stream_presence_on_open_and_drop() {
    let service = StreamService::new(&quiet_config());
    service.start().await.unwrap();
    let (watcher_id, mut watcher) = service.registry().register(BTreeSet::new());

    let sse = service.open(BTreeSet::from(["room-1".to_string()])).unwrap();
    assert_eq!(service.registry().len(), 2);

    match recv_message_of_type(&mut watcher, "presence", DEFAULT_TEST_TIMEOUT).await.unwrap() {
        ServerMessage::Presence(update) => {
            assert_ne!(update.client_id, watcher_id);
            assert_eq!(update.status, PresenceStatus::Online);
        }
        other => panic!("expected presence, got {other:?}"),
    }

    drop(sse);
    assert_eq!(service.registry().len(), 1);
    match recv_message_of_type(&mut watcher, "presence", DEFAULT_TEST_TIMEOUT).await.unwrap() {
        ServerMessage::Presence(update) => assert_eq!(update.status, PresenceStatus::Offline),
        other => panic!("expected presence, got {other:?}"),
    }
}

#[tokio::test]
async fn test_transport_trait_send_to_unknown_client() {
    let service = StreamService::new(&quiet_config());
    service.start().await.unwrap();
    let transport: &dyn Transport = &service;

    assert_eq!(transport.kind(), TransportKind::Sse);
    let err = transport
        .send_to("missing", ServerMessage::heartbeat())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ClientNotFound(_)));
}
