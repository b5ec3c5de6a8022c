//! Overlay behaviour over real loopback sockets.

use crate::test_utils::*;
use std::sync::Arc;
use std::time::Duration;
use synapsed_mixnet::error::{RoutingError, TransportError};
use synapsed_mixnet::{MixnetConfig, MixnetError, NodeConfig, NodeDirectory, NodeId, Overlay, RoleKind};

/// A listening "Server" overlay with a recording handler, and a non-listening
/// "Client" overlay that knows how to reach it.
async fn overlay_pair(config: MixnetConfig) -> (Arc<Overlay>, Arc<Overlay>, Arc<RecordingHandler>) {
    let (directory, mut listeners) = bind_nodes(&[("Server", RoleKind::Destination)]).await;
    let directory = Arc::new(directory);

    let server = Overlay::new("Server".into(), Arc::clone(&directory), config.clone());
    let handler = Arc::new(RecordingHandler::default());
    server.set_handler(handler.clone());
    server.serve(listeners.remove(0)).unwrap();

    let client = Overlay::new("Client".into(), directory, config);
    (client, server, handler)
}

#[tokio::test]
async fn test_inbound_connection_registered_under_handshake_identity() {
    init_test_logging();
    let (client, server, handler) = overlay_pair(test_config()).await;

    client
        .send_to_node(&NodeId::new("Server"), &plain_message(&["Client", "Server"], 1))
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || handler.count() == 1).await);
    let (origin, message) = handler.received.lock()[0].clone();
    assert_eq!(origin, NodeId::new("Client"));
    assert_eq!(message.encrypted_payload, vec![1]);
    assert!(server.registry().contains(&NodeId::new("Client")));
    assert!(client.registry().contains(&NodeId::new("Server")));

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_sends_share_one_connection() {
    init_test_logging();
    let (client, server, handler) = overlay_pair(test_config()).await;

    let sends = (0..10u8).map(|tag| {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .send_to_node(&NodeId::new("Server"), &plain_message(&["Client", "Server"], tag))
                .await
        })
    });
    for send in futures::future::join_all(sends).await {
        send.unwrap().unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || handler.count() == 10).await);
    assert_eq!(client.registry().len(), 1);
    assert_eq!(server.registry().len(), 1);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_handshake_is_rejected() {
    init_test_logging();
    let (_client, server, handler) = overlay_pair(test_config()).await;
    let addr = server.local_addr().unwrap();

    let empty_path = r#"{"version":1,"fullPath":[],"currentHopIndex":0,"encryptedPayload":"","iv":"","encryptedSymmetricKey":""}"#;
    for record in ["definitely not json", empty_path] {
        let mut stream = send_raw(addr, &[record.to_string()]).await;
        assert!(closed_by_peer(&mut stream, Duration::from_secs(2)).await, "{record}");
    }

    assert_eq!(handler.count(), 0);
    assert!(server.registry().is_empty());
    server.shutdown().await;
}

#[tokio::test]
async fn test_silent_peer_times_out() {
    init_test_logging();
    let config = test_config().with_handshake_timeout(Duration::from_millis(200));
    let (_client, server, _handler) = overlay_pair(config).await;

    let mut stream = send_raw(server.local_addr().unwrap(), &[]).await;
    assert!(closed_by_peer(&mut stream, Duration::from_secs(2)).await);
    assert!(server.registry().is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_newer_connection_supersedes_older() {
    init_test_logging();
    let (_client, server, handler) = overlay_pair(test_config()).await;
    let addr = server.local_addr().unwrap();
    let record = plain_message(&["Peer", "Server"], 1).encode().unwrap();

    let mut first = send_raw(addr, &[record.clone()]).await;
    assert!(wait_until(Duration::from_secs(2), || handler.count() == 1).await);
    let first_id = server.registry().get(&NodeId::new("Peer")).unwrap().id();

    let _second = send_raw(addr, &[record]).await;
    assert!(wait_until(Duration::from_secs(2), || handler.count() == 2).await);

    assert!(closed_by_peer(&mut first, Duration::from_secs(2)).await);
    let current = server.registry().get(&NodeId::new("Peer")).unwrap();
    assert_ne!(current.id(), first_id);
    assert_eq!(server.registry().len(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_peer_claiming_local_identity_is_served_but_not_registered() {
    init_test_logging();
    let (_client, server, handler) = overlay_pair(test_config()).await;
    let record = plain_message(&["Server", "Server"], 1).encode().unwrap();

    let _stream = send_raw(server.local_addr().unwrap(), &[record]).await;
    assert!(wait_until(Duration::from_secs(2), || handler.count() == 1).await);
    assert_eq!(handler.received.lock()[0].0, NodeId::new("Server"));
    assert!(server.registry().is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_finished_connection_tasks_are_reaped() {
    init_test_logging();
    let (_client, server, _handler) = overlay_pair(test_config()).await;
    let addr = server.local_addr().unwrap();

    for _ in 0..50 {
        let mut stream = send_raw(addr, &["garbage".to_string()]).await;
        assert!(closed_by_peer(&mut stream, Duration::from_secs(2)).await);
    }

    // Only the accept loop is left
    assert!(wait_until(Duration::from_secs(2), || server.active_tasks() == 1).await);
    assert!(server.registry().is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_frame_tears_down_connection() {
    init_test_logging();
    let config = test_config().with_max_frame_bytes(256);
    let (_client, server, handler) = overlay_pair(config).await;
    let addr = server.local_addr().unwrap();

    let handshake = plain_message(&["Peer", "Server"], 1).encode().unwrap();
    let oversized = plain_message(&["Peer", "Server"], 2);
    let mut oversized = oversized;
    oversized.encrypted_payload = vec![7; 512];

    let mut stream = send_raw(addr, &[handshake, oversized.encode().unwrap()]).await;
    assert!(closed_by_peer(&mut stream, Duration::from_secs(2)).await);
    assert_eq!(handler.count(), 1);
    assert!(wait_until(Duration::from_secs(1), || server.registry().is_empty()).await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_send_to_unknown_node_fails_before_dialing() {
    init_test_logging();
    let (client, _server, _handler) = overlay_pair(test_config()).await;

    let err = client
        .send_to_node(&NodeId::new("Nobody"), &plain_message(&["Client", "Nobody"], 1))
        .await
        .unwrap_err();
    assert!(matches!(err, MixnetError::Routing(RoutingError::UnknownNode(_))));
    assert!(client.registry().is_empty());
}

#[tokio::test]
async fn test_unreachable_node_reports_connection_unavailable() {
    init_test_logging();
    // Bind then drop to get a port nobody listens on
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let directory = Arc::new(NodeDirectory::from_nodes([NodeConfig::new("Gone", "127.0.0.1", port)]).unwrap());
    let client = Overlay::new("Client".into(), directory, test_config());

    let err = client
        .send_to_node(&NodeId::new("Gone"), &plain_message(&["Client", "Gone"], 1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MixnetError::Transport(TransportError::ConnectionUnavailable { .. })
    ));
    assert!(client.registry().is_empty());
}

#[tokio::test]
async fn test_shutdown_closes_peer_connections() {
    init_test_logging();
    let (client, server, handler) = overlay_pair(test_config()).await;

    client
        .send_to_node(&NodeId::new("Server"), &plain_message(&["Client", "Server"], 1))
        .await
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || handler.count() == 1).await);

    server.shutdown().await;
    assert!(server.registry().is_empty());

    // The client's read loop sees EOF and forgets the connection
    assert!(wait_until(Duration::from_secs(2), || client.registry().is_empty()).await);
    client.shutdown().await;
}
