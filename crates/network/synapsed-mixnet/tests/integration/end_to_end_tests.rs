//! Full message journeys through running nodes.

use crate::test_utils::*;
use std::collections::HashSet;
use std::time::Duration;
use synapsed_mixnet::{NodeId, RoleKind};

const NETWORK: &[(&str, RoleKind)] = &[
    ("Alice", RoleKind::Client),
    ("MixA", RoleKind::Mix),
    ("MixB", RoleKind::Mix),
    ("Dest", RoleKind::Destination),
];

#[tokio::test]
async fn test_hello_mixnet_through_two_mixes() {
    init_test_logging();
    let network = TestNetwork::start(NETWORK).await;
    let mut inbox = network.node("Dest").take_deliveries().unwrap();

    network
        .node("Alice")
        .client()
        .unwrap()
        .send("hello mixnet", &NodeId::new("Dest"), &ids(&["MixA", "MixB"]))
        .await
        .unwrap();

    let delivered = recv_within(&mut inbox, Duration::from_secs(10)).await.expect("message delivered");
    assert_eq!(delivered.content, "hello mixnet");
    assert_eq!(delivered.full_path, ids(&["MixA", "MixB", "Dest"]));

    for mix in ["MixA", "MixB"] {
        let stats = network.node(mix).mix().unwrap().engine().stats();
        assert_eq!(stats.enqueued(), 1, "{mix}");
        assert!(wait_until(Duration::from_secs(1), || stats.forwarded() == 1).await, "{mix}");
    }

    network.shutdown().await;
}

#[tokio::test]
async fn test_batch_of_messages_all_arrive() {
    init_test_logging();
    let network = TestNetwork::start(NETWORK).await;
    let mut inbox = network.node("Dest").take_deliveries().unwrap();
    let client = network.node("Alice").client().unwrap();

    let sent: HashSet<String> = (0..8).map(|i| format!("message {i}")).collect();
    for content in &sent {
        client
            .send(content, &NodeId::new("Dest"), &ids(&["MixA", "MixB"]))
            .await
            .unwrap();
    }

    let mut received = HashSet::new();
    while received.len() < sent.len() {
        let delivered = recv_within(&mut inbox, Duration::from_secs(10)).await.expect("all messages delivered");
        received.insert(delivered.content);
    }
    assert_eq!(received, sent);

    network.shutdown().await;
}

#[tokio::test]
async fn test_repeated_first_hop_still_delivers() {
    init_test_logging();
    let network = TestNetwork::start(&[
        ("Alice", RoleKind::Client),
        ("MixA", RoleKind::Mix),
        ("Dest", RoleKind::Destination),
    ])
    .await;
    let mut inbox = network.node("Dest").take_deliveries().unwrap();

    network
        .node("Alice")
        .client()
        .unwrap()
        .send("twice through MixA", &NodeId::new("Dest"), &ids(&["MixA", "MixA"]))
        .await
        .unwrap();

    let delivered = recv_within(&mut inbox, Duration::from_secs(10)).await.expect("message delivered");
    assert_eq!(delivered.content, "twice through MixA");
    assert_eq!(delivered.full_path, ids(&["MixA", "MixA", "Dest"]));

    let stats = network.node("MixA").mix().unwrap().engine().stats();
    assert_eq!(stats.enqueued(), 2);
    assert!(wait_until(Duration::from_secs(1), || stats.forwarded() == 2).await);

    network.shutdown().await;
}

#[tokio::test]
async fn test_direct_delivery_without_relays() {
    init_test_logging();
    let network = TestNetwork::start(&[("Alice", RoleKind::Client), ("Dest", RoleKind::Destination)]).await;
    let mut inbox = network.node("Dest").take_deliveries().unwrap();

    network
        .node("Alice")
        .client()
        .unwrap()
        .send("straight there", &NodeId::new("Dest"), &[])
        .await
        .unwrap();

    let delivered = recv_within(&mut inbox, Duration::from_secs(5)).await.unwrap();
    assert_eq!(delivered.content, "straight there");

    network.shutdown().await;
}

#[tokio::test]
async fn test_tampered_message_is_dropped_at_first_mix() {
    init_test_logging();
    let network = TestNetwork::start(NETWORK).await;
    let mut inbox = network.node("Dest").take_deliveries().unwrap();

    let mut tampered = network.build("secret", &["MixA", "MixB", "Dest"]);
    tampered.encrypted_payload[0] ^= 0x01;
    let intact = network.build("intact", &["MixA", "MixB", "Dest"]);

    // Same connection: the bad record must not take the good one down with it
    let _stream = send_raw(
        network.addr("MixA"),
        &[tampered.encode().unwrap(), intact.encode().unwrap()],
    )
    .await;

    let delivered = recv_within(&mut inbox, Duration::from_secs(10)).await.unwrap();
    assert_eq!(delivered.content, "intact");
    assert!(recv_within(&mut inbox, Duration::from_millis(300)).await.is_none());

    let stats = network.node("MixA").mix().unwrap().engine().stats();
    assert_eq!(stats.enqueued(), 1);

    network.shutdown().await;
}

#[tokio::test]
async fn test_misrouted_message_is_not_relayed() {
    init_test_logging();
    let network = TestNetwork::start(NETWORK).await;
    let mut inbox = network.node("Dest").take_deliveries().unwrap();

    // Addressed to MixA, handed to MixB
    let message = network.build("wrong door", &["MixA", "MixB", "Dest"]);
    let _stream = send_raw(network.addr("MixB"), &[message.encode().unwrap()]).await;

    assert!(recv_within(&mut inbox, Duration::from_millis(500)).await.is_none());
    let engine = network.node("MixB").mix().unwrap().engine();
    assert_eq!(engine.stats().enqueued(), 0);
    assert_eq!(engine.pending(), 0);

    network.shutdown().await;
}

#[tokio::test]
async fn test_destination_rejects_early_delivery() {
    init_test_logging();
    let network = TestNetwork::start(NETWORK).await;
    let mut inbox = network.node("Dest").take_deliveries().unwrap();

    // Claims Dest as the current hop without the mixes' layers removed
    let message = network.build("skipped the mixes", &["Dest", "MixA", "Dest"]);
    let _stream = send_raw(network.addr("Dest"), &[message.encode().unwrap()]).await;

    assert!(recv_within(&mut inbox, Duration::from_millis(500)).await.is_none());

    network.shutdown().await;
}

#[tokio::test]
async fn test_node_shutdown_stops_engine_and_overlay() {
    init_test_logging();
    let network = TestNetwork::start(NETWORK).await;
    let mix = network.node("MixA");
    mix.shutdown().await;

    assert!(mix.mix().unwrap().engine().is_closed());
    assert!(mix.overlay().is_shutting_down());
    assert!(mix.overlay().registry().is_empty());

    network.shutdown().await;
}
