//! Property tests for onion construction and peeling.

use crate::test_utils::*;
use proptest::prelude::*;
use std::sync::OnceLock;
use synapsed_mixnet::{HopPosition, KeyDirectory, NodeId, OnionCodec, WireMessage};

const NODES: &[&str] = &["N0", "N1", "N2", "N3"];

/// Key generation dominates runtime, so every case shares one directory.
fn keys() -> &'static KeyDirectory {
    static KEYS: OnceLock<KeyDirectory> = OnceLock::new();
    KEYS.get_or_init(|| KeyDirectory::generate(&ids(NODES), TEST_KEY_BITS).unwrap())
}

prop_compose! {
    fn arb_path()(indices in prop::collection::vec(0..NODES.len(), 1..=4)) -> Vec<NodeId> {
        indices.into_iter().map(|i| NodeId::new(NODES[i])).collect()
    }
}

/// Walks `message` along its path the way the relays do, returning the
/// destination's plaintext and the hop indices seen at each relay.
fn walk(mut message: WireMessage) -> (Vec<u8>, Vec<usize>) {
    let keys = keys();
    let mut indices = Vec::new();

    while !message.is_final_hop() {
        let me = message.current_recipient().unwrap().clone();
        synapsed_mixnet::hop::validate(&message, &me, HopPosition::Relay).unwrap();
        indices.push(message.current_hop_index());

        let (recovered, mut peeled) = OnionCodec::peel(message, &me, &keys.private_key_of(&me).unwrap()).unwrap();
        let layer = OnionCodec::open_relay_layer(&recovered).unwrap();
        assert_eq!(Some(&layer.next_hop_id), peeled.next_hop());
        peeled.apply_layer(layer);
        peeled.advance_hop().unwrap();
        message = peeled;
    }

    let me = message.current_recipient().unwrap().clone();
    synapsed_mixnet::hop::validate(&message, &me, HopPosition::Final).unwrap();
    indices.push(message.current_hop_index());
    let (plaintext, _) = OnionCodec::peel(message, &me, &keys.private_key_of(&me).unwrap()).unwrap();
    (plaintext, indices)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: peeling every layer in path order recovers the plaintext
    #[test]
    fn prop_onion_round_trip(
        path in arb_path(),
        plaintext in prop::collection::vec(any::<u8>(), 0..2048)
    ) {
        let message = OnionCodec::build(&plaintext, &path, |id| keys().public_key_of(id)).unwrap();
        prop_assert_eq!(message.full_path(), path.as_slice());

        let (recovered, _) = walk(message);
        prop_assert_eq!(recovered, plaintext);
    }

    /// Property: the hop index rises by exactly one per peel
    #[test]
    fn prop_hop_index_is_monotonic(path in arb_path()) {
        let message = OnionCodec::build(b"tick", &path, |id| keys().public_key_of(id)).unwrap();
        let (_, indices) = walk(message);
        prop_assert_eq!(indices, (0..path.len()).collect::<Vec<_>>());
    }

    /// Property: the encoded record survives the wire unchanged
    #[test]
    fn prop_wire_record_is_stable(path in arb_path(), plaintext in "[ -~]{0,64}") {
        let message = OnionCodec::build(plaintext.as_bytes(), &path, |id| keys().public_key_of(id)).unwrap();
        let line = message.encode().unwrap();
        prop_assert!(!line.contains('\n'));
        prop_assert_eq!(WireMessage::decode(&line).unwrap(), message);
    }
}
