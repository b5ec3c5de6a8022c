//! Property tests for batch mixing.

use crate::test_utils::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::HashSet;
use synapsed_mixnet::{CycleReport, Forwarder, MixEngine, NodeId, Result, WireMessage};

#[derive(Default)]
struct CollectingForwarder {
    sent: Mutex<Vec<WireMessage>>,
}

#[async_trait]
impl Forwarder for CollectingForwarder {
    async fn forward(&self, _next_hop: &NodeId, message: &WireMessage) -> Result<()> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

fn queued(tag: u16) -> WireMessage {
    let mut message = WireMessage::new(ids(&["Mix", "Dest"]), tag.to_be_bytes().to_vec(), vec![], vec![]);
    message.advance_hop().unwrap();
    message
}

prop_compose! {
    /// A batch size together with an arbitrary permutation of its positions
    fn arb_permutation()(count in 0usize..48)
        (order in Just((0..count).collect::<Vec<usize>>()).prop_shuffle()) -> Vec<usize> {
        order
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: a cycle forwards a permutation of exactly what was queued
    #[test]
    fn prop_cycle_is_a_permutation(count in 0usize..64) {
        let engine = MixEngine::new("Mix".into());
        for tag in 0..count {
            engine.enqueue(queued(tag as u16)).unwrap();
        }

        let forwarder = CollectingForwarder::default();
        let report = tokio_test::block_on(engine.dispatch_cycle(&forwarder));
        prop_assert_eq!(report, CycleReport { batch_size: count, forwarded: count, dropped: 0 });
        prop_assert_eq!(engine.pending(), 0);

        let sent = forwarder.sent.lock();
        let tags: HashSet<Vec<u8>> = sent.iter().map(|m| m.encrypted_payload.clone()).collect();
        prop_assert_eq!(sent.len(), count);
        prop_assert_eq!(tags.len(), count);
        for message in sent.iter() {
            prop_assert_eq!(message.current_recipient().unwrap(), &NodeId::new("Dest"));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: whatever the permutation, identity included, a cycle ships
    /// exactly the queued multiset
    #[test]
    fn prop_any_order_preserves_the_batch(order in arb_permutation()) {
        let engine = MixEngine::new("Mix".into());
        for tag in 0..order.len() {
            engine.enqueue(queued(tag as u16)).unwrap();
        }

        let forwarder = CollectingForwarder::default();
        let permute = |batch: &mut [WireMessage]| {
            let permuted: Vec<WireMessage> = order.iter().map(|&i| batch[i].clone()).collect();
            batch.clone_from_slice(&permuted);
        };
        let report = tokio_test::block_on(engine.dispatch_cycle_with(&forwarder, permute));
        prop_assert_eq!(report.forwarded, order.len());

        let sent: Vec<u16> = forwarder
            .sent
            .lock()
            .iter()
            .map(|m| u16::from_be_bytes([m.encrypted_payload[0], m.encrypted_payload[1]]))
            .collect();
        let expected: Vec<u16> = order.iter().map(|&i| i as u16).collect();
        prop_assert_eq!(&sent, &expected);

        let mut sorted = sent.clone();
        sorted.sort_unstable();
        prop_assert_eq!(sorted, (0..order.len() as u16).collect::<Vec<u16>>());
    }
}

#[test]
fn test_shuffle_reorders_large_batches() {
    // 200 messages coming out in arrival order on every one of 5 cycles has
    // probability (1/200!)^5; any run producing it is broken.
    let engine = MixEngine::new("Mix".into());
    let forwarder = CollectingForwarder::default();
    let mut reordered = false;

    for _ in 0..5 {
        for tag in 0..200u16 {
            engine.enqueue(queued(tag)).unwrap();
        }
        forwarder.sent.lock().clear();
        tokio_test::block_on(engine.dispatch_cycle(&forwarder));

        let order: Vec<u16> = forwarder
            .sent
            .lock()
            .iter()
            .map(|m| u16::from_be_bytes([m.encrypted_payload[0], m.encrypted_payload[1]]))
            .collect();
        if order != (0..200).collect::<Vec<_>>() {
            reordered = true;
        }
    }
    assert!(reordered);
}

#[test]
fn test_single_message_batch_is_forwarded() {
    let engine = MixEngine::new("Mix".into());
    engine.enqueue(queued(1)).unwrap();

    let forwarder = CollectingForwarder::default();
    let report = tokio_test::block_on(engine.dispatch_cycle(&forwarder));
    assert_eq!(report.forwarded, 1);
    assert_eq!(engine.stats().cycles(), 1);
}
