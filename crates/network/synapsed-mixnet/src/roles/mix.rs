use crate::error::{Result, RoutingError};
use crate::hop::{self, HopPosition, HopState};
use crate::keys::KeyDirectory;
use crate::message::WireMessage;
use crate::mix::{DispatchHandle, Forwarder, MixEngine};
use crate::onion::OnionCodec;
use crate::transport::Overlay;
use crate::types::NodeId;
use parking_lot::Mutex;
use rsa::RsaPrivateKey;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Relay that peels one layer and feeds the result to its mix engine.
pub struct MixRole {
    id: NodeId,
    private_key: Arc<RsaPrivateKey>,
    engine: Arc<MixEngine>,
    overlay: Arc<Overlay>,
    dispatcher: Mutex<Option<DispatchHandle>>,
}

impl MixRole {
    pub fn new(id: NodeId, keys: &KeyDirectory, overlay: Arc<Overlay>) -> Result<Self> {
        let private_key = keys.private_key_of(&id)?;
        Ok(Self {
            engine: Arc::new(MixEngine::new(id.clone())),
            id,
            private_key,
            overlay,
            dispatcher: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn engine(&self) -> &Arc<MixEngine> {
        &self.engine
    }

    /// Starts periodic dispatch through the overlay. A second call is a no-op.
    pub fn start(&self, interval: Duration) -> Result<()> {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_none() {
            let forwarder: Arc<dyn Forwarder> = self.overlay.clone();
            *dispatcher = Some(self.engine.spawn(forwarder, interval)?);
        }
        Ok(())
    }

    /// Validates, peels and enqueues one message.
    ///
    /// On success the message sits in the engine with its layer replaced and
    /// its hop index advanced by exactly one.
    pub fn process(&self, message: WireMessage) -> Result<HopState> {
        hop::validate(&message, &self.id, HopPosition::Relay)?;

        let (recovered, mut message) = OnionCodec::peel(message, &self.id, &self.private_key)?;
        let layer = OnionCodec::open_relay_layer(&recovered)?;

        let path_next = message.next_hop().cloned().ok_or(RoutingError::InvalidHopIndex {
            index: message.current_hop_index() + 1,
            path_len: message.full_path().len(),
        })?;
        if layer.next_hop_id != path_next {
            return Err(RoutingError::MisroutedMessage {
                expected: path_next,
                local: layer.next_hop_id,
            }
            .into());
        }

        message.apply_layer(layer);
        message.advance_hop()?;
        debug!(mix = %self.id, next_hop = %path_next, hop = message.current_hop_index(), "Layer peeled, queued for mixing");

        self.engine.enqueue(message)?;
        Ok(HopState::Peeled.reached())
    }

    /// Rejects further messages and stops the dispatcher, waiting up to
    /// `timeout` for a cycle in progress.
    pub async fn shutdown(&self, timeout: Duration) {
        self.engine.close();
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.shutdown(timeout).await;
        }
    }
}
