use crate::error::{Result, RoutingError};
use crate::hop::{self, HopPosition, HopState};
use crate::keys::KeyDirectory;
use crate::message::WireMessage;
use crate::onion::OnionCodec;
use crate::types::{DeliveredMessage, NodeId};
use rsa::RsaPrivateKey;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Final hop: removes the innermost layer and surfaces the plaintext.
pub struct DestinationRole {
    id: NodeId,
    private_key: Arc<RsaPrivateKey>,
    deliveries: mpsc::UnboundedSender<DeliveredMessage>,
}

impl DestinationRole {
    /// Returns the role and the receiving end of its delivery channel.
    pub fn new(id: NodeId, keys: &KeyDirectory) -> Result<(Self, mpsc::UnboundedReceiver<DeliveredMessage>)> {
        let private_key = keys.private_key_of(&id)?;
        let (deliveries, rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                id,
                private_key,
                deliveries,
            },
            rx,
        ))
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn process(&self, message: WireMessage) -> Result<HopState> {
        hop::validate(&message, &self.id, HopPosition::Final)?;

        let (recovered, mut message) = OnionCodec::peel(message, &self.id, &self.private_key)?;
        let content = String::from_utf8(recovered).map_err(|_| RoutingError::InvalidContent)?;
        HopState::Peeled.reached();
        message.content = Some(content.clone());

        info!(destination = %self.id, bytes = content.len(), hops = message.full_path().len(), "Message delivered");

        let delivered = DeliveredMessage {
            content,
            full_path: message.full_path().to_vec(),
            received_at: chrono::Utc::now(),
        };
        if self.deliveries.send(delivered).is_err() {
            debug!(destination = %self.id, "No delivery receiver attached");
        }
        Ok(HopState::Delivered.reached())
    }
}
