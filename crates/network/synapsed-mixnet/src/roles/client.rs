use crate::error::Result;
use crate::keys::KeyDirectory;
use crate::message::WireMessage;
use crate::onion::OnionCodec;
use crate::transport::Overlay;
use crate::types::NodeId;
use std::sync::Arc;
use tracing::{info, warn};

/// Originates messages. Clients never relay.
pub struct ClientRole {
    id: NodeId,
    keys: Arc<KeyDirectory>,
    overlay: Arc<Overlay>,
}

impl ClientRole {
    pub fn new(id: NodeId, keys: Arc<KeyDirectory>, overlay: Arc<Overlay>) -> Self {
        Self { id, keys, overlay }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn keys(&self) -> &Arc<KeyDirectory> {
        &self.keys
    }

    /// Onion-encrypts `content` for the path `relays ++ [destination]` and
    /// hands it to the first hop.
    pub async fn send(&self, content: &str, destination: &NodeId, relays: &[NodeId]) -> Result<()> {
        let path: Vec<NodeId> = relays
            .iter()
            .cloned()
            .chain(std::iter::once(destination.clone()))
            .collect();

        let message = OnionCodec::build(content.as_bytes(), &path, |id| self.keys.public_key_of(id))?;
        let first_hop = &path[0];
        self.overlay.send_to_node(first_hop, &message).await?;

        info!(client = %self.id, first_hop = %first_hop, destination = %destination, hops = path.len(), "Message sent into mixnet");
        Ok(())
    }

    pub(super) fn handle(&self, message: WireMessage, origin: &NodeId) {
        warn!(
            client = %self.id,
            %origin,
            hop = message.current_hop_index(),
            "Client received a message, ignoring"
        );
    }
}
