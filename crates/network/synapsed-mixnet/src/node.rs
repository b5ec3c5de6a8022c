//! A running mixnet node: one role wired to one overlay.

use crate::config::{MixnetConfig, NodeDirectory};
use crate::error::Result;
use crate::keys::KeyDirectory;
use crate::roles::{ClientRole, DestinationRole, MixRole, NodeRole};
use crate::transport::{MessageHandler, Overlay};
use crate::types::{DeliveredMessage, NodeId, RoleKind};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

pub struct MixnetNode {
    id: NodeId,
    role: Arc<NodeRole>,
    overlay: Arc<Overlay>,
    config: MixnetConfig,
    deliveries: Mutex<Option<mpsc::UnboundedReceiver<DeliveredMessage>>>,
}

impl MixnetNode {
    /// Starts a node listening on its directory address.
    pub async fn start(
        id: NodeId,
        kind: RoleKind,
        keys: Arc<KeyDirectory>,
        directory: Arc<NodeDirectory>,
        config: MixnetConfig,
    ) -> Result<Self> {
        let address = directory.resolve(&id)?.address();
        let node = Self::build(id, kind, keys, directory, config)?;
        node.overlay.listen(&address).await?;
        if let Err(e) = node.start_role() {
            node.overlay.shutdown().await;
            return Err(e);
        }
        Ok(node)
    }

    /// Starts a node on a listener the caller already bound.
    pub fn start_with_listener(
        id: NodeId,
        kind: RoleKind,
        keys: Arc<KeyDirectory>,
        directory: Arc<NodeDirectory>,
        config: MixnetConfig,
        listener: TcpListener,
    ) -> Result<Self> {
        let node = Self::build(id, kind, keys, directory, config)?;
        node.overlay.serve(listener)?;
        node.start_role()?;
        Ok(node)
    }

    fn build(
        id: NodeId,
        kind: RoleKind,
        keys: Arc<KeyDirectory>,
        directory: Arc<NodeDirectory>,
        config: MixnetConfig,
    ) -> Result<Self> {
        config.validate()?;
        let overlay = Overlay::new(id.clone(), directory, config.clone());
        // Every role keeps the public keys but only its own private key
        let keys = Arc::new(keys.scoped_to(&id));

        let mut deliveries = None;
        let role = match kind {
            RoleKind::Client => NodeRole::Client(ClientRole::new(id.clone(), keys, Arc::clone(&overlay))),
            RoleKind::Mix => NodeRole::Mix(MixRole::new(id.clone(), &keys, Arc::clone(&overlay))?),
            RoleKind::Destination => {
                let (role, rx) = DestinationRole::new(id.clone(), &keys)?;
                deliveries = Some(rx);
                NodeRole::Destination(role)
            }
        };
        let role = Arc::new(role);
        overlay.set_handler(Arc::clone(&role) as Arc<dyn MessageHandler>);

        Ok(Self {
            id,
            role,
            overlay,
            config,
            deliveries: Mutex::new(deliveries),
        })
    }

    fn start_role(&self) -> Result<()> {
        if let NodeRole::Mix(mix) = self.role.as_ref() {
            mix.start(self.config.dispatch_interval())?;
        }
        info!(node = %self.id, role = %self.role.kind(), addr = ?self.overlay.local_addr(), "Node started");
        Ok(())
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn kind(&self) -> RoleKind {
        self.role.kind()
    }

    pub fn role(&self) -> &NodeRole {
        &self.role
    }

    pub fn overlay(&self) -> &Arc<Overlay> {
        &self.overlay
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.overlay.local_addr()
    }

    pub fn client(&self) -> Option<&ClientRole> {
        match self.role.as_ref() {
            NodeRole::Client(client) => Some(client),
            _ => None,
        }
    }

    pub fn mix(&self) -> Option<&MixRole> {
        match self.role.as_ref() {
            NodeRole::Mix(mix) => Some(mix),
            _ => None,
        }
    }

    /// Delivery channel of a destination node. Can be taken once.
    pub fn take_deliveries(&self) -> Option<mpsc::UnboundedReceiver<DeliveredMessage>> {
        self.deliveries.lock().take()
    }

    /// Stops the mix dispatcher first, then the overlay. Messages still queued
    /// in the mix are lost.
    pub async fn shutdown(&self) {
        info!(node = %self.id, "Shutting down node");
        self.role.shutdown(self.config.dispatch_shutdown_timeout()).await;
        self.overlay.shutdown().await;
    }
}
