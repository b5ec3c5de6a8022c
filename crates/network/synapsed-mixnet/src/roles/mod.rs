//! Node roles: what a node does with the records it receives.

mod client;
mod destination;
mod mix;

pub use client::ClientRole;
pub use destination::DestinationRole;
pub use mix::MixRole;

use crate::error::Result;
use crate::hop::HopState;
use crate::message::WireMessage;
use crate::transport::MessageHandler;
use crate::types::{NodeId, RoleKind};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, debug_span};

pub enum NodeRole {
    Client(ClientRole),
    Mix(MixRole),
    Destination(DestinationRole),
}

impl NodeRole {
    pub fn kind(&self) -> RoleKind {
        match self {
            NodeRole::Client(_) => RoleKind::Client,
            NodeRole::Mix(_) => RoleKind::Mix,
            NodeRole::Destination(_) => RoleKind::Destination,
        }
    }

    pub fn id(&self) -> &NodeId {
        match self {
            NodeRole::Client(role) => role.id(),
            NodeRole::Mix(role) => role.id(),
            NodeRole::Destination(role) => role.id(),
        }
    }

    /// Stops role-owned background work. Only mixes have any.
    pub async fn shutdown(&self, timeout: Duration) {
        if let NodeRole::Mix(role) = self {
            role.shutdown(timeout).await;
        }
    }
}

#[async_trait]
impl MessageHandler for NodeRole {
    async fn handle(&self, message: WireMessage, origin: &NodeId) -> Result<()> {
        let span = debug_span!(
            "message",
            node = %self.id(),
            role = %self.kind(),
            hop = message.current_hop_index(),
            path_len = message.full_path().len()
        );
        let _entered = span.enter();
        HopState::Received.reached();

        let outcome = match self {
            NodeRole::Client(role) => {
                role.handle(message, origin);
                HopState::Dropped.reached();
                return Ok(());
            }
            NodeRole::Mix(role) => role.process(message),
            NodeRole::Destination(role) => role.process(message),
        };
        match outcome {
            Ok(state) => {
                debug!(%origin, %state, "Message handled");
                Ok(())
            }
            Err(e) => {
                HopState::Dropped.reached();
                Err(e)
            }
        }
    }
}
