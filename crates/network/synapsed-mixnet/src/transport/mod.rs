//! Peer overlay: TCP connections between nodes, keyed by node id.
//!
//! Connections are reused in both directions. An inbound connection learns
//! its peer's identity from the first record it carries, after which it is
//! registered and used for sends to that node just like a dialed one.

pub mod connection;
pub mod overlay;
pub mod registry;

pub use connection::{Connection, FrameReader};
pub use overlay::Overlay;
pub use registry::ConnectionRegistry;

use crate::error::Result;
use crate::message::WireMessage;
use crate::types::NodeId;
use async_trait::async_trait;

/// Receives every record read from any connection.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// `origin` is the identity the connection is registered under.
    async fn handle(&self, message: WireMessage, origin: &NodeId) -> Result<()>;
}
