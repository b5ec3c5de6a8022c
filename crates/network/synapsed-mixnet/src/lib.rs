//! # Synapsed Mixnet
//!
//! Onion-encrypted mix network relay for privacy-preserving message delivery.
//!
//! A client wraps a message in one encryption layer per hop. Each mix peels
//! exactly one layer, holds the result in a batch and forwards the batch in
//! random order on a fixed schedule. The destination removes the last layer
//! and recovers the plaintext.
//!
//! ## Features
//!
//! - **Onion Encryption**: AES-256-GCM layers with RSA-OAEP wrapped keys
//! - **Batch Mixing**: Periodic, shuffled dispatch breaks arrival/departure ordering
//! - **Hop Validation**: Every hop checks position and identity before peeling
//! - **Peer Overlay**: Newline-delimited JSON over TCP with connection reuse
//!
//! ## Example
//!
//! ```rust,no_run
//! use synapsed_mixnet::{KeyDirectory, MixnetConfig, MixnetNode, NodeConfig, NodeDirectory, NodeId, RoleKind};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = Arc::new(NodeDirectory::from_nodes([
//!         NodeConfig::new("AliceClient", "127.0.0.1", 8000),
//!         NodeConfig::new("MixNode_Alpha", "127.0.0.1", 8001),
//!         NodeConfig::new("BobDestination", "127.0.0.1", 8002),
//!     ])?);
//!     let keys = Arc::new(KeyDirectory::generate(&directory.ids(), 2048)?);
//!     let config = MixnetConfig::default();
//!
//!     let start = |id: &str, kind| {
//!         MixnetNode::start(id.into(), kind, keys.clone(), directory.clone(), config.clone())
//!     };
//!     let dest = start("BobDestination", RoleKind::Destination).await?;
//!     let mix = start("MixNode_Alpha", RoleKind::Mix).await?;
//!     let alice = start("AliceClient", RoleKind::Client).await?;
//!
//!     let mut inbox = dest.take_deliveries().expect("destination node");
//!     alice
//!         .client()
//!         .expect("client node")
//!         .send("hello mixnet", &NodeId::new("BobDestination"), &[NodeId::new("MixNode_Alpha")])
//!         .await?;
//!     println!("{}", inbox.recv().await.expect("delivery").content);
//!
//!     for node in [alice, mix, dest] {
//!         node.shutdown().await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod hop;
pub mod keys;
pub mod message;
pub mod mix;
pub mod node;
pub mod onion;
pub mod roles;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use config::{MixnetConfig, NodeDirectory};
pub use error::{ErrorClass, ErrorSeverity, MixnetError, Result};
pub use hop::{HopPosition, HopState};
pub use keys::{KeyDirectory, KeyPair};
pub use message::{WireMessage, WIRE_VERSION};
pub use mix::{CycleReport, Forwarder, MixEngine, MixStats};
pub use node::MixnetNode;
pub use onion::{NextHopLayer, OnionCodec};
pub use roles::{ClientRole, DestinationRole, MixRole, NodeRole};
pub use transport::{MessageHandler, Overlay};
pub use types::{ConnectionId, DeliveredMessage, NodeConfig, NodeId, RoleKind};
