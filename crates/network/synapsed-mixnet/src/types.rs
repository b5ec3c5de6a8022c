//! Core mixnet types

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Node identifier in the network.
///
/// Opaque and globally unique; used as the key for directory lookups, key
/// lookups and the connection registry.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Static network location of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
    /// Role this node runs as when started by the local runner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RoleKind>,
}

impl NodeConfig {
    pub fn new(id: impl Into<NodeId>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            role: None,
        }
    }

    pub fn with_role(mut self, role: RoleKind) -> Self {
        self.role = Some(role);
        self
    }

    /// `host:port` string suitable for dialing.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The role a node plays in the mixnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Client,
    Mix,
    Destination,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleKind::Client => write!(f, "client"),
            RoleKind::Mix => write!(f, "mix"),
            RoleKind::Destination => write!(f, "destination"),
        }
    }
}

impl std::str::FromStr for RoleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(RoleKind::Client),
            "mix" => Ok(RoleKind::Mix),
            "destination" | "dest" => Ok(RoleKind::Destination),
            other => Err(format!("unknown node role '{}'", other)),
        }
    }
}

/// Unique identifier for one connection instance.
///
/// Two connections to the same node never share an id, which lets a read loop
/// tell whether the registry slot still belongs to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Plaintext recovered by a destination node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub content: String,
    pub full_path: Vec<NodeId>,
    pub received_at: chrono::DateTime<chrono::Utc>,
}
