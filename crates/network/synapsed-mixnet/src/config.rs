//! Mixnet configuration and the static node directory

use crate::error::{MixnetError, Result, RoutingError};
use crate::types::{NodeConfig, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Tunables for a mixnet node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixnetConfig {
    /// Period of the mix dispatch cycle
    pub dispatch_interval_ms: u64,
    /// Upper bound on an outbound TCP dial
    pub connect_timeout_ms: u64,
    /// Time an inbound peer has to send its first record
    pub handshake_timeout_ms: u64,
    /// Largest accepted wire record, newline excluded
    pub max_frame_bytes: usize,
    /// Time connection tasks get to finish during shutdown
    pub shutdown_timeout_ms: u64,
    /// RSA modulus size for generated key pairs
    pub rsa_key_bits: usize,
}

impl MixnetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_frame_bytes(mut self, limit: usize) -> Self {
        self.max_frame_bytes = limit;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_rsa_key_bits(mut self, bits: usize) -> Self {
        self.rsa_key_bits = bits;
        self
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// How long shutdown waits for an in-flight dispatch cycle.
    pub fn dispatch_shutdown_timeout(&self) -> Duration {
        self.dispatch_interval() + Duration::from_secs(1)
    }

    /// Overrides defaults from `MIXNET_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(val) = env_u64("MIXNET_DISPATCH_INTERVAL_MS")? {
            config.dispatch_interval_ms = val;
        }
        if let Some(val) = env_u64("MIXNET_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout_ms = val;
        }
        if let Some(val) = env_u64("MIXNET_HANDSHAKE_TIMEOUT_MS")? {
            config.handshake_timeout_ms = val;
        }
        if let Some(val) = env_u64("MIXNET_MAX_FRAME_BYTES")? {
            config.max_frame_bytes = val as usize;
        }
        if let Some(val) = env_u64("MIXNET_SHUTDOWN_TIMEOUT_MS")? {
            config.shutdown_timeout_ms = val;
        }
        if let Some(val) = env_u64("MIXNET_RSA_KEY_BITS")? {
            config.rsa_key_bits = val as usize;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch_interval_ms == 0 {
            return Err(MixnetError::Configuration(
                "dispatch_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_frame_bytes < 64 {
            return Err(MixnetError::Configuration(format!(
                "max_frame_bytes too small: {}",
                self.max_frame_bytes
            )));
        }
        // OAEP-SHA256 needs 66 bytes of overhead around the 32 byte AES key
        if self.rsa_key_bits < 1024 {
            return Err(MixnetError::Configuration(format!(
                "rsa_key_bits must be at least 1024, got {}",
                self.rsa_key_bits
            )));
        }
        Ok(())
    }
}

impl Default for MixnetConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_ms: 5_000,
            connect_timeout_ms: 10_000,
            handshake_timeout_ms: 10_000,
            max_frame_bytes: 1024 * 1024,
            shutdown_timeout_ms: 5_000,
            rsa_key_bits: 2048,
        }
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| MixnetError::Configuration(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

/// Static directory resolving node ids to network locations.
///
/// Loaded once at startup and shared by reference for the lifetime of the
/// process.
#[derive(Debug, Clone, Default)]
pub struct NodeDirectory {
    nodes: HashMap<NodeId, NodeConfig>,
}

/// On-disk layout of a directory file.
#[derive(Debug, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    nodes: Vec<NodeConfig>,
    #[serde(default)]
    mixnet: Option<MixnetConfig>,
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a directory from node entries, rejecting duplicates.
    pub fn from_nodes(nodes: impl IntoIterator<Item = NodeConfig>) -> Result<Self> {
        let mut directory = Self::new();
        for node in nodes {
            directory.insert(node)?;
        }
        Ok(directory)
    }

    /// Parses a TOML directory; returns the directory and any `[mixnet]` overrides.
    pub fn from_toml_str(source: &str) -> Result<(Self, Option<MixnetConfig>)> {
        let file: DirectoryFile = toml::from_str(source)?;
        let directory = Self::from_nodes(file.nodes)?;
        if let Some(config) = &file.mixnet {
            config.validate()?;
        }
        debug!(nodes = directory.len(), "Parsed node directory");
        Ok((directory, file.mixnet))
    }

    /// Loads a TOML directory file.
    pub fn load(path: impl AsRef<Path>) -> Result<(Self, Option<MixnetConfig>)> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            MixnetError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let loaded = Self::from_toml_str(&source)?;
        info!(path = %path.display(), nodes = loaded.0.len(), "Loaded node directory");
        Ok(loaded)
    }

    pub fn insert(&mut self, node: NodeConfig) -> Result<()> {
        if node.id.is_empty() {
            return Err(MixnetError::Configuration("node id must not be empty".to_string()));
        }
        if self.nodes.contains_key(&node.id) {
            return Err(MixnetError::Configuration(format!(
                "duplicate directory entry for {}",
                node.id
            )));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Resolves a node id, failing with `UnknownNode`.
    pub fn resolve(&self, id: &NodeId) -> Result<&NodeConfig> {
        self.nodes
            .get(id)
            .ok_or_else(|| RoutingError::UnknownNode(id.clone()).into())
    }

    pub fn get(&self, id: &NodeId) -> Option<&NodeConfig> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Node ids in sorted order.
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<_> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeConfig> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
