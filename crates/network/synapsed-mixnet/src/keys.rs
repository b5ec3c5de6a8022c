//! Key directory: per-node RSA key pairs and public key lookup.

use crate::crypto;
use crate::error::{OnionError, Result};
use crate::types::NodeId;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// An RSA key pair owned by one node.
#[derive(Clone)]
pub struct KeyPair {
    pub public_key: RsaPublicKey,
    private_key: Arc<RsaPrivateKey>,
}

impl KeyPair {
    pub fn generate(bits: usize) -> Result<Self> {
        let private_key = crypto::generate_rsa_key(bits)?;
        Ok(Self::from_private_key(private_key))
    }

    pub fn from_private_key(private_key: RsaPrivateKey) -> Self {
        Self {
            public_key: private_key.to_public_key(),
            private_key: Arc::new(private_key),
        }
    }

    pub fn private_key(&self) -> Arc<RsaPrivateKey> {
        Arc::clone(&self.private_key)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("private_key", &"<redacted>").finish()
    }
}

/// Constructed-once directory of node keys.
///
/// Holds public keys for every known node and private keys only for the
/// nodes hosted by this process.
#[derive(Debug, Default)]
pub struct KeyDirectory {
    public_keys: HashMap<NodeId, RsaPublicKey>,
    key_pairs: HashMap<NodeId, KeyPair>,
}

impl KeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a fresh key pair for every id.
    pub fn generate<'a>(ids: impl IntoIterator<Item = &'a NodeId>, bits: usize) -> Result<Self> {
        info!(bits, "Generating RSA key pairs");
        let mut directory = Self::new();
        for id in ids {
            directory.insert_key_pair(id.clone(), KeyPair::generate(bits)?);
            debug!(node = %id, "Generated key pair");
        }
        info!(nodes = directory.key_pairs.len(), "Finished generating key pairs");
        Ok(directory)
    }

    /// Registers a key pair for a node hosted in this process.
    pub fn insert_key_pair(&mut self, id: NodeId, pair: KeyPair) {
        self.public_keys.insert(id.clone(), pair.public_key.clone());
        self.key_pairs.insert(id, pair);
    }

    /// Public key of any known node.
    pub fn public_key_of(&self, id: &NodeId) -> Option<&RsaPublicKey> {
        self.public_keys.get(id)
    }

    /// Private key of a node hosted in this process.
    pub fn private_key_of(&self, id: &NodeId) -> Result<Arc<RsaPrivateKey>> {
        self.key_pairs
            .get(id)
            .map(KeyPair::private_key)
            .ok_or_else(|| OnionError::UnknownPrivateKey(id.clone()).into())
    }

    /// A copy holding every public key but only `id`'s private key.
    pub fn scoped_to(&self, id: &NodeId) -> Self {
        let mut scoped = Self {
            public_keys: self.public_keys.clone(),
            key_pairs: HashMap::new(),
        };
        if let Some(pair) = self.key_pairs.get(id) {
            scoped.key_pairs.insert(id.clone(), pair.clone());
        }
        scoped
    }

    pub fn len(&self) -> usize {
        self.public_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.public_keys.is_empty()
    }
}
