//! Wire message carried hop to hop.
//!
//! One JSON object per line. The schema is fixed: unknown fields are rejected,
//! `version` must match [`WIRE_VERSION`], byte fields are standard base64.

use crate::error::{ProtocolError, Result, RoutingError};
use crate::onion::NextHopLayer;
use crate::types::NodeId;
use serde::{Deserialize, Serialize};

/// Current wire schema version.
pub const WIRE_VERSION: u8 = 1;

/// The mutable envelope relayed between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WireMessage {
    pub version: u8,
    full_path: Vec<NodeId>,
    current_hop_index: usize,
    #[serde(with = "serde_b64")]
    pub encrypted_payload: Vec<u8>,
    #[serde(with = "serde_b64")]
    pub iv: Vec<u8>,
    #[serde(with = "serde_b64")]
    pub encrypted_symmetric_key: Vec<u8>,
    #[serde(default)]
    pub content: Option<String>,
}

impl WireMessage {
    /// Creates a message addressed to the first hop of `full_path`.
    pub fn new(
        full_path: Vec<NodeId>,
        encrypted_payload: Vec<u8>,
        iv: Vec<u8>,
        encrypted_symmetric_key: Vec<u8>,
    ) -> Self {
        Self {
            version: WIRE_VERSION,
            full_path,
            current_hop_index: 0,
            encrypted_payload,
            iv,
            encrypted_symmetric_key,
            content: None,
        }
    }

    /// Decodes and structurally validates one wire record.
    ///
    /// Hop-index bounds are deliberately not checked here: those are routing
    /// errors handled per message, not protocol errors that kill the
    /// connection.
    pub fn decode(line: &str) -> Result<Self> {
        let message: Self = serde_json::from_str(line.trim_end_matches(['\r', '\n']))?;
        message.validate_schema()?;
        Ok(message)
    }

    /// Encodes as a single line, trailing newline excluded.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn validate_schema(&self) -> Result<()> {
        if self.version != WIRE_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version).into());
        }
        if self.full_path.is_empty() {
            return Err(ProtocolError::MalformedFrame("fullPath is empty".to_string()).into());
        }
        if self.full_path.iter().any(NodeId::is_empty) {
            return Err(
                ProtocolError::MalformedFrame("fullPath contains an empty id".to_string()).into(),
            );
        }
        Ok(())
    }

    pub fn full_path(&self) -> &[NodeId] {
        &self.full_path
    }

    pub fn current_hop_index(&self) -> usize {
        self.current_hop_index
    }

    /// Identity the sender claims on a fresh connection.
    pub fn origin(&self) -> Option<&NodeId> {
        self.full_path.first()
    }

    /// The node this message is currently addressed to.
    pub fn current_recipient(&self) -> Result<&NodeId> {
        self.full_path.get(self.current_hop_index).ok_or_else(|| {
            RoutingError::InvalidHopIndex {
                index: self.current_hop_index,
                path_len: self.full_path.len(),
            }
            .into()
        })
    }

    /// The node after the current one, if any.
    pub fn next_hop(&self) -> Option<&NodeId> {
        self.full_path.get(self.current_hop_index + 1)
    }

    pub fn is_final_hop(&self) -> bool {
        self.current_hop_index + 1 == self.full_path.len()
    }

    /// Advances the hop index by exactly one.
    ///
    /// Fails without mutating when the message is already at the last hop.
    pub fn advance_hop(&mut self) -> Result<()> {
        if self.current_hop_index + 1 >= self.full_path.len() {
            return Err(RoutingError::InvalidHopIndex {
                index: self.current_hop_index + 1,
                path_len: self.full_path.len(),
            }
            .into());
        }
        self.current_hop_index += 1;
        Ok(())
    }

    /// Replaces the current layer with the one recovered by peeling.
    pub fn apply_layer(&mut self, layer: NextHopLayer) {
        self.encrypted_payload = layer.next_encrypted_payload;
        self.iv = layer.next_iv;
        self.encrypted_symmetric_key = layer.next_encrypted_symmetric_key;
    }

    #[cfg(test)]
    pub(crate) fn set_current_hop_index(&mut self, index: usize) {
        self.current_hop_index = index;
    }
}

/// Base64 serialization for byte fields.
pub(crate) mod serde_b64 {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::Deserialize;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(s).map_err(serde::de::Error::custom)
    }
}
