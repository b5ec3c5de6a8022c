//! Onion layer construction and peeling
//!
//! Every layer is an AES-256-GCM ciphertext under a one-time key, and that key
//! is wrapped with RSA-OAEP for the hop that owns the layer. Layers are built
//! innermost first: the destination's layer holds the plaintext, every outer
//! layer holds a [`NextHopLayer`] describing the layer inside it.

use crate::crypto::{self, LayerKey};
use crate::error::{OnionError, Result};
use crate::message::{serde_b64, WireMessage};
use crate::types::NodeId;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Plaintext of an intermediate onion layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NextHopLayer {
    #[serde(with = "serde_b64")]
    pub next_encrypted_payload: Vec<u8>,
    #[serde(with = "serde_b64")]
    pub next_iv: Vec<u8>,
    #[serde(with = "serde_b64")]
    pub next_encrypted_symmetric_key: Vec<u8>,
    pub next_hop_id: NodeId,
}

/// Stateless onion codec.
pub struct OnionCodec;

impl OnionCodec {
    /// Wraps `plaintext` in one layer per hop of `path`.
    ///
    /// All public keys are resolved before any encryption happens, so a
    /// missing key never leaves a half-built onion behind.
    pub fn build<'k, F>(plaintext: &[u8], path: &[NodeId], public_key_of: F) -> Result<WireMessage>
    where
        F: Fn(&NodeId) -> Option<&'k RsaPublicKey>,
    {
        if path.is_empty() {
            return Err(OnionError::EmptyPath.into());
        }

        let keys = path
            .iter()
            .map(|hop| public_key_of(hop).ok_or_else(|| OnionError::UnknownRecipientKey(hop.clone())))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut layer_plaintext = plaintext.to_vec();
        let mut sealed = None;

        for (position, (hop, public_key)) in path.iter().zip(&keys).enumerate().rev() {
            if let Some((payload, iv, wrapped_key)) = sealed.take() {
                let inner = NextHopLayer {
                    next_encrypted_payload: payload,
                    next_iv: iv,
                    next_encrypted_symmetric_key: wrapped_key,
                    next_hop_id: path[position + 1].clone(),
                };
                layer_plaintext = serde_json::to_vec(&inner)
                    .map_err(|e| OnionError::Encryption(format!("Layer encoding failed: {}", e)))?;
            }

            let key = LayerKey::generate();
            let payload = crypto::seal(&key, &layer_plaintext)?;
            let wrapped_key = crypto::wrap_key(public_key, &key)?;
            trace!(hop = %hop, position, "Sealed onion layer");

            sealed = Some((payload.ciphertext, payload.iv, wrapped_key));
        }

        let (payload, iv, wrapped_key) =
            sealed.ok_or_else(|| OnionError::Encryption("No layer produced".to_string()))?;

        debug!(hops = path.len(), first_hop = %path[0], "Built onion message");
        Ok(WireMessage::new(path.to_vec(), payload, iv, wrapped_key))
    }

    /// Removes the current layer with `my_private_key`.
    ///
    /// Returns the recovered layer plaintext together with the message, which
    /// is left untouched; interpreting the bytes is up to the caller.
    pub fn peel(
        message: WireMessage,
        my_identity: &NodeId,
        my_private_key: &RsaPrivateKey,
    ) -> Result<(Vec<u8>, WireMessage)> {
        let key = crypto::unwrap_key(my_private_key, &message.encrypted_symmetric_key)?;
        let recovered = crypto::open(&key, &message.encrypted_payload, &message.iv)?;
        trace!(node = %my_identity, hop = message.current_hop_index(), bytes = recovered.len(), "Peeled onion layer");
        Ok((recovered, message))
    }

    /// Parses the plaintext of an intermediate layer.
    pub fn open_relay_layer(recovered: &[u8]) -> Result<NextHopLayer> {
        serde_json::from_slice(recovered)
            .map_err(|e| OnionError::MalformedLayer(e.to_string()).into())
    }
}
