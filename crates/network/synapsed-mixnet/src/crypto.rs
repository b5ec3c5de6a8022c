//! Layer cryptography: AES-256-GCM payload encryption and RSA-OAEP key wrap.

use crate::error::{OnionError, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key length in bytes.
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// A one-time symmetric key for a single onion layer.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct LayerKey([u8; SYMMETRIC_KEY_LEN]);

impl LayerKey {
    /// Generates a fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; SYMMETRIC_KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; SYMMETRIC_KEY_LEN] = bytes.try_into().map_err(|_| {
            OnionError::KeyUnwrapFailed(format!(
                "unwrapped key has {} bytes, expected {}",
                bytes.len(),
                SYMMETRIC_KEY_LEN
            ))
        })?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for LayerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LayerKey").field(&"<redacted>").finish()
    }
}

/// Ciphertext (tag appended) and the nonce it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
}

/// Encrypts `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &LayerKey, plaintext: &[u8]) -> Result<SealedPayload> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| OnionError::Encryption("Invalid key length".to_string()))?;

    let mut iv = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| OnionError::Encryption("AES-GCM encryption failed".to_string()))?;

    Ok(SealedPayload {
        ciphertext,
        iv: iv.to_vec(),
    })
}

/// Decrypts and authenticates a payload. Fails closed on any tamper.
pub fn open(key: &LayerKey, ciphertext: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    if iv.len() != NONCE_LEN || ciphertext.len() < TAG_LEN {
        return Err(OnionError::PayloadDecryptFailed.into());
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| OnionError::PayloadDecryptFailed)?;

    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| OnionError::PayloadDecryptFailed.into())
}

/// Wraps a layer key for `recipient` using RSA-OAEP (SHA-256).
pub fn wrap_key(recipient: &RsaPublicKey, key: &LayerKey) -> Result<Vec<u8>> {
    recipient
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.as_bytes())
        .map_err(|e| OnionError::Encryption(format!("RSA key wrap failed: {}", e)).into())
}

/// Recovers a layer key with our private key.
pub fn unwrap_key(private_key: &RsaPrivateKey, wrapped: &[u8]) -> Result<LayerKey> {
    let mut bytes = private_key
        .decrypt(Oaep::new::<Sha256>(), wrapped)
        .map_err(|e| OnionError::KeyUnwrapFailed(e.to_string()))?;
    let key = LayerKey::from_slice(&bytes);
    bytes.zeroize();
    key
}

/// Generates an RSA key pair of `bits` size.
pub fn generate_rsa_key(bits: usize) -> Result<RsaPrivateKey> {
    RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| OnionError::Encryption(format!("RSA key generation failed: {}", e)).into())
}
