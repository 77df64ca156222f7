//! Authenticated encryption of chat payloads.
//!
//! Chat plaintext is sealed with AES-256-GCM under the per-peer session
//! key. The three components travel as separate payload fields (`nonce`,
//! `ciphertext`, `tag`) so the envelope stays a flat map of text fields.
//!
//! Handshakes may negotiate key material of any length; it is reduced to
//! the 32-byte AES key with SHA-256 before use.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{ProtocolError, Result};

/// Length of a derived session key in bytes.
pub const SESSION_KEY_LENGTH: usize = 32;

/// AES-GCM nonce length in bytes.
pub const NONCE_LENGTH: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LENGTH: usize = 16;

/// Reduces arbitrary-length key material to a fixed-length session key.
pub fn derive_session_key(material: &[u8]) -> [u8; SESSION_KEY_LENGTH] {
    Sha256::digest(material).into()
}

/// An encrypted chat payload: the `nonce`/`ciphertext`/`tag` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedChat {
    /// Random per-message nonce.
    pub nonce: Vec<u8>,
    /// Ciphertext without the tag.
    pub ciphertext: Vec<u8>,
    /// GCM authentication tag.
    pub tag: Vec<u8>,
}

/// Symmetric cipher bound to one peer's session key.
pub struct ChatCipher {
    cipher: Aes256Gcm,
}

impl ChatCipher {
    /// Builds a cipher from session key material of any non-zero length.
    pub fn new(key_material: &[u8]) -> Result<Self> {
        if key_material.is_empty() {
            return Err(ProtocolError::InvalidKey("empty key material".to_string()));
        }
        let key = derive_session_key(key_material);
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        })
    }

    /// Encrypts a plaintext under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<SealedChat> {
        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);

        let mut sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| ProtocolError::Encryption(e.to_string()))?;

        // aes-gcm appends the tag to the ciphertext; the wire wants them split.
        let tag = sealed.split_off(sealed.len() - TAG_LENGTH);
        Ok(SealedChat {
            nonce: nonce.to_vec(),
            ciphertext: sealed,
            tag,
        })
    }

    /// Decrypts a sealed payload, verifying its tag.
    pub fn decrypt(&self, sealed: &SealedChat) -> Result<Vec<u8>> {
        if sealed.nonce.len() != NONCE_LENGTH || sealed.tag.len() != TAG_LENGTH {
            return Err(ProtocolError::Decryption(format!(
                "bad nonce/tag lengths: {}/{}",
                sealed.nonce.len(),
                sealed.tag.len()
            )));
        }
        let mut combined = sealed.ciphertext.clone();
        combined.extend_from_slice(&sealed.tag);
        self.cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), combined.as_slice())
            .map_err(|e| ProtocolError::Decryption(e.to_string()))
    }
}
