//! Signing identity and verification for KeyMesh control traffic.
//!
//! Every node holds an Ed25519 keypair. Control messages are signed over
//! their byte encoding with the signature field excluded, then the
//! signature is appended as the final payload field (see [`crate::wire`]).

use ed25519_dalek::{
    Signature, Signer, SigningKey, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH,
    SIGNATURE_LENGTH,
};
use rand::rngs::OsRng;

use crate::error::{ProtocolError, Result};
use crate::wire::Message;

/// The local node's signing identity (keeps the secret key).
#[derive(Clone)]
pub struct NodeIdentity {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl NodeIdentity {
    /// Generates a fresh random identity from the OS entropy source.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Restores an identity from raw secret key bytes.
    pub fn from_secret_key_bytes(bytes: &[u8; SECRET_KEY_LENGTH]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Returns the secret key bytes for persistence.
    ///
    /// **Security Warning**: callers must store this confidentially.
    pub fn secret_key_bytes(&self) -> [u8; SECRET_KEY_LENGTH] {
        self.signing_key.to_bytes()
    }

    /// Returns the public key bytes shared during registration.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.verifying_key.to_bytes()
    }

    /// Signs raw bytes, returning a detached 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Signs a wire message in place.
    ///
    /// The signature covers the encoding of the message as it stands, so
    /// this must be the last mutation before transmission.
    pub fn sign_message(&self, message: &mut Message) -> Result<()> {
        let bytes = message.encode()?;
        message.attach_signature(&self.sign(&bytes));
        Ok(())
    }
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("public_key", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// A peer's public verification key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerKey {
    verifying_key: VerifyingKey,
}

impl PeerKey {
    /// Parses a public key from its raw byte form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PUBLIC_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| ProtocolError::InvalidPublicKey(format!("{} bytes", bytes.len())))?;
        let verifying_key = VerifyingKey::from_bytes(&arr)
            .map_err(|e| ProtocolError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { verifying_key })
    }

    /// Returns the raw public key bytes.
    pub fn as_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.verifying_key.to_bytes()
    }

    /// Verifies a detached signature over raw bytes.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let arr: [u8; SIGNATURE_LENGTH] = signature
            .try_into()
            .map_err(|_| ProtocolError::SignatureInvalid(format!("{} bytes", signature.len())))?;
        let sig = Signature::from_bytes(&arr);
        self.verifying_key
            .verify(message, &sig)
            .map_err(ProtocolError::from)
    }

    /// Verifies a signed wire message and strips its signature.
    ///
    /// The signature is removed first so the verified bytes match what the
    /// sender signed. Fails closed on a missing or malformed signature;
    /// on verification failure the message must be dropped unprocessed.
    pub fn verify_and_strip(&self, message: &mut Message) -> Result<()> {
        let signature = message.take_signature()?;
        let bytes = message.encode()?;
        self.verify(&bytes, &signature)
    }
}
