//! # KeyMesh Protocol Library
//!
//! Wire-level building blocks for the KeyMesh secure messaging node:
//!
//! - **Wire envelope**: typed, signable `{type, sender, data}` messages
//!   with an insertion-ordered payload and a reversible single-byte codec
//!   for byte-valued fields
//! - **Signing identity**: Ed25519 keys, detached signatures, and the
//!   sign/verify-and-strip envelope operations
//! - **Chat cipher**: AES-256-GCM over negotiated session keys, producing
//!   the `nonce`/`ciphertext`/`tag` triple carried by CHAT messages
//!
//! The crate is transport-agnostic: frames go in and out as plain bytes.
//!
//! ## Example
//!
//! ```rust
//! use protocol::{ChatCipher, Message, MessageType, NodeIdentity, Payload, PeerKey};
//!
//! let identity = NodeIdentity::generate();
//!
//! let mut data = Payload::new();
//! data.set_str("user", "alice");
//! let mut message = Message::new(MessageType::GetUserInfo, "alice", data);
//!
//! identity.sign_message(&mut message).unwrap();
//! let frame = message.encode().unwrap();
//!
//! let mut received = Message::decode(&frame).unwrap();
//! let key = PeerKey::from_bytes(&identity.public_key_bytes()).unwrap();
//! key.verify_and_strip(&mut received).unwrap();
//! ```

pub mod cipher;
pub mod crypto;
pub mod error;
pub mod wire;

pub use cipher::{
    derive_session_key, ChatCipher, SealedChat, NONCE_LENGTH, SESSION_KEY_LENGTH, TAG_LENGTH,
};
pub use crypto::{NodeIdentity, PeerKey};
pub use error::{ProtocolError, Result};
pub use wire::{bytes_to_text, text_to_bytes, Message, MessageType, Payload, SIGNATURE_FIELD};
