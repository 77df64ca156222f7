//! Wire message envelope for KeyMesh control traffic.
//!
//! Every frame on the wire is a JSON-encoded envelope `{type, sender, data}`.
//! `data` is an insertion-ordered map of named string fields; byte-valued
//! fields are carried as text through a reversible single-byte codec so the
//! whole envelope stays embeddable in a textual serialization.
//!
//! Signatures live in a `sig` field inside `data`. The field is attached
//! last and removed before verification, so the signed bytes are exactly
//! `encode()` of the message without `sig`. Keeping payload key order
//! stable is part of that contract: reordering fields between signing and
//! verification would invalidate every signature.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, Result};

/// Name of the payload field carrying a message signature.
pub const SIGNATURE_FIELD: &str = "sig";

/// Type tag of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Peer registration with the directory (unsigned payload).
    #[serde(rename = "REGISTER")]
    Register,
    /// Request for another peer's public info.
    #[serde(rename = "GET_USER_INFO")]
    GetUserInfo,
    /// Directory response carrying a peer's public info.
    #[serde(rename = "PUT_USER_INFO")]
    PutUserInfo,
    /// Handshake initiation naming a protocol and key size.
    #[serde(rename = "PROTOCOL_CONTROL")]
    ProtocolControl,
    /// Encrypted chat payload.
    #[serde(rename = "CHAT")]
    Chat,
    /// Carrier-transfer request relayed to the transport collaborator.
    #[serde(rename = "QUBIT_REQUEST")]
    QubitRequest,
    /// Handshake round traffic consumed from a peer's control queue.
    #[serde(rename = "GENERIC_CONTROL")]
    GenericControl,
}

/// Insertion-ordered payload of named string fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    /// Creates an empty payload.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Sets a string field, appending it if new.
    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), Value::String(value.into()));
    }

    /// Sets a byte-valued field through the single-byte text codec.
    pub fn set_bytes(&mut self, key: &str, value: &[u8]) {
        self.set_str(key, bytes_to_text(value));
    }

    /// Sets a numeric field (transported as its decimal string).
    pub fn set_usize(&mut self, key: &str, value: usize) {
        self.set_str(key, value.to_string());
    }

    /// Returns a string field, failing with `MalformedMessage` if absent
    /// or not a string.
    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::MalformedMessage(format!("missing field `{key}`")))
    }

    /// Returns a byte-valued field decoded through the single-byte codec.
    pub fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        text_to_bytes(self.get_str(key)?)
    }

    /// Returns a numeric field.
    pub fn get_usize(&self, key: &str) -> Result<usize> {
        self.get_str(key)?
            .parse()
            .map_err(|_| ProtocolError::MalformedMessage(format!("field `{key}` is not a number")))
    }

    /// Sets a structured field from a raw JSON value.
    ///
    /// Used for the few nested fields (connection descriptors) that are
    /// not flat text.
    pub fn set_value(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    /// Returns a structured field's raw JSON value.
    pub fn get_value(&self, key: &str) -> Result<&Value> {
        self.0
            .get(key)
            .ok_or_else(|| ProtocolError::MalformedMessage(format!("missing field `{key}`")))
    }

    /// Removes a field, returning its raw value if present.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Whether the payload carries the given field.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

/// A typed, signable wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message type tag.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Identifier of the sending node.
    pub sender: String,
    /// Type-specific named fields, insertion-ordered.
    pub data: Payload,
}

impl Message {
    /// Creates a message with the given payload.
    pub fn new(kind: MessageType, sender: impl Into<String>, data: Payload) -> Self {
        Self {
            kind,
            sender: sender.into(),
            data,
        }
    }

    /// Serializes the envelope to its deterministic byte encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes an envelope from bytes; the exact inverse of [`encode`].
    ///
    /// Unknown type tags and structural damage fail with `MalformedMessage`.
    ///
    /// [`encode`]: Message::encode
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Appends a signature as the final payload field.
    pub fn attach_signature(&mut self, signature: &[u8]) {
        self.data.set_bytes(SIGNATURE_FIELD, signature);
    }

    /// Removes and returns the signature field.
    ///
    /// Fails closed: `SignatureMissing` when the field is absent,
    /// `SignatureInvalid` when it is not decodable signature text.
    pub fn take_signature(&mut self) -> Result<Vec<u8>> {
        let value = self
            .data
            .remove(SIGNATURE_FIELD)
            .ok_or(ProtocolError::SignatureMissing)?;
        let text = value
            .as_str()
            .ok_or_else(|| ProtocolError::SignatureInvalid("signature is not text".to_string()))?;
        text_to_bytes(text)
            .map_err(|e| ProtocolError::SignatureInvalid(e.to_string()))
    }

    /// Whether the message carries a signature field.
    pub fn is_signed(&self) -> bool {
        self.data.contains(SIGNATURE_FIELD)
    }
}

/// Encodes bytes as text, one char per byte value (U+0000..=U+00FF).
pub fn bytes_to_text(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Decodes text produced by [`bytes_to_text`] back into bytes.
pub fn text_to_bytes(text: &str) -> Result<Vec<u8>> {
    text.chars()
        .map(|c| {
            u8::try_from(c as u32).map_err(|_| {
                ProtocolError::MalformedMessage(format!(
                    "char U+{:04X} is outside the single-byte range",
                    c as u32
                ))
            })
        })
        .collect()
}
