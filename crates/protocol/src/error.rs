//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame could not be decoded into a message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A required signature field was absent.
    #[error("message carries no signature")]
    SignatureMissing,

    /// Signature verification failed.
    #[error("invalid signature: {0}")]
    SignatureInvalid(String),

    /// Invalid or malformed public key.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Session key material could not be used.
    #[error("invalid session key: {0}")]
    InvalidKey(String),

    /// Encryption operation failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption or tag verification failed.
    #[error("decryption failed: {0}")]
    Decryption(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Conversions from underlying crate errors

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::MalformedMessage(err.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for ProtocolError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        ProtocolError::SignatureInvalid(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_message_display() {
        let err = ProtocolError::MalformedMessage("unknown type tag".to_string());
        assert_eq!(err.to_string(), "malformed message: unknown type tag");
    }

    #[test]
    fn test_signature_missing_display() {
        let err = ProtocolError::SignatureMissing;
        assert_eq!(err.to_string(), "message carries no signature");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let protocol_err: ProtocolError = json_err.into();
        assert!(matches!(protocol_err, ProtocolError::MalformedMessage(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
