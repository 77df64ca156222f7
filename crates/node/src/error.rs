//! Error types for the node crate.

use protocol::ProtocolError;
use thiserror::Error;

/// Node error type covering directory, mailbox, handshake and transport
/// failures.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Lookup against an absent directory entry.
    #[error("unknown user: {user}")]
    UnknownUser {
        /// The missing identifier.
        user: String,
    },

    /// Re-registration of an identifier that already exists.
    #[error("user already registered: {user}")]
    DuplicateUser {
        /// The identifier that was registered twice.
        user: String,
    },

    /// Bounded directory-resolution wait exceeded.
    #[error("directory lookup for {user} timed out")]
    DirectoryTimeout {
        /// The identifier that never resolved.
        user: String,
    },

    /// Handshake protocol aborted; no partial key is retained.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// No protocol registered under the requested name.
    #[error("unknown protocol: {name}")]
    UnknownProtocol {
        /// The unrecognized protocol name.
        name: String,
    },

    /// A dequeued mailbox message's sender does not match its queue.
    #[error("mailbox for {expected} contained message from {got}")]
    MailboxConsistency {
        /// Peer the mailbox belongs to.
        expected: String,
        /// Sender actually recorded on the message.
        got: String,
    },

    /// Bounded mailbox read exceeded while fewer messages were queued
    /// than requested.
    #[error("mailbox read for {user} timed out")]
    MailboxTimeout {
        /// Peer whose mailbox ran dry.
        user: String,
    },

    /// Failure in the transport collaborator.
    #[error("transport error: {0}")]
    Transport(String),

    /// Wire-level failure (decode, signature, cipher).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Result type alias for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_user_display() {
        let err = NodeError::UnknownUser {
            user: "bob".to_string(),
        };
        assert_eq!(err.to_string(), "unknown user: bob");
    }

    #[test]
    fn test_mailbox_consistency_display() {
        let err = NodeError::MailboxConsistency {
            expected: "bob".to_string(),
            got: "mallory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "mailbox for bob contained message from mallory"
        );
    }

    #[test]
    fn test_protocol_error_passes_through() {
        let err: NodeError = ProtocolError::SignatureMissing.into();
        assert_eq!(err.to_string(), "message carries no signature");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NodeError>();
    }
}
