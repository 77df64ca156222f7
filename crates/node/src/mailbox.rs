//! Per-peer inbox of verified chat messages awaiting retrieval.

use std::time::Duration;

use protocol::Message;
use tracing::debug;

use crate::error::{NodeError, Result};
use crate::queue::PeerQueues;

/// Delivered chat messages keyed by sender, FIFO per peer.
#[derive(Default)]
pub struct Mailbox {
    queues: PeerQueues<Message>,
}

impl Mailbox {
    /// Creates an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Files a verified chat message under its declared sender.
    ///
    /// Never blocks and never drops.
    pub fn store(&self, message: Message) {
        debug!(sender = %message.sender, "storing chat message");
        self.queues.push(&message.sender.clone(), message);
    }

    /// Waits up to `wait` for the next message from `peer`.
    ///
    /// The dequeued message's declared sender must match the queue it was
    /// stored under; a mismatch is a consistency failure, not a timeout.
    pub async fn next_from(&self, peer: &str, wait: Duration) -> Result<Message> {
        let slot = self.queues.slot(peer);
        let message = slot
            .pop_timeout(wait)
            .await
            .ok_or_else(|| NodeError::MailboxTimeout {
                user: peer.to_string(),
            })?;
        if message.sender != peer {
            return Err(NodeError::MailboxConsistency {
                expected: peer.to_string(),
                got: message.sender,
            });
        }
        Ok(message)
    }

    /// Number of messages currently queued for `peer`.
    pub fn pending(&self, peer: &str) -> usize {
        self.queues.slot(peer).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{MessageType, Payload};

    fn chat(sender: &str, body: &str) -> Message {
        let mut payload = Payload::new();
        payload.set_str("ciphertext", body);
        Message::new(MessageType::Chat, sender, payload)
    }

    #[tokio::test]
    async fn test_fifo_retrieval() {
        let mailbox = Mailbox::new();
        mailbox.store(chat("alice", "one"));
        mailbox.store(chat("alice", "two"));
        mailbox.store(chat("alice", "three"));

        for expected in ["one", "two", "three"] {
            let m = mailbox
                .next_from("alice", Duration::from_millis(100))
                .await
                .unwrap();
            assert_eq!(m.data.get_str("ciphertext").unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_consistency_check_at_dequeue() {
        let mailbox = Mailbox::new();
        // File a message under the wrong queue directly.
        let mut forged = chat("mallory", "boo");
        forged.sender = "mallory".to_string();
        mailbox.queues.push("alice", forged);

        let err = mailbox
            .next_from("alice", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NodeError::MailboxConsistency { expected, got }
                if expected == "alice" && got == "mallory"
        ));
    }

    #[tokio::test]
    async fn test_empty_mailbox_times_out() {
        let mailbox = Mailbox::new();
        let err = mailbox
            .next_from("alice", Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::MailboxTimeout { user } if user == "alice"));
    }

    #[tokio::test]
    async fn test_store_wakes_blocked_reader() {
        let mailbox = std::sync::Arc::new(Mailbox::new());
        let reader = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move {
                mailbox
                    .next_from("alice", Duration::from_secs(2))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        mailbox.store(chat("alice", "hello"));
        let m = reader.await.unwrap();
        assert_eq!(m.data.get_str("ciphertext").unwrap(), "hello");
    }

    #[test]
    fn test_pending_counts() {
        let mailbox = Mailbox::new();
        assert_eq!(mailbox.pending("alice"), 0);
        mailbox.store(chat("alice", "x"));
        mailbox.store(chat("alice", "y"));
        assert_eq!(mailbox.pending("alice"), 2);
        assert_eq!(mailbox.pending("bob"), 0);
    }
}
