//! End-to-end integration tests for KeyMesh.
//!
//! These tests run complete two-node flows over the in-memory hub:
//! - Registration with the directory root
//! - Directory resolution with its bounded timeout
//! - On-demand key establishment and encrypted chat delivery

use std::sync::Arc;
use std::time::Duration;

use node::server::{Node, DIRECTORY_TIMEOUT};
use node::transport::memory::MemoryHub;
use node::transport::Endpoint;
use node::NodeError;
use protocol::NodeIdentity;

const ROOT_PORT: u16 = 8001;

fn root_endpoint() -> Endpoint {
    Endpoint::new("127.0.0.1", ROOT_PORT)
}

/// Creates and starts a node attached to the hub.
async fn start_node(hub: &Arc<MemoryHub>, name: &str, port: u16) -> Arc<Node> {
    let transport = Arc::new(hub.attach("127.0.0.1", port));
    let node = Node::new(name, NodeIdentity::generate(), root_endpoint(), 64, transport);
    node.start().await;
    node
}

/// Polls until the condition holds or two seconds pass.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within two seconds");
}

// =============================================================================
// Registration and Directory Resolution
// =============================================================================

#[tokio::test]
async fn test_node_registers_with_root_at_startup() {
    let hub = MemoryHub::new();
    let root = start_node(&hub, "alice", ROOT_PORT).await;
    let _bob = start_node(&hub, "bob", 8002).await;

    wait_until(|| root.has_user("bob")).await;

    let (public_key, endpoint) = root.public_info("bob").unwrap();
    assert_eq!(public_key.len(), 32);
    assert_eq!(endpoint, Endpoint::new("127.0.0.1", 8002));
}

#[tokio::test]
async fn test_root_does_not_register_with_itself() {
    let hub = MemoryHub::new();
    let root = start_node(&hub, "alice", ROOT_PORT).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(root.is_root());
    assert!(root.has_user("alice"));
    assert!(!root.has_user("bob"));
}

#[tokio::test]
async fn test_peer_resolves_another_through_root() {
    let hub = MemoryHub::new();
    let root = start_node(&hub, "alice", ROOT_PORT).await;
    let bob = start_node(&hub, "bob", 8002).await;
    let carol = start_node(&hub, "carol", 8003).await;

    wait_until(|| root.has_user("bob") && root.has_user("carol")).await;

    assert!(!carol.has_user("bob"));
    carol.request_user_info("bob").await.unwrap();
    assert!(carol.has_user("bob"));

    let (public_key, endpoint) = carol.public_info("bob").unwrap();
    assert_eq!(public_key, bob.public_info("bob").unwrap().0);
    assert_eq!(endpoint, Endpoint::new("127.0.0.1", 8002));
}

#[tokio::test]
async fn test_resolving_unregistered_peer_times_out() {
    let hub = MemoryHub::new();
    let _root = start_node(&hub, "alice", ROOT_PORT).await;
    let bob = start_node(&hub, "bob", 8002).await;

    let started = tokio::time::Instant::now();
    let err = bob.request_user_info("ghost").await.unwrap_err();

    assert!(matches!(err, NodeError::DirectoryTimeout { user } if user == "ghost"));
    // Not immediate, not unbounded.
    assert!(started.elapsed() >= DIRECTORY_TIMEOUT);
    assert!(started.elapsed() < DIRECTORY_TIMEOUT + Duration::from_secs(1));
}

// =============================================================================
// Chat Delivery
// =============================================================================

#[tokio::test]
async fn test_chat_message_is_delivered_and_decrypted() {
    let hub = MemoryHub::new();
    let root = start_node(&hub, "alice", ROOT_PORT).await;
    let bob = start_node(&hub, "bob", 8002).await;

    wait_until(|| root.has_user("bob")).await;

    // No session key exists yet, so this runs the full handshake first.
    root.send_chat("bob", b"Hello!").await.unwrap();

    let history = bob.message_history("alice", 1).await.unwrap();
    assert_eq!(history, vec![b"Hello!".to_vec()]);

    // The handshake leader asked the relay to distribute carriers.
    wait_until(|| hub.carrier_count() >= 1).await;
}

#[tokio::test]
async fn test_chat_messages_arrive_in_order() {
    let hub = MemoryHub::new();
    let root = start_node(&hub, "alice", ROOT_PORT).await;
    let bob = start_node(&hub, "bob", 8002).await;

    wait_until(|| root.has_user("bob")).await;

    root.send_chat("bob", b"first").await.unwrap();
    root.send_chat("bob", b"second").await.unwrap();
    root.send_chat("bob", b"third").await.unwrap();

    let history = bob.message_history("alice", 3).await.unwrap();
    assert_eq!(
        history,
        vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]
    );
}

#[tokio::test]
async fn test_chat_flows_both_directions() {
    let hub = MemoryHub::new();
    let root = start_node(&hub, "alice", ROOT_PORT).await;
    let bob = start_node(&hub, "bob", 8002).await;

    wait_until(|| root.has_user("bob")).await;

    root.send_chat("bob", b"ping from alice").await.unwrap();
    assert_eq!(
        bob.message_history("alice", 1).await.unwrap(),
        vec![b"ping from alice".to_vec()]
    );

    // The reply reuses the session key bob stored as follower.
    bob.send_chat("alice", b"pong from bob").await.unwrap();
    assert_eq!(
        root.message_history("bob", 1).await.unwrap(),
        vec![b"pong from bob".to_vec()]
    );
}

#[tokio::test]
async fn test_sender_resolves_recipient_lazily() {
    let hub = MemoryHub::new();
    let root = start_node(&hub, "alice", ROOT_PORT).await;
    let bob = start_node(&hub, "bob", 8002).await;
    let carol = start_node(&hub, "carol", 8003).await;

    wait_until(|| root.has_user("bob") && root.has_user("carol")).await;

    // Carol has never heard of bob; send_chat resolves him via the root,
    // runs the handshake, then delivers.
    assert!(!carol.has_user("bob"));
    carol.send_chat("bob", b"hi bob").await.unwrap();

    let history = bob.message_history("carol", 1).await.unwrap();
    assert_eq!(history, vec![b"hi bob".to_vec()]);
}

#[tokio::test]
async fn test_renegotiation_replaces_session_key() {
    let hub = MemoryHub::new();
    let root = start_node(&hub, "alice", ROOT_PORT).await;
    let bob = start_node(&hub, "bob", 8002).await;

    wait_until(|| root.has_user("bob")).await;

    root.send_chat("bob", b"under first key").await.unwrap();
    assert_eq!(
        bob.message_history("alice", 1).await.unwrap(),
        vec![b"under first key".to_vec()]
    );

    // Force a second handshake; both sides must converge again.
    root.establish_key("bob", 64).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    root.send_chat("bob", b"under second key").await.unwrap();
    assert_eq!(
        bob.message_history("alice", 1).await.unwrap(),
        vec![b"under second key".to_vec()]
    );
}

#[tokio::test]
async fn test_history_read_beyond_queue_times_out() {
    let hub = MemoryHub::new();
    let root = start_node(&hub, "alice", ROOT_PORT).await;
    let bob = start_node(&hub, "bob", 8002).await;

    wait_until(|| root.has_user("bob")).await;
    root.send_chat("bob", b"only one").await.unwrap();

    let err = bob.message_history("alice", 2).await.unwrap_err();
    assert!(matches!(err, NodeError::MailboxTimeout { user } if user == "alice"));
}
