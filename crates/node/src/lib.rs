//! # KeyMesh Node Library
//!
//! This crate provides the node (daemon) functionality for KeyMesh: a
//! peer-to-peer secure messaging node that discovers peers through a
//! directory root, authenticates control traffic with signatures,
//! negotiates per-peer session keys via a pluggable handshake protocol,
//! and exchanges encrypted chat messages.
//!
//! ## Overview
//!
//! - **Dispatcher**: typed control-message routing with task-per-message
//!   fan-out and an outbound delivery loop
//! - **User Directory**: registry of known peers with registration,
//!   lookup-with-timeout, and session-key storage
//! - **Protocol Engine**: leader/follower handshake state machines fed by
//!   per-peer control queues
//! - **Mailbox**: per-peer inbox of delivered chat messages
//! - **Transport**: TCP frames for deployment, an in-memory hub for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use node::server::Node;
//! use node::transport::{tcp::TcpTransport, Endpoint};
//! use protocol::NodeIdentity;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = TcpTransport::bind("127.0.0.1", 8002).await?;
//!     let node = Node::new(
//!         "alice",
//!         NodeIdentity::generate(),
//!         Endpoint::new("127.0.0.1", 8001),
//!         100,
//!         Arc::new(transport),
//!     );
//!     node.start().await;
//!
//!     node.send_chat("bob", b"Hello!").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`directory`]: Peer registry
//! - [`engine`]: Handshake protocols
//! - [`mailbox`]: Delivered chat messages
//! - [`queue`]: Per-peer FIFO queues
//! - [`server`]: The dispatcher
//! - [`transport`]: Frame transports and the carrier channel

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod mailbox;
pub mod queue;
pub mod server;
pub mod transport;

// Re-export protocol for convenience
pub use protocol;

// Re-export the types most callers need
pub use config::Config;
pub use directory::{UserDirectory, UserRecord, UserUpdate};
pub use engine::{ProtocolInstance, ProtocolOutcome, Role};
pub use error::{NodeError, Result};
pub use mailbox::Mailbox;
pub use server::Node;
pub use transport::{Endpoint, Transport};
