//! Transport collaborator interface and its two implementations.
//!
//! The dispatcher treats the transport as an external collaborator: it
//! polls for raw inbound frames, sends encoded frames to an endpoint, and
//! delegates the carrier-channel operations the handshake's lowest layer
//! needs (carrier transfer between peers, correlated raw key material).
//!
//! Two implementations ship with the node:
//!
//! - [`memory::MemoryHub`] wires any number of in-process transports
//!   together for tests and simulations; its carrier channel pairs up
//!   `key_material` calls so both endpoints draw identical random bytes.
//! - [`tcp::TcpTransport`] speaks length-prefixed frames over TCP. Its
//!   carrier channel is a deterministic per-pair simulation, since the
//!   physical carrier layer is outside this system.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A peer's listener address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// Listener port.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Collaborator contract between the dispatcher and the network layer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Polls for the next raw inbound frame without blocking.
    async fn recv_frame(&self) -> Option<Vec<u8>>;

    /// Sends an encoded frame to a peer endpoint.
    async fn send_frame(&self, to: &Endpoint, frame: Vec<u8>) -> Result<()>;

    /// This node's own listener endpoint.
    fn local_endpoint(&self) -> Endpoint;

    /// Creates a carrier and transfers it between the two named peers.
    ///
    /// Opaque passthrough used by QUBIT_REQUEST relaying; the dispatcher
    /// keeps no state about it.
    async fn create_and_send_carrier(&self, from: &str, to: &str) -> Result<()>;

    /// Draws `n` bytes of raw key material correlated with `peer`.
    ///
    /// The handshake engine purifies this material into a session key;
    /// how the correlation is physically established is the transport's
    /// concern.
    async fn key_material(&self, local: &str, peer: &str, n: usize) -> Result<Vec<u8>>;
}

/// Canonical unordered pair key for carrier-channel state.
fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

pub mod memory {
    //! In-process transport hub for multi-node tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    use async_trait::async_trait;
    use dashmap::DashMap;
    use rand::RngCore;
    use tracing::debug;

    use super::{pair_key, Endpoint, Transport};
    use crate::error::Result;
    use crate::queue::QueueSlot;

    /// Shared in-memory network connecting [`MemoryTransport`] instances.
    #[derive(Default)]
    pub struct MemoryHub {
        inboxes: DashMap<Endpoint, Arc<QueueSlot<Vec<u8>>>>,
        material: Mutex<HashMap<(String, String), VecDeque<Vec<u8>>>>,
        carriers: AtomicUsize,
    }

    impl MemoryHub {
        /// Creates an empty hub.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Attaches a transport listening on the given endpoint.
        pub fn attach(self: &Arc<Self>, host: &str, port: u16) -> MemoryTransport {
            let local = Endpoint::new(host, port);
            self.inbox(&local);
            MemoryTransport {
                hub: Arc::clone(self),
                local,
            }
        }

        /// Number of carrier transfers requested through this hub.
        pub fn carrier_count(&self) -> usize {
            self.carriers.load(Ordering::Relaxed)
        }

        fn inbox(&self, endpoint: &Endpoint) -> Arc<QueueSlot<Vec<u8>>> {
            self.inboxes.entry(endpoint.clone()).or_default().clone()
        }

        /// Pairs up key-material draws: the first caller for a pair
        /// generates random bytes and leaves a copy for its partner.
        fn draw_material(&self, a: &str, b: &str, n: usize) -> Vec<u8> {
            let key = pair_key(a, b);
            let mut map = self
                .material
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let pending = map.entry(key).or_default();
            if let Some(material) = pending.pop_front() {
                return material;
            }
            let mut material = vec![0u8; n];
            rand::rngs::OsRng.fill_bytes(&mut material);
            pending.push_back(material.clone());
            material
        }
    }

    /// One endpoint's view of a [`MemoryHub`].
    pub struct MemoryTransport {
        hub: Arc<MemoryHub>,
        local: Endpoint,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn recv_frame(&self) -> Option<Vec<u8>> {
            self.hub.inbox(&self.local).try_pop()
        }

        async fn send_frame(&self, to: &Endpoint, frame: Vec<u8>) -> Result<()> {
            self.hub.inbox(to).push(frame);
            Ok(())
        }

        fn local_endpoint(&self) -> Endpoint {
            self.local.clone()
        }

        async fn create_and_send_carrier(&self, from: &str, to: &str) -> Result<()> {
            debug!(%from, %to, "simulated carrier transfer");
            self.hub.carriers.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn key_material(&self, local: &str, peer: &str, n: usize) -> Result<Vec<u8>> {
            Ok(self.hub.draw_material(local, peer, n))
        }
    }
}

pub mod tcp {
    //! Length-prefixed TCP frame transport.

    use std::sync::Arc;

    use async_trait::async_trait;
    use sha2::{Digest, Sha256};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tracing::{debug, warn};

    use super::{pair_key, Endpoint, Transport};
    use crate::error::{NodeError, Result};
    use crate::queue::QueueSlot;

    /// Upper bound on a single frame, matching the envelope's scale.
    pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

    /// TCP transport with a background accept loop feeding an inbox.
    pub struct TcpTransport {
        local: Endpoint,
        inbox: Arc<QueueSlot<Vec<u8>>>,
    }

    impl TcpTransport {
        /// Binds the listener and starts accepting frames.
        pub async fn bind(host: &str, port: u16) -> Result<Self> {
            let listener = TcpListener::bind((host, port)).await?;
            let local = Endpoint::new(host, port);
            let inbox: Arc<QueueSlot<Vec<u8>>> = Arc::default();

            let accept_inbox = Arc::clone(&inbox);
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, addr)) => {
                            let inbox = Arc::clone(&accept_inbox);
                            tokio::spawn(async move {
                                if let Err(e) = read_frames(stream, inbox).await {
                                    debug!(%addr, error = %e, "inbound connection ended");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
            });

            Ok(Self { local, inbox })
        }
    }

    async fn read_frames(mut stream: TcpStream, inbox: Arc<QueueSlot<Vec<u8>>>) -> Result<()> {
        loop {
            let len = match stream.read_u32().await {
                Ok(len) => len as usize,
                Err(_) => return Ok(()), // peer closed
            };
            if len > MAX_FRAME_SIZE {
                return Err(NodeError::Transport(format!("frame of {len} bytes")));
            }
            let mut frame = vec![0u8; len];
            stream.read_exact(&mut frame).await?;
            inbox.push(frame);
        }
    }

    #[async_trait]
    impl Transport for TcpTransport {
        async fn recv_frame(&self) -> Option<Vec<u8>> {
            self.inbox.try_pop()
        }

        async fn send_frame(&self, to: &Endpoint, frame: Vec<u8>) -> Result<()> {
            if frame.len() > MAX_FRAME_SIZE {
                return Err(NodeError::Transport(format!(
                    "frame of {} bytes",
                    frame.len()
                )));
            }
            let mut stream = TcpStream::connect((to.host.as_str(), to.port)).await?;
            stream.write_u32(frame.len() as u32).await?;
            stream.write_all(&frame).await?;
            stream.flush().await?;
            Ok(())
        }

        fn local_endpoint(&self) -> Endpoint {
            self.local.clone()
        }

        async fn create_and_send_carrier(&self, from: &str, to: &str) -> Result<()> {
            debug!(%from, %to, "carrier transfer (simulated channel)");
            Ok(())
        }

        /// Deterministic stand-in for the physical carrier channel: both
        /// ends of a pair derive the same material without traffic.
        async fn key_material(&self, local: &str, peer: &str, n: usize) -> Result<Vec<u8>> {
            let (a, b) = pair_key(local, peer);
            let mut material = Vec::with_capacity(n);
            let mut counter = 0u64;
            while material.len() < n {
                let mut hasher = Sha256::new();
                hasher.update(b"keymesh-carrier-sim");
                hasher.update(a.as_bytes());
                hasher.update([0]);
                hasher.update(b.as_bytes());
                hasher.update(counter.to_be_bytes());
                material.extend_from_slice(&hasher.finalize());
                counter += 1;
            }
            material.truncate(n);
            Ok(material)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryHub;
    use super::*;

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new("127.0.0.1", 8001).to_string(), "127.0.0.1:8001");
    }

    #[test]
    fn test_pair_key_is_unordered() {
        assert_eq!(pair_key("alice", "bob"), pair_key("bob", "alice"));
    }

    #[tokio::test]
    async fn test_memory_hub_delivers_frames() {
        let hub = MemoryHub::new();
        let a = hub.attach("127.0.0.1", 8001);
        let b = hub.attach("127.0.0.1", 8002);

        a.send_frame(&b.local_endpoint(), b"frame one".to_vec())
            .await
            .unwrap();
        a.send_frame(&b.local_endpoint(), b"frame two".to_vec())
            .await
            .unwrap();

        assert_eq!(b.recv_frame().await.unwrap(), b"frame one");
        assert_eq!(b.recv_frame().await.unwrap(), b"frame two");
        assert_eq!(b.recv_frame().await, None);
        assert_eq!(a.recv_frame().await, None);
    }

    #[tokio::test]
    async fn test_memory_hub_pairs_key_material() {
        let hub = MemoryHub::new();
        let a = hub.attach("127.0.0.1", 8001);
        let b = hub.attach("127.0.0.1", 8002);

        let from_a = a.key_material("alice", "bob", 64).await.unwrap();
        let from_b = b.key_material("bob", "alice", 64).await.unwrap();
        assert_eq!(from_a, from_b);
        assert_eq!(from_a.len(), 64);

        // A second draw starts a fresh batch.
        let next = a.key_material("alice", "bob", 64).await.unwrap();
        assert_ne!(next, from_a);
    }

    #[tokio::test]
    async fn test_memory_hub_counts_carriers() {
        let hub = MemoryHub::new();
        let a = hub.attach("127.0.0.1", 8001);
        a.create_and_send_carrier("alice", "bob").await.unwrap();
        a.create_and_send_carrier("alice", "carol").await.unwrap();
        assert_eq!(hub.carrier_count(), 2);
    }

    #[tokio::test]
    async fn test_tcp_roundtrip() {
        let server = tcp::TcpTransport::bind("127.0.0.1", 39181).await.unwrap();
        let client = tcp::TcpTransport::bind("127.0.0.1", 39182).await.unwrap();

        client
            .send_frame(&Endpoint::new("127.0.0.1", 39181), b"over tcp".to_vec())
            .await
            .unwrap();

        let mut frame = None;
        for _ in 0..100 {
            frame = server.recv_frame().await;
            if frame.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(frame.unwrap(), b"over tcp");
    }

    #[tokio::test]
    async fn test_tcp_key_material_matches_both_sides() {
        let a = tcp::TcpTransport::bind("127.0.0.1", 39183).await.unwrap();
        let b = tcp::TcpTransport::bind("127.0.0.1", 39184).await.unwrap();
        let from_a = a.key_material("alice", "bob", 100).await.unwrap();
        let from_b = b.key_material("bob", "alice", 100).await.unwrap();
        assert_eq!(from_a, from_b);
        assert_eq!(from_a.len(), 100);
    }
}
