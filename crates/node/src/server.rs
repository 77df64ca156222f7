//! The dispatcher tying directory, mailbox, queues and engine together.
//!
//! [`Node`] owns all shared state and the two background loops: a receive
//! loop that decodes each inbound frame and dispatches it on a fresh task
//! (unbounded fan-out, so a blocking handshake never stalls unrelated
//! traffic), and an outbound loop that round-robins over the per-peer
//! outbound queues and signs-and-sends whatever the handshake engine
//! queued. Failures inside one dispatch task are logged and isolated;
//! failures inside application-initiated calls propagate to the caller.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use protocol::cipher::{ChatCipher, SealedChat};
use protocol::{Message, MessageType, NodeIdentity, Payload, PeerKey, ProtocolError};

use crate::directory::{UserDirectory, UserUpdate};
use crate::engine::{
    ProtocolContext, ProtocolInstance, ProtocolOutcome, Role, MAX_KEY_SIZE, MIN_KEY_SIZE,
    PURIFIED_EXCHANGE,
};
use crate::error::{NodeError, Result};
use crate::mailbox::Mailbox;
use crate::queue::PeerQueues;
use crate::transport::{Endpoint, Transport};

/// Bounded wall-clock wait for a directory lookup to resolve.
pub const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(2);

/// Bounded wait for each message in a history read.
pub const HISTORY_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval of the directory-resolution and background loops.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One peer-to-peer messaging node.
pub struct Node {
    name: String,
    identity: NodeIdentity,
    root: Endpoint,
    key_size: usize,
    transport: Arc<dyn Transport>,
    directory: UserDirectory,
    mailbox: Mailbox,
    control: PeerQueues<Message>,
    outbound: PeerQueues<Message>,
}

impl Node {
    /// Creates a node and inserts its own directory record.
    ///
    /// Background loops are not running until [`start`](Node::start).
    pub fn new(
        name: impl Into<String>,
        identity: NodeIdentity,
        root: Endpoint,
        key_size: usize,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let name = name.into();
        let directory = UserDirectory::new();
        directory.add_user(
            &name,
            UserUpdate {
                public_key: Some(identity.public_key_bytes().to_vec()),
                endpoint: Some(transport.local_endpoint()),
                session_key: None,
            },
        );
        Arc::new(Self {
            name,
            identity,
            root,
            key_size,
            transport,
            directory,
            mailbox: Mailbox::new(),
            control: PeerQueues::new(),
            outbound: PeerQueues::new(),
        })
    }

    /// This node's identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This node's listener endpoint.
    pub fn local_endpoint(&self) -> Endpoint {
        self.transport.local_endpoint()
    }

    /// Whether this node acts as the directory root.
    pub fn is_root(&self) -> bool {
        self.local_endpoint() == self.root
    }

    /// Starts the receive and outbound loops, then registers with the
    /// root. A dead root is logged, not fatal; users resolve lazily later.
    pub async fn start(self: &Arc<Self>) {
        let receiver = Arc::clone(self);
        tokio::spawn(async move {
            receiver.receive_loop().await;
        });
        let sender = Arc::clone(self);
        tokio::spawn(async move {
            sender.outbound_loop().await;
        });

        if let Err(e) = self.register_with_root().await {
            info!(error = %e, "failed to register with root server, is it running?");
        }
    }

    // === Background loops ===

    async fn receive_loop(self: Arc<Self>) {
        debug!("processing incoming messages");
        loop {
            match self.transport.recv_frame().await {
                Some(frame) => {
                    let node = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = node.dispatch(&frame).await {
                            warn!(error = %e, "dropped inbound message");
                        }
                    });
                }
                None => sleep(POLL_INTERVAL).await,
            }
        }
    }

    async fn outbound_loop(self: Arc<Self>) {
        loop {
            let mut sent_any = false;
            for peer in self.outbound.peers() {
                if let Some(message) = self.outbound.try_pop(&peer) {
                    sent_any = true;
                    if let Err(e) = self.send_message(&peer, message).await {
                        warn!(%peer, error = %e, "outbound delivery failed");
                    }
                }
            }
            if !sent_any {
                sleep(POLL_INTERVAL).await;
            }
        }
    }

    // === Inbound routing ===

    /// Routes one decoded inbound message by its type tag.
    async fn dispatch(self: &Arc<Self>, frame: &[u8]) -> Result<()> {
        let mut message = Message::decode(frame)?;
        debug!(kind = ?message.kind, sender = %message.sender, "processing message");
        match message.kind {
            MessageType::Chat => {
                self.verify_and_strip(&mut message)?;
                info!(sender = %message.sender, "new chat message");
                self.mailbox.store(message);
            }
            MessageType::Register => {
                let user = message.data.get_str("user")?.to_string();
                let public_key = message.data.get_bytes("pub")?;
                let endpoint = endpoint_from_value(message.data.get_value("connection")?)?;
                self.directory.register_user(&user, public_key, endpoint)?;
                info!(%user, "registered new contact");
            }
            MessageType::GetUserInfo => {
                // Directory requests trust the transport layer's earlier
                // registration; the signature is stripped, not re-verified.
                message.take_signature()?;
                let user = message.data.get_str("user")?.to_string();
                let requester = endpoint_from_value(message.data.get_value("connection")?)?;
                self.send_user_info(&user, &requester).await?;
                debug!(%user, to = %requester, "sent user info");
            }
            MessageType::PutUserInfo => {
                message.take_signature()?;
                let user = message.data.get_str("user")?.to_string();
                let public_key = message.data.get_bytes("pub")?;
                let endpoint = endpoint_from_value(message.data.get_value("connection")?)?;
                self.directory.add_user(
                    &user,
                    UserUpdate {
                        public_key: Some(public_key),
                        endpoint: Some(endpoint),
                        session_key: None,
                    },
                );
                info!(%user, "got user info");
            }
            MessageType::ProtocolControl => {
                if !self.directory.has_user(&message.sender) {
                    self.request_user_info(&message.sender).await?;
                } else {
                    self.verify_and_strip(&mut message)?;
                }
                self.follow_protocol(&message).await?;
            }
            MessageType::QubitRequest => {
                let to = message.data.get_str("user")?;
                self.transport
                    .create_and_send_carrier(&message.sender, to)
                    .await?;
            }
            MessageType::GenericControl => {
                self.verify_and_strip(&mut message)?;
                self.control.push(&message.sender.clone(), message);
            }
        }
        Ok(())
    }

    /// Runs the named protocol in follower role against the sender's
    /// queues, storing the session key if the protocol yields one.
    async fn follow_protocol(&self, message: &Message) -> Result<()> {
        let peer = message.sender.clone();
        let name = message.data.get_str("name")?.to_string();
        let n = message.data.get_usize("n")?;
        // Wire-supplied, so bound it before it sizes a material buffer.
        if !(MIN_KEY_SIZE..=MAX_KEY_SIZE).contains(&n) {
            return Err(NodeError::HandshakeFailed(format!(
                "requested key size {n} outside {MIN_KEY_SIZE}..={MAX_KEY_SIZE}"
            )));
        }
        debug!(%peer, %name, "following protocol");

        let instance = ProtocolInstance::create(&name, self.protocol_context(&peer, Role::Follower, n))?;
        if let ProtocolOutcome::SessionKey(key) = instance.execute().await? {
            debug!(%peer, "established key");
            self.directory.set_session_key(&peer, key)?;
        }
        Ok(())
    }

    fn protocol_context(&self, peer: &str, role: Role, n: usize) -> ProtocolContext {
        ProtocolContext {
            local: self.name.clone(),
            peer: peer.to_string(),
            role,
            n,
            control: self.control.slot(peer),
            outbound: self.outbound.slot(peer),
            relay: self.root.clone(),
            transport: Arc::clone(&self.transport),
        }
    }

    fn verify_and_strip(&self, message: &mut Message) -> Result<()> {
        let key = PeerKey::from_bytes(&self.directory.public_key(&message.sender)?)?;
        key.verify_and_strip(message)?;
        Ok(())
    }

    // === Directory traffic ===

    /// Sends this node's unsigned registration payload to an endpoint.
    pub async fn send_registration(&self, to: &Endpoint) -> Result<()> {
        let mut data = Payload::new();
        data.set_str("user", &self.name);
        data.set_bytes("pub", &self.identity.public_key_bytes());
        data.set_value("connection", endpoint_value(&self.local_endpoint())?);
        let message = Message::new(MessageType::Register, &self.name, data);
        self.transport.send_frame(to, message.encode()?).await
    }

    async fn register_with_root(&self) -> Result<()> {
        if self.is_root() {
            debug!("am root server");
            return Ok(());
        }
        debug!(root = %self.root, "sending registration");
        self.send_registration(&self.root).await
    }

    /// Answers a directory query with a signed PUT_USER_INFO.
    async fn send_user_info(&self, user: &str, to: &Endpoint) -> Result<()> {
        let (public_key, endpoint) = self.directory.public_info(user)?;
        let mut data = Payload::new();
        data.set_str("user", user);
        data.set_bytes("pub", &public_key);
        data.set_value("connection", endpoint_value(&endpoint)?);
        let mut message = Message::new(MessageType::PutUserInfo, &self.name, data);
        self.identity.sign_message(&mut message)?;
        self.transport.send_frame(to, message.encode()?).await
    }

    /// Asks the root for a peer's info, polling until the directory
    /// reflects the answer or the bounded wait expires.
    pub async fn request_user_info(&self, user: &str) -> Result<()> {
        let mut data = Payload::new();
        data.set_str("user", user);
        data.set_value("connection", endpoint_value(&self.local_endpoint())?);
        let mut message = Message::new(MessageType::GetUserInfo, &self.name, data);
        self.identity.sign_message(&mut message)?;
        self.transport.send_frame(&self.root, message.encode()?).await?;

        let wait_start = Instant::now();
        while !self.directory.has_user(user) {
            if wait_start.elapsed() > DIRECTORY_TIMEOUT {
                return Err(NodeError::DirectoryTimeout {
                    user: user.to_string(),
                });
            }
            sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }

    // === Application surface ===

    /// Whether the peer is known to the directory.
    pub fn has_user(&self, user: &str) -> bool {
        self.directory.has_user(user)
    }

    /// A peer's shareable info: public key and endpoint.
    pub fn public_info(&self, user: &str) -> Result<(Vec<u8>, Endpoint)> {
        self.directory.public_info(user)
    }

    /// Signs and sends a control message to a peer, resolving the peer
    /// through the root first if needed.
    pub async fn send_message(&self, user: &str, mut message: Message) -> Result<()> {
        if !self.directory.has_user(user) {
            self.request_user_info(user).await?;
        }
        let endpoint = self.directory.connection_info(user)?;
        // Signing is the last mutation before transmission.
        self.identity.sign_message(&mut message)?;
        self.transport.send_frame(&endpoint, message.encode()?).await
    }

    /// Runs the default key-agreement protocol in leader role and stores
    /// the resulting session key.
    pub async fn establish_key(&self, user: &str, key_size: usize) -> Result<()> {
        if !self.directory.has_user(user) {
            self.request_user_info(user).await?;
        }
        debug!(%user, "establishing key");
        let instance = ProtocolInstance::create(
            PURIFIED_EXCHANGE,
            self.protocol_context(user, Role::Leader, key_size),
        )?;
        match instance.execute().await? {
            ProtocolOutcome::SessionKey(key) => self.directory.set_session_key(user, key),
            ProtocolOutcome::Completed => Err(NodeError::HandshakeFailed(
                "key-agreement protocol produced no key".to_string(),
            )),
        }
    }

    /// Encrypts and sends a chat message, establishing a session key on
    /// demand. Blocks for the duration of the handshake if one is needed.
    pub async fn send_chat(&self, user: &str, plaintext: &[u8]) -> Result<()> {
        if !self.directory.has_user(user) {
            self.request_user_info(user).await?;
        }
        let key = match self.directory.session_key(user) {
            Ok(key) => key,
            Err(_) => {
                self.establish_key(user, self.key_size).await?;
                self.directory.session_key(user)?
            }
        };

        let sealed = ChatCipher::new(&key)?.encrypt(plaintext)?;
        let mut data = Payload::new();
        data.set_bytes("nonce", &sealed.nonce);
        data.set_bytes("ciphertext", &sealed.ciphertext);
        data.set_bytes("tag", &sealed.tag);
        let message = Message::new(MessageType::Chat, &self.name, data);
        self.send_message(user, message).await
    }

    /// Retrieves and decrypts `count` queued chat messages from a peer in
    /// arrival order. Waits a bounded time for each.
    pub async fn message_history(&self, user: &str, count: usize) -> Result<Vec<Vec<u8>>> {
        let mut messages = Vec::with_capacity(count);
        for _ in 0..count {
            let message = self.mailbox.next_from(user, HISTORY_TIMEOUT).await?;
            let key = self.directory.session_key(user)?;
            let sealed = SealedChat {
                nonce: message.data.get_bytes("nonce")?,
                ciphertext: message.data.get_bytes("ciphertext")?,
                tag: message.data.get_bytes("tag")?,
            };
            messages.push(ChatCipher::new(&key)?.decrypt(&sealed)?);
        }
        Ok(messages)
    }
}

fn endpoint_value(endpoint: &Endpoint) -> Result<Value> {
    serde_json::to_value(endpoint)
        .map_err(|e| NodeError::Protocol(ProtocolError::from(e)))
}

fn endpoint_from_value(value: &Value) -> Result<Endpoint> {
    serde_json::from_value(value.clone())
        .map_err(|e| NodeError::Protocol(ProtocolError::from(e)))
}
