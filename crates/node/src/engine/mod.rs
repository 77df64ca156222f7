//! Pluggable handshake protocol engine.
//!
//! A protocol instance is an ephemeral state machine bound to one peer's
//! control and outbound queues. It runs to completion inside the task that
//! created it: the leader writes the first message, the follower waits for
//! it, and both then alternate rounds until the protocol yields a session
//! key or aborts with [`NodeError::HandshakeFailed`].
//!
//! Peer-bound rounds never touch the network directly: they go out through
//! the peer's outbound queue (the dispatcher signs them before
//! transmission) and come back in through the control queue the dispatcher
//! fills with verified rounds. The one direct send is the carrier request
//! to the relay. Adding a protocol means adding a variant to
//! [`ProtocolInstance`], not touching the dispatcher.

mod echo;
mod purified;

pub use echo::Echo;
pub use purified::PurifiedExchange;

use std::sync::Arc;
use std::time::Duration;

use protocol::{Message, MessageType, Payload};

use crate::error::{NodeError, Result};
use crate::queue::QueueSlot;
use crate::transport::{Endpoint, Transport};

/// Wire name of the default key-agreement protocol.
pub const PURIFIED_EXCHANGE: &str = "purified";

/// Wire name of the non-keying echo handshake.
pub const ECHO: &str = "echo";

/// Default key-size parameter for on-demand key establishment.
pub const DEFAULT_KEY_SIZE: usize = 100;

/// Smallest key-size parameter a handshake accepts.
pub const MIN_KEY_SIZE: usize = 16;

/// Largest key-size parameter a handshake accepts. Caps the material
/// allocation a wire-supplied request can trigger.
pub const MAX_KEY_SIZE: usize = 4096;

/// Bounded wait for each expected round.
pub const ROUND_TIMEOUT: Duration = Duration::from_secs(5);

/// Which side of the handshake this instance plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates and drives each round.
    Leader,
    /// Waits for the initiation, then mirrors the leader's cadence.
    Follower,
}

/// Result of a completed protocol run.
#[derive(Debug)]
pub enum ProtocolOutcome {
    /// A key-agreement protocol converged on a session key.
    SessionKey(Vec<u8>),
    /// A control handshake finished without producing a key.
    Completed,
}

/// Everything a protocol instance needs to run one handshake.
pub struct ProtocolContext {
    /// This node's identifier.
    pub local: String,
    /// The peer on the other side of the handshake.
    pub peer: String,
    /// Role this instance plays.
    pub role: Role,
    /// Negotiated key-size parameter.
    pub n: usize,
    /// Verified inbound rounds from the peer.
    pub control: Arc<QueueSlot<Message>>,
    /// Unsigned outbound rounds awaiting dispatcher signing and send.
    pub outbound: Arc<QueueSlot<Message>>,
    /// Relay that distributes carriers between the two peers.
    pub relay: Endpoint,
    /// Carrier-channel collaborator for raw key material.
    pub transport: Arc<dyn Transport>,
}

impl ProtocolContext {
    /// Queues the handshake initiation message.
    pub(crate) fn send_init(&self, name: &str) {
        let mut data = Payload::new();
        data.set_str("name", name);
        data.set_usize("n", self.n);
        self.outbound
            .push(Message::new(MessageType::ProtocolControl, &self.local, data));
    }

    /// Asks the relay to distribute carriers between this node and the
    /// peer. Unsigned and unverified end to end; the carrier layer is an
    /// opaque collaborator.
    pub(crate) async fn request_carriers(&self) -> Result<()> {
        let mut data = Payload::new();
        data.set_str("user", &self.peer);
        let message = Message::new(MessageType::QubitRequest, &self.local, data);
        let frame = message.encode().map_err(NodeError::from)?;
        self.transport.send_frame(&self.relay, frame).await
    }

    /// Queues a protocol round for the dispatcher to sign and send.
    pub(crate) fn send_round(&self, name: &str, round: &str, fill: impl FnOnce(&mut Payload)) {
        let mut data = Payload::new();
        data.set_str("name", name);
        data.set_str("round", round);
        fill(&mut data);
        self.outbound
            .push(Message::new(MessageType::GenericControl, &self.local, data));
    }

    /// Waits for the next round and checks its protocol name and label.
    ///
    /// A timeout, a foreign protocol name, or an unexpected round label
    /// all abort the handshake.
    pub(crate) async fn next_round(&self, name: &str, round: &str) -> Result<Message> {
        let message = self
            .control
            .pop_timeout(ROUND_TIMEOUT)
            .await
            .ok_or_else(|| {
                NodeError::HandshakeFailed(format!(
                    "timed out waiting for `{round}` from {}",
                    self.peer
                ))
            })?;
        let got_name = message
            .data
            .get_str("name")
            .map_err(|e| NodeError::HandshakeFailed(e.to_string()))?;
        let got_round = message
            .data
            .get_str("round")
            .map_err(|e| NodeError::HandshakeFailed(e.to_string()))?;
        if got_name != name || got_round != round {
            return Err(NodeError::HandshakeFailed(format!(
                "expected `{name}/{round}`, got `{got_name}/{got_round}`"
            )));
        }
        Ok(message)
    }
}

/// Tagged registry of the protocols this node can run.
pub enum ProtocolInstance {
    /// Multi-round key establishment over raw carrier material.
    PurifiedExchange(PurifiedExchange),
    /// Liveness handshake with no keying result.
    Echo(Echo),
}

impl ProtocolInstance {
    /// Constructs the named protocol bound to the given context.
    pub fn create(name: &str, ctx: ProtocolContext) -> Result<Self> {
        match name {
            PURIFIED_EXCHANGE => Ok(Self::PurifiedExchange(PurifiedExchange::new(ctx))),
            ECHO => Ok(Self::Echo(Echo::new(ctx))),
            other => Err(NodeError::UnknownProtocol {
                name: other.to_string(),
            }),
        }
    }

    /// Runs the handshake to completion on the calling task.
    pub async fn execute(self) -> Result<ProtocolOutcome> {
        match self {
            Self::PurifiedExchange(p) => p.execute().await,
            Self::Echo(p) => p.execute().await,
        }
    }
}
