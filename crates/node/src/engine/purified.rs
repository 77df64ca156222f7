//! Purified key-exchange protocol.
//!
//! Both sides draw `n` bytes of correlated raw material from the carrier
//! channel, sacrifice a random sample of it to estimate the channel error
//! rate, and hash the remainder into the session key. A final digest
//! exchange confirms both sides hold the same key before either stores it.
//!
//! Round cadence (leader's view):
//!
//! 1. `PROTOCOL_CONTROL {name, n}` out — handshake initiation.
//! 2. `accept {n}` in — abort on key-size mismatch.
//! 3. `QUBIT_REQUEST {user}` to the relay, then draw raw material from
//!    the carrier channel.
//! 4. `sample {indices, values}` out — the sacrificed positions.
//! 5. `sample-check {errors}` in — abort on any error.
//! 6. `confirm {digest}` out, `confirm-ok` in — key confirmation.
//!
//! The follower mirrors the cadence from the other side. Any timeout,
//! malformed round, or failed check aborts with `HandshakeFailed` and no
//! partial key survives.

use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use protocol::cipher::derive_session_key;

use super::{ProtocolContext, ProtocolOutcome, Role, PURIFIED_EXCHANGE};
use crate::error::{NodeError, Result};

/// Share of the raw material sacrificed to the error estimate.
const SAMPLE_DIVISOR: usize = 4;

/// One run of the purified exchange, either role.
pub struct PurifiedExchange {
    ctx: ProtocolContext,
}

impl PurifiedExchange {
    pub(super) fn new(ctx: ProtocolContext) -> Self {
        Self { ctx }
    }

    /// Runs the handshake to completion and yields the session key.
    pub async fn execute(self) -> Result<ProtocolOutcome> {
        let key = match self.ctx.role {
            Role::Leader => self.lead().await?,
            Role::Follower => self.follow().await?,
        };
        Ok(ProtocolOutcome::SessionKey(key))
    }

    async fn lead(&self) -> Result<Vec<u8>> {
        let ctx = &self.ctx;
        ctx.send_init(PURIFIED_EXCHANGE);

        let accept = ctx.next_round(PURIFIED_EXCHANGE, "accept").await?;
        let peer_n = accept
            .data
            .get_usize("n")
            .map_err(|e| NodeError::HandshakeFailed(e.to_string()))?;
        if peer_n != ctx.n {
            return Err(NodeError::HandshakeFailed(format!(
                "key size mismatch: wanted {}, peer accepted {peer_n}",
                ctx.n
            )));
        }

        ctx.request_carriers().await?;
        let material = ctx.transport.key_material(&ctx.local, &ctx.peer, ctx.n).await?;
        let indices = sample_indices(material.len());
        let values: Vec<u8> = indices.iter().map(|&i| material[i]).collect();
        ctx.send_round(PURIFIED_EXCHANGE, "sample", |data| {
            data.set_str("indices", encode_indices(&indices));
            data.set_bytes("values", &values);
        });

        let check = ctx.next_round(PURIFIED_EXCHANGE, "sample-check").await?;
        let errors = check
            .data
            .get_usize("errors")
            .map_err(|e| NodeError::HandshakeFailed(e.to_string()))?;
        if errors > 0 {
            return Err(NodeError::HandshakeFailed(format!(
                "{errors} sample errors on the carrier channel"
            )));
        }

        let key = purify(&material, &indices);
        ctx.send_round(PURIFIED_EXCHANGE, "confirm", |data| {
            data.set_str("digest", key_digest(&key));
        });
        ctx.next_round(PURIFIED_EXCHANGE, "confirm-ok").await?;
        Ok(key)
    }

    async fn follow(&self) -> Result<Vec<u8>> {
        let ctx = &self.ctx;
        ctx.send_round(PURIFIED_EXCHANGE, "accept", |data| {
            data.set_usize("n", ctx.n);
        });

        let material = ctx.transport.key_material(&ctx.local, &ctx.peer, ctx.n).await?;

        let sample = ctx.next_round(PURIFIED_EXCHANGE, "sample").await?;
        let indices = decode_indices(
            sample
                .data
                .get_str("indices")
                .map_err(|e| NodeError::HandshakeFailed(e.to_string()))?,
            material.len(),
        )?;
        let values = sample
            .data
            .get_bytes("values")
            .map_err(|e| NodeError::HandshakeFailed(e.to_string()))?;
        if values.len() != indices.len() {
            return Err(NodeError::HandshakeFailed(
                "sample values do not match sampled positions".to_string(),
            ));
        }
        let errors = indices
            .iter()
            .zip(&values)
            .filter(|&(&i, &v)| material[i] != v)
            .count();
        ctx.send_round(PURIFIED_EXCHANGE, "sample-check", |data| {
            data.set_usize("errors", errors);
        });
        if errors > 0 {
            return Err(NodeError::HandshakeFailed(format!(
                "{errors} sample errors on the carrier channel"
            )));
        }

        let key = purify(&material, &indices);
        let confirm = ctx.next_round(PURIFIED_EXCHANGE, "confirm").await?;
        let digest = confirm
            .data
            .get_str("digest")
            .map_err(|e| NodeError::HandshakeFailed(e.to_string()))?;
        if digest != key_digest(&key) {
            return Err(NodeError::HandshakeFailed(
                "key confirmation digest mismatch".to_string(),
            ));
        }
        ctx.send_round(PURIFIED_EXCHANGE, "confirm-ok", |_| {});
        Ok(key)
    }
}

/// Random sampled positions, sorted, at least one.
fn sample_indices(n: usize) -> Vec<usize> {
    let count = (n / SAMPLE_DIVISOR).max(1).min(n);
    let mut indices = rand::seq::index::sample(&mut OsRng, n, count).into_vec();
    indices.sort_unstable();
    indices
}

/// Hashes the unsampled material into a fixed-length session key.
fn purify(material: &[u8], sampled: &[usize]) -> Vec<u8> {
    let remaining: Vec<u8> = material
        .iter()
        .enumerate()
        .filter(|(i, _)| sampled.binary_search(i).is_err())
        .map(|(_, &b)| b)
        .collect();
    derive_session_key(&remaining).to_vec()
}

fn key_digest(key: &[u8]) -> String {
    hex::encode(Sha256::digest(key))
}

fn encode_indices(indices: &[usize]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn decode_indices(text: &str, n: usize) -> Result<Vec<usize>> {
    let mut indices = Vec::new();
    for part in text.split(',') {
        let index: usize = part
            .parse()
            .map_err(|_| NodeError::HandshakeFailed(format!("bad sample index `{part}`")))?;
        if index >= n {
            return Err(NodeError::HandshakeFailed(format!(
                "sample index {index} outside material of {n} bytes"
            )));
        }
        indices.push(index);
    }
    Ok(indices)
}
