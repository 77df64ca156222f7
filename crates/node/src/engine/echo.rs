//! Echo handshake: a signed liveness round-trip with no keying result.
//!
//! The leader sends a random token and expects it back unchanged. The
//! dispatcher discards the outcome; only key-agreement protocols mutate
//! the directory.

use rand::RngCore;

use super::{ProtocolContext, ProtocolOutcome, Role, ECHO};
use crate::error::{NodeError, Result};

pub struct Echo {
    ctx: ProtocolContext,
}

impl Echo {
    pub(super) fn new(ctx: ProtocolContext) -> Self {
        Self { ctx }
    }

    pub async fn execute(self) -> Result<ProtocolOutcome> {
        let ctx = &self.ctx;
        match ctx.role {
            Role::Leader => {
                ctx.send_init(ECHO);
                let mut token = [0u8; 16];
                rand::rngs::OsRng.fill_bytes(&mut token);
                let token = hex::encode(token);
                ctx.send_round(ECHO, "ping", |data| {
                    data.set_str("token", token.clone());
                });
                let pong = ctx.next_round(ECHO, "pong").await?;
                let echoed = pong
                    .data
                    .get_str("token")
                    .map_err(|e| NodeError::HandshakeFailed(e.to_string()))?;
                if echoed != token {
                    return Err(NodeError::HandshakeFailed(
                        "echoed token does not match".to_string(),
                    ));
                }
            }
            Role::Follower => {
                let ping = ctx.next_round(ECHO, "ping").await?;
                let token = ping
                    .data
                    .get_str("token")
                    .map_err(|e| NodeError::HandshakeFailed(e.to_string()))?
                    .to_string();
                ctx.send_round(ECHO, "pong", |data| {
                    data.set_str("token", token);
                });
            }
        }
        Ok(ProtocolOutcome::Completed)
    }
}
