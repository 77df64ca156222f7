//! In-memory registry of known peers.
//!
//! The directory maps peer identifiers to their public key, listener
//! endpoint and (after a successful handshake) session key. Entries are
//! created by registration or by merged directory responses and persist
//! for the process lifetime; there is no unregister operation.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{NodeError, Result};
use crate::transport::Endpoint;

/// One peer's directory entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserRecord {
    /// Verification key bytes, set at registration.
    pub public_key: Option<Vec<u8>>,
    /// Listener endpoint.
    pub endpoint: Option<Endpoint>,
    /// Symmetric key from the last successful handshake.
    pub session_key: Option<Vec<u8>>,
}

/// Field-wise update applied by [`UserDirectory::add_user`].
///
/// `None` fields leave the stored record untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub public_key: Option<Vec<u8>>,
    pub endpoint: Option<Endpoint>,
    pub session_key: Option<Vec<u8>>,
}

/// Registry mapping peer identifier to [`UserRecord`].
///
/// Every method is a single atomic map operation; multi-step sequences
/// such as "check key absent, then establish one" are not transactional
/// and callers tolerate redundant handshakes instead.
#[derive(Default)]
pub struct UserDirectory {
    users: DashMap<String, UserRecord>,
}

impl UserDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or merges fields for `user`.
    ///
    /// An existing public key is never replaced; endpoint and session key
    /// take the update's value when present.
    pub fn add_user(&self, user: &str, update: UserUpdate) {
        let mut record = self.users.entry(user.to_string()).or_default();
        if record.public_key.is_none() {
            if let Some(public_key) = update.public_key {
                record.public_key = Some(public_key);
            }
        }
        if let Some(endpoint) = update.endpoint {
            record.endpoint = Some(endpoint);
        }
        if let Some(session_key) = update.session_key {
            record.session_key = Some(session_key);
        }
    }

    /// Inserts a fresh record, rejecting an already-known identifier.
    ///
    /// A single map operation, so racing registrations for the same
    /// identifier admit exactly one.
    pub fn register_user(&self, user: &str, public_key: Vec<u8>, endpoint: Endpoint) -> Result<()> {
        match self.users.entry(user.to_string()) {
            Entry::Occupied(_) => Err(NodeError::DuplicateUser {
                user: user.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(UserRecord {
                    public_key: Some(public_key),
                    endpoint: Some(endpoint),
                    session_key: None,
                });
                Ok(())
            }
        }
    }

    /// Replaces the session key of an existing record.
    pub fn set_session_key(&self, user: &str, session_key: Vec<u8>) -> Result<()> {
        let mut record = self
            .users
            .get_mut(user)
            .ok_or_else(|| NodeError::UnknownUser {
                user: user.to_string(),
            })?;
        record.session_key = Some(session_key);
        Ok(())
    }

    /// Whether the identifier has a directory entry.
    pub fn has_user(&self, user: &str) -> bool {
        self.users.contains_key(user)
    }

    /// The peer's verification key bytes.
    pub fn public_key(&self, user: &str) -> Result<Vec<u8>> {
        self.users
            .get(user)
            .and_then(|r| r.public_key.clone())
            .ok_or_else(|| NodeError::UnknownUser {
                user: user.to_string(),
            })
    }

    /// The peer's listener endpoint.
    pub fn connection_info(&self, user: &str) -> Result<Endpoint> {
        self.users
            .get(user)
            .and_then(|r| r.endpoint.clone())
            .ok_or_else(|| NodeError::UnknownUser {
                user: user.to_string(),
            })
    }

    /// The peer's session key; absent before the first handshake.
    pub fn session_key(&self, user: &str) -> Result<Vec<u8>> {
        self.users
            .get(user)
            .and_then(|r| r.session_key.clone())
            .ok_or_else(|| NodeError::UnknownUser {
                user: user.to_string(),
            })
    }

    /// The fields safe to share with other peers: public key and endpoint.
    pub fn public_info(&self, user: &str) -> Result<(Vec<u8>, Endpoint)> {
        let record = self.users.get(user).ok_or_else(|| NodeError::UnknownUser {
            user: user.to_string(),
        })?;
        match (&record.public_key, &record.endpoint) {
            (Some(public_key), Some(endpoint)) => Ok((public_key.clone(), endpoint.clone())),
            _ => Err(NodeError::UnknownUser {
                user: user.to_string(),
            }),
        }
    }
}
