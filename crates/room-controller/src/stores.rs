//! External collaborator traits.
//!
//! The core keeps no durable state of its own. Identity verification,
//! ban lookups, and message/ban persistence live behind these traits so
//! deployments can wire whatever backing services they run. Mock
//! implementations for tests live in the `rc-test-utils` crate.

use crate::errors::CoreError;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Store operation failure. Mapped to [`CoreError::Store`] and logged;
/// store failures never surface to peers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing service could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backing service refused the operation.
    #[error("store rejected operation: {0}")]
    Rejected(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        CoreError::Store(err.to_string())
    }
}

/// Outcome of credential verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Proof did not check out; the identity stays unbound.
    Rejected,
    /// Proof accepted. The admin capability comes from the store's role
    /// claim and is resolved exactly once, here.
    Verified {
        /// Whether the identity carries the admin capability.
        admin: bool,
    },
}

/// Identity/credential store: validates pre-issued proofs and answers
/// ban lookups at authentication time.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    /// Verify an identity's credential proof.
    async fn verify(&self, identity: &str, proof: &str) -> Result<Verification, StoreError>;

    /// Whether the identity is currently banned. Consulted only at
    /// authentication; existing connections are unaffected by new bans.
    async fn is_banned(&self, identity: &str) -> Result<bool, StoreError>;
}

/// A chat message as handed to the persistence store.
///
/// The core only needs enough of this shape to route delivery and mark
/// read state by id; retention and querying are the store's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Message id, assigned by the core at send time.
    pub id: Uuid,
    /// Sender identity.
    pub from: String,
    /// Target identity, `"all"` for admin broadcasts, or `None` for
    /// room chat.
    pub to: Option<String>,
    /// Message text.
    pub text: String,
    /// Read flag; false on append, flipped via [`PersistenceStore::mark_read`].
    pub read: bool,
    /// Send timestamp.
    pub sent_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Build a fresh unread message stamped with the current time.
    pub fn new(from: String, to: Option<String>, text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            from,
            to,
            text,
            read: false,
            sent_at: Utc::now(),
        }
    }
}

/// A ban as handed to the persistence store. Enforcement happens at the
/// target's next authentication via [`CredentialStore::is_banned`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRecord {
    /// Banned identity.
    pub identity: String,
    /// Reason recorded with the ban.
    pub reason: String,
    /// Admin identity that issued the ban.
    pub banned_by: String,
    /// Ban timestamp.
    pub banned_at: DateTime<Utc>,
}

/// Message/ban persistence store: append-only writes plus a point
/// lookup by id for read-marking.
#[async_trait::async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Append a message record.
    async fn append_message(&self, message: StoredMessage) -> Result<(), StoreError>;

    /// Mark a message read by id. Returns whether the id was known.
    async fn mark_read(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Append a ban record.
    async fn record_ban(&self, ban: BanRecord) -> Result<(), StoreError>;
}
