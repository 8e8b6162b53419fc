//! Mock credential and persistence stores.
//!
//! Both mocks implement the Room Controller store traits over plain
//! in-memory collections. The `failing()` constructors return stores
//! whose every operation fails with `StoreError::Unavailable`, for
//! testing the fire-and-forget persistence paths.

use async_trait::async_trait;
use room_controller::stores::{
    BanRecord, CredentialStore, PersistenceStore, StoreError, StoredMessage, Verification,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct UserRecord {
    proof: String,
    admin: bool,
}

/// In-memory credential store.
///
/// Configured at construction with builder methods; identities not
/// registered are rejected. Call counts are tracked for assertions.
#[derive(Debug, Default)]
pub struct MockCredentialStore {
    users: HashMap<String, UserRecord>,
    banned: HashSet<String>,
    failing: bool,
    verify_calls: AtomicUsize,
    ban_checks: AtomicUsize,
}

impl MockCredentialStore {
    /// Create an empty store that rejects everyone.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose every operation fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Register a non-admin identity with its accepted proof.
    #[must_use]
    pub fn with_user(mut self, identity: &str, proof: &str) -> Self {
        self.users.insert(
            identity.to_string(),
            UserRecord {
                proof: proof.to_string(),
                admin: false,
            },
        );
        self
    }

    /// Register an admin identity with its accepted proof.
    #[must_use]
    pub fn with_admin(mut self, identity: &str, proof: &str) -> Self {
        self.users.insert(
            identity.to_string(),
            UserRecord {
                proof: proof.to_string(),
                admin: true,
            },
        );
        self
    }

    /// Mark an identity as banned.
    #[must_use]
    pub fn with_banned(mut self, identity: &str) -> Self {
        self.banned.insert(identity.to_string());
        self
    }

    /// Number of `verify` calls made against this store.
    #[must_use]
    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::Relaxed)
    }

    /// Number of `is_banned` calls made against this store.
    #[must_use]
    pub fn ban_checks(&self) -> usize {
        self.ban_checks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CredentialStore for MockCredentialStore {
    async fn verify(&self, identity: &str, proof: &str) -> Result<Verification, StoreError> {
        self.verify_calls.fetch_add(1, Ordering::Relaxed);
        if self.failing {
            return Err(StoreError::Unavailable("mock store is down".to_string()));
        }
        Ok(match self.users.get(identity) {
            Some(record) if record.proof == proof => Verification::Verified {
                admin: record.admin,
            },
            _ => Verification::Rejected,
        })
    }

    async fn is_banned(&self, identity: &str) -> Result<bool, StoreError> {
        self.ban_checks.fetch_add(1, Ordering::Relaxed);
        if self.failing {
            return Err(StoreError::Unavailable("mock store is down".to_string()));
        }
        Ok(self.banned.contains(identity))
    }
}

/// In-memory persistence store recording every write for assertions.
#[derive(Debug, Default)]
pub struct MockPersistenceStore {
    messages: Mutex<Vec<StoredMessage>>,
    bans: Mutex<Vec<BanRecord>>,
    failing: bool,
}

impl MockPersistenceStore {
    /// Create an empty recording store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose every write fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// All messages appended so far, in append order.
    #[must_use]
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// All bans recorded so far, in append order.
    #[must_use]
    pub fn bans(&self) -> Vec<BanRecord> {
        self.bans.lock().unwrap().clone()
    }
}

#[async_trait]
impl PersistenceStore for MockPersistenceStore {
    async fn append_message(&self, message: StoredMessage) -> Result<(), StoreError> {
        if self.failing {
            return Err(StoreError::Unavailable("mock store is down".to_string()));
        }
        self.messages.lock().unwrap().push(message);
        Ok(())
    }

    async fn mark_read(&self, id: Uuid) -> Result<bool, StoreError> {
        if self.failing {
            return Err(StoreError::Unavailable("mock store is down".to_string()));
        }
        let mut messages = self.messages.lock().unwrap();
        match messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_ban(&self, ban: BanRecord) -> Result<(), StoreError> {
        if self.failing {
            return Err(StoreError::Unavailable("mock store is down".to_string()));
        }
        self.bans.lock().unwrap().push(ban);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verify_matches_proof_and_role() {
        let store = MockCredentialStore::new()
            .with_user("alice", "proof-a")
            .with_admin("root", "proof-r");

        assert_eq!(
            store.verify("alice", "proof-a").await.unwrap(),
            Verification::Verified { admin: false }
        );
        assert_eq!(
            store.verify("root", "proof-r").await.unwrap(),
            Verification::Verified { admin: true }
        );
        assert_eq!(
            store.verify("alice", "wrong").await.unwrap(),
            Verification::Rejected
        );
        assert_eq!(
            store.verify("nobody", "proof").await.unwrap(),
            Verification::Rejected
        );
        assert_eq!(store.verify_calls(), 4);
    }

    #[tokio::test]
    async fn mark_read_flips_flag_by_id() {
        let store = MockPersistenceStore::new();
        let message = StoredMessage::new("alice".to_string(), None, "hi".to_string());
        let id = message.id;
        store.append_message(message).await.unwrap();

        assert!(store.mark_read(id).await.unwrap());
        assert!(store.messages()[0].read);
        assert!(!store.mark_read(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn failing_store_errors_on_every_operation() {
        let credentials = MockCredentialStore::failing();
        assert!(credentials.verify("alice", "proof").await.is_err());
        assert!(credentials.is_banned("alice").await.is_err());

        let store = MockPersistenceStore::failing();
        let message = StoredMessage::new("alice".to_string(), None, "hi".to_string());
        assert!(store.append_message(message).await.is_err());
        assert!(store.bans().is_empty());
    }
}
