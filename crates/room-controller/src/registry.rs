//! Connection registry - the only place connection lifecycle is tracked.
//!
//! Maps a live transport connection to its identity binding, admin
//! capability, and current room. Also maintains the identity-to-connections
//! reverse index used for private-message targeting and ban notices; the
//! index is a multimap because one identity may hold several connections.
//!
//! All state sits behind a sync mutex and no lock is held across an await,
//! so registration and teardown stay independent of room serialization.

use crate::errors::CoreError;
use common::types::ConnectionId;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{debug, warn};

/// One live connection's registry entry.
#[derive(Debug, Clone)]
struct ConnectionEntry {
    /// Bound identity, `None` until authenticated.
    identity: Option<String>,
    /// Admin capability, resolved once at bind time.
    admin: bool,
    /// Room the connection currently belongs to, if any.
    current_room: Option<String>,
}

/// Identity binding of an authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityBinding {
    /// Bound identity.
    pub identity: String,
    /// Admin capability, resolved at bind time and never re-derived.
    pub admin: bool,
}

/// Result of removing a connection from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedConnection {
    /// Room the connection was in when removed, if any.
    pub last_room: Option<String>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// Live connections by id.
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// Identity to connection ids (multimap; duplicate logins allowed).
    by_identity: HashMap<String, HashSet<ConnectionId>>,
    /// Next connection id to hand out.
    next_id: u64,
}

/// Connection registry.
///
/// Owns `Connection` records exclusively: created on [`register`],
/// mutated on bind/join/leave, destroyed on [`unregister`].
///
/// [`register`]: ConnectionRegistry::register
/// [`unregister`]: ConnectionRegistry::unregister
#[derive(Debug)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
    /// Cap on concurrent registered connections.
    max_connections: u64,
}

impl ConnectionRegistry {
    /// Create an empty registry with the given connection cap.
    #[must_use]
    pub fn new(max_connections: u64) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            max_connections,
        }
    }

    /// Allocate a fresh connection id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CapacityExceeded`] at the configured cap, or
    /// [`CoreError::Internal`] on id-space exhaustion.
    pub fn register(&self) -> Result<ConnectionId, CoreError> {
        let mut inner = self.lock();

        if inner.connections.len() as u64 >= self.max_connections {
            warn!(
                target: "rc.registry",
                active = inner.connections.len(),
                cap = self.max_connections,
                "Connection registration refused at capacity"
            );
            return Err(CoreError::CapacityExceeded);
        }

        let id = ConnectionId(inner.next_id);
        inner.next_id = inner
            .next_id
            .checked_add(1)
            .ok_or_else(|| CoreError::Internal("connection id space exhausted".to_string()))?;

        inner.connections.insert(
            id,
            ConnectionEntry {
                identity: None,
                admin: false,
                current_room: None,
            },
        );

        debug!(target: "rc.registry", connection_id = %id, "Connection registered");
        Ok(id)
    }

    /// Bind an identity and admin capability to a connection.
    ///
    /// Idempotent per connection: rebinding the same identity is a no-op,
    /// rebinding a different identity moves the reverse-index entry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Unauthenticated`] if the connection is not
    /// registered (a late event from a dead connection).
    pub fn bind_identity(
        &self,
        connection_id: ConnectionId,
        identity: &str,
        admin: bool,
    ) -> Result<(), CoreError> {
        let mut inner = self.lock();

        let previous = {
            let entry = inner
                .connections
                .get_mut(&connection_id)
                .ok_or(CoreError::Unauthenticated)?;
            let previous = entry.identity.replace(identity.to_string());
            entry.admin = admin;
            previous
        };

        if let Some(old) = previous {
            if old != identity {
                if let Some(set) = inner.by_identity.get_mut(&old) {
                    set.remove(&connection_id);
                    if set.is_empty() {
                        inner.by_identity.remove(&old);
                    }
                }
            }
        }

        inner
            .by_identity
            .entry(identity.to_string())
            .or_default()
            .insert(connection_id);

        debug!(
            target: "rc.registry",
            connection_id = %connection_id,
            admin,
            "Identity bound"
        );
        Ok(())
    }

    /// The identity binding of a connection, `None` until authenticated
    /// or if the connection is gone.
    pub fn binding(&self, connection_id: ConnectionId) -> Option<IdentityBinding> {
        let inner = self.lock();
        let entry = inner.connections.get(&connection_id)?;
        entry.identity.as_ref().map(|identity| IdentityBinding {
            identity: identity.clone(),
            admin: entry.admin,
        })
    }

    /// Whether the connection holds the admin capability.
    pub fn is_admin(&self, connection_id: ConnectionId) -> bool {
        let inner = self.lock();
        inner
            .connections
            .get(&connection_id)
            .is_some_and(|e| e.admin)
    }

    /// The room a connection currently belongs to.
    pub fn current_room(&self, connection_id: ConnectionId) -> Option<String> {
        let inner = self.lock();
        inner
            .connections
            .get(&connection_id)?
            .current_room
            .clone()
    }

    /// Record the connection's current room (or `None` on leave).
    ///
    /// No-op for unregistered connections; late room updates from dead
    /// connections must not resurrect registry entries.
    pub fn set_current_room(&self, connection_id: ConnectionId, room_id: Option<String>) {
        let mut inner = self.lock();
        if let Some(entry) = inner.connections.get_mut(&connection_id) {
            entry.current_room = room_id;
        }
    }

    /// All live connections bound to an identity.
    pub fn connections_for_identity(&self, identity: &str) -> Vec<ConnectionId> {
        let inner = self.lock();
        inner
            .by_identity
            .get(identity)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Identities currently in a room, across all rooms. Answers the
    /// admin `get_all_users` introspection without polling room actors.
    pub fn identities_in_rooms(&self) -> Vec<String> {
        let inner = self.lock();
        let mut identities: Vec<String> = inner
            .connections
            .values()
            .filter(|e| e.current_room.is_some())
            .filter_map(|e| e.identity.clone())
            .collect();
        identities.sort();
        identities.dedup();
        identities
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.lock().connections.len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.lock().connections.is_empty()
    }

    /// Remove a connection, returning its last known room id so the
    /// caller can run membership cleanup exactly once.
    ///
    /// Idempotent: a second call for the same id returns `None`, letting
    /// callers skip teardown that already ran.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<RemovedConnection> {
        let mut inner = self.lock();

        let entry = inner.connections.remove(&connection_id)?;

        if let Some(identity) = &entry.identity {
            if let Some(set) = inner.by_identity.get_mut(identity) {
                set.remove(&connection_id);
                if set.is_empty() {
                    inner.by_identity.remove(identity);
                }
            }
        }

        debug!(
            target: "rc.registry",
            connection_id = %connection_id,
            room_id = entry.current_room.as_deref(),
            "Connection unregistered"
        );
        Some(RemovedConnection {
            last_room: entry.current_room,
        })
    }

    /// Lock the inner state, recovering from poisoning.
    ///
    /// The registry holds plain data, so a panic mid-update cannot leave
    /// it in a state worse than the panicking operation itself.
    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
