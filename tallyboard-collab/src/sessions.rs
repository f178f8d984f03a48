use std::collections::HashMap;

use parking_lot::Mutex;

use crate::{ConnectionId, PrimaryKey};

type SessionKey = (PrimaryKey, PrimaryKey);

/// Tracks which realtime connection, if any, represents a user inside a room.
///
/// At most one connection per (user, room) pair is ever registered. Both maps
/// are updated under a single lock so they never disagree.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    by_key: HashMap<SessionKey, ConnectionId>,
    by_connection: HashMap<ConnectionId, SessionKey>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for a (user, room) pair, replacing any previous
    /// one. Returns the connection that was displaced, if any.
    pub fn register(
        &self,
        user_id: PrimaryKey,
        room_id: PrimaryKey,
        connection_id: ConnectionId,
    ) -> Option<ConnectionId> {
        let mut state = self.inner.lock();

        let displaced = state.by_key.insert((user_id, room_id), connection_id);

        if let Some(displaced) = displaced {
            state.by_connection.remove(&displaced);
        }

        state.by_connection.insert(connection_id, (user_id, room_id));
        displaced
    }

    /// The connection currently registered for a (user, room) pair
    pub fn lookup(&self, user_id: PrimaryKey, room_id: PrimaryKey) -> Option<ConnectionId> {
        self.inner.lock().by_key.get(&(user_id, room_id)).copied()
    }

    /// The (user, room) pair a connection is registered under
    pub fn connection_entry(&self, connection_id: ConnectionId) -> Option<SessionKey> {
        self.inner.lock().by_connection.get(&connection_id).copied()
    }

    /// Removes the registration for a (user, room) pair. Does nothing when no
    /// registration exists.
    pub fn remove(&self, user_id: PrimaryKey, room_id: PrimaryKey) {
        let mut state = self.inner.lock();

        if let Some(connection_id) = state.by_key.remove(&(user_id, room_id)) {
            state.by_connection.remove(&connection_id);
        }
    }

    /// Removes a registration by connection, returning the (user, room) pair
    /// it was registered under
    pub fn remove_connection(&self, connection_id: ConnectionId) -> Option<SessionKey> {
        let mut state = self.inner.lock();

        let key = state.by_connection.remove(&connection_id)?;

        // Only clear the forward entry if it still points at this connection,
        // a newer login may have overwritten it already
        if state.by_key.get(&key) == Some(&connection_id) {
            state.by_key.remove(&key);
        }

        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_returns_displaced_connection() {
        let registry = SessionRegistry::new();

        let first = ConnectionId::new();
        let second = ConnectionId::new();

        assert_eq!(registry.register(1, 10, first), None);
        assert_eq!(registry.register(1, 10, second), Some(first));

        assert_eq!(registry.lookup(1, 10), Some(second));
        assert_eq!(registry.connection_entry(first), None);
    }

    #[test]
    fn test_remove_connection_keeps_newer_registration() {
        let registry = SessionRegistry::new();

        let stale = ConnectionId::new();
        let fresh = ConnectionId::new();

        registry.register(1, 10, stale);
        registry.register(1, 10, fresh);

        // The stale connection was already displaced, so removing it must not
        // unregister the fresh one
        assert_eq!(registry.remove_connection(stale), None);
        assert_eq!(registry.lookup(1, 10), Some(fresh));

        assert_eq!(registry.remove_connection(fresh), Some((1, 10)));
        assert_eq!(registry.lookup(1, 10), None);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let connection = ConnectionId::new();

        registry.register(2, 20, connection);
        registry.remove(2, 20);
        registry.remove(2, 20);

        assert_eq!(registry.lookup(2, 20), None);
        assert_eq!(registry.connection_entry(connection), None);
    }
}
