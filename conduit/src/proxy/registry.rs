use super::connection::Connection;
use crate::utils::{Key, Slab};

/// Owner of every live connection.
///
/// Connections are addressed by [`Key`]; the peer relation is stored as a
/// key as well and is only ever changed here, on both sides at once. A
/// connection leaves the registry only through [`remove`](Self::remove),
/// which clears its peer's back-reference first, so no connection is ever
/// left pointing at a removed one.
pub(crate) struct Registry {
    connections: Slab<Connection>,
}

impl Registry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            connections: Slab::new(capacity),
        }
    }

    pub(crate) fn insert(&mut self, conn: Connection) -> Key {
        debug_assert!(conn.peer.is_none());
        self.connections.insert(conn)
    }

    pub(crate) fn get(&self, key: Key) -> Option<&Connection> {
        self.connections.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut Connection> {
        self.connections.get_mut(key)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: Key) -> bool {
        self.connections.contains(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns the peer of `key`, if it has one.
    pub(crate) fn peer_of(&self, key: Key) -> Option<Key> {
        self.get(key).and_then(|conn| conn.peer)
    }

    /// Links `a` and `b` as tunnel peers.
    ///
    /// Both must be live and currently unpaired; otherwise nothing changes
    /// and `false` is returned.
    pub(crate) fn pair(&mut self, a: Key, b: Key) -> bool {
        let Some((first, second)) = self.connections.get2_mut(a, b) else {
            return false;
        };

        if first.peer.is_some() || second.peer.is_some() {
            return false;
        }

        first.peer = Some(b);
        second.peer = Some(a);
        true
    }

    /// Dissolves the pair `key` belongs to and returns the former peer.
    pub(crate) fn unpair(&mut self, key: Key) -> Option<Key> {
        let peer = self.get_mut(key)?.peer.take()?;

        if let Some(other) = self.get_mut(peer) {
            debug_assert_eq!(other.peer, Some(key));
            other.peer = None;
        }

        Some(peer)
    }

    /// Removes a connection, unpairing it first.
    pub(crate) fn remove(&mut self, key: Key) -> Option<Connection> {
        self.unpair(key);
        self.connections.remove(key)
    }

    /// Returns mutable access to a connection and its peer together.
    pub(crate) fn with_peer_mut(&mut self, key: Key) -> Option<(&mut Connection, &mut Connection)> {
        let peer = self.peer_of(key)?;
        self.connections.get2_mut(key, peer)
    }

    /// Keys of every live connection.
    #[cfg(test)]
    pub(crate) fn keys(&self) -> Vec<Key> {
        self.connections.iter().map(|(key, _)| key).collect()
    }

    /// Checks that every peer relation is mutual.
    #[cfg(test)]
    pub(crate) fn is_symmetric(&self) -> bool {
        self.connections.iter().all(|(key, conn)| match conn.peer {
            Some(peer) => self.peer_of(peer) == Some(key),
            None => true,
        })
    }
}
