//! The table of peers currently known to this client.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::protocol::KnownUser;

/// A remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// The peer's handle.
    pub handle: String,
    /// Address the peer was seen at.
    pub ip: IpAddr,
    /// The peer's chat port.
    pub port: u16,
}

impl Peer {
    /// Creates a new peer.
    pub fn new(handle: impl Into<String>, ip: IpAddr, port: u16) -> Self {
        Self {
            handle: handle.into(),
            ip,
            port,
        }
    }

    /// The peer's chat address.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.handle, self.ip, self.port)
    }
}

impl From<KnownUser> for Peer {
    fn from(user: KnownUser) -> Self {
        Peer::new(user.handle, user.ip, user.port)
    }
}

impl From<&Peer> for KnownUser {
    fn from(peer: &Peer) -> Self {
        KnownUser {
            handle: peer.handle.clone(),
            ip: peer.ip,
            port: peer.port,
        }
    }
}

/// Shared peer list, keyed by handle.
///
/// Cloning the table yields another handle to the same entries.
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    inner: Arc<Mutex<BTreeMap<String, Peer>>>,
}

impl PeerTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Peer>> {
        // A panic while holding the lock cannot leave a map half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts or refreshes a peer. Returns true when the table changed.
    pub fn upsert(&self, peer: Peer) -> bool {
        let mut peers = self.lock();
        match peers.get(&peer.handle) {
            Some(existing) if *existing == peer => false,
            _ => {
                peers.insert(peer.handle.clone(), peer);
                true
            }
        }
    }

    /// Merges many peers, skipping `self_handle`. Returns the number of changes.
    pub fn merge<I>(&self, peers: I, self_handle: &str) -> usize
    where
        I: IntoIterator<Item = Peer>,
    {
        peers
            .into_iter()
            .filter(|peer| peer.handle != self_handle)
            .filter(|peer| self.upsert(peer.clone()))
            .count()
    }

    /// Removes the peer named `handle`. Returns true when it was present.
    pub fn remove(&self, handle: &str) -> bool {
        self.lock().remove(handle).is_some()
    }

    /// Looks up one peer.
    pub fn get(&self, handle: &str) -> Option<Peer> {
        self.lock().get(handle).cloned()
    }

    /// All peers, ordered by handle.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.lock().values().cloned().collect()
    }

    /// All peers except `self_handle`.
    pub fn others(&self, self_handle: &str) -> Vec<Peer> {
        self.lock()
            .values()
            .filter(|peer| peer.handle != self_handle)
            .cloned()
            .collect()
    }

    /// Number of peers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true when no peer is known.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(handle: &str, port: u16) -> Peer {
        Peer::new(handle, "192.168.1.10".parse().unwrap(), port)
    }

    #[test]
    fn upsert_reports_changes() {
        let table = PeerTable::new();
        assert!(table.upsert(peer("Bob", 5001)));
        assert!(!table.upsert(peer("Bob", 5001)));
        assert!(table.upsert(peer("Bob", 5002)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("Bob").unwrap().port, 5002);
    }

    #[test]
    fn merge_skips_self() {
        let table = PeerTable::new();
        let changed = table.merge(
            vec![peer("Alice", 5000), peer("Bob", 5001), peer("Carol", 5002)],
            "Alice",
        );
        assert_eq!(changed, 2);
        assert!(table.get("Alice").is_none());
    }

    #[test]
    fn clones_share_entries() {
        let table = PeerTable::new();
        let other = table.clone();
        other.upsert(peer("Bob", 5001));
        assert!(table.remove("Bob"));
        assert!(!table.remove("Bob"));
        assert!(other.is_empty());
    }

    #[test]
    fn snapshot_is_sorted_and_others_excludes_self() {
        let table = PeerTable::new();
        table.upsert(peer("Zed", 1));
        table.upsert(peer("Amy", 2));
        let handles: Vec<_> = table.snapshot().into_iter().map(|p| p.handle).collect();
        assert_eq!(handles, vec!["Amy", "Zed"]);
        assert_eq!(table.others("Amy").len(), 1);
    }

    #[test]
    fn display_peer() {
        assert_eq!(peer("Bob", 5001).to_string(), "Bob (192.168.1.10:5001)");
    }
}
