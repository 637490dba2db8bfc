//! Client registry and the bounded window of recent locations.
//!
//! Pure bookkeeping, no bus access: the [`Manager`](crate::Manager) holds
//! these behind its state mutex and performs the corresponding object
//! exports/unexports itself.

use std::collections::{HashMap, VecDeque};

/// Object-path prefix for client objects.
pub const CLIENT_PATH_PREFIX: &str = "/org/freedesktop/GeoClue2/Client";

/// Object-path prefix for location objects.
pub const LOCATION_PATH_PREFIX: &str = "/org/freedesktop/GeoClue2/Location";

/// How many recent locations stay exported for late readers.
pub const MAX_STORED_LOCATIONS: usize = 25;

/// Registry of exported clients, indexed both by owning peer and by object
/// path.
///
/// A peer may own several clients (repeated `CreateClient` calls), so the
/// peer index is multi-valued. A client is either present in both indexes
/// or in neither.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    by_peer: HashMap<String, Vec<String>>,
    by_path: HashMap<String, String>,
    next_id: u64,
}

impl ClientRegistry {
    /// Allocates the next client object path. Ids are monotonic and start
    /// at 1.
    pub fn mint_path(&mut self) -> String {
        self.next_id += 1;
        format!("{CLIENT_PATH_PREFIX}/{}", self.next_id)
    }

    /// Returns a client path already registered for `peer`, if any.
    pub fn existing_for_peer(&self, peer: &str) -> Option<&str> {
        self.by_peer
            .get(peer)
            .and_then(|paths| paths.first())
            .map(String::as_str)
    }

    /// Registers `path` as owned by `peer`.
    pub fn insert(&mut self, peer: &str, path: String) {
        self.by_peer
            .entry(peer.to_owned())
            .or_default()
            .push(path.clone());
        self.by_path.insert(path, peer.to_owned());
    }

    /// Removes `path` from both indexes and returns the owning peer, or
    /// `None` if the path was not registered (removal is idempotent).
    pub fn remove(&mut self, path: &str) -> Option<String> {
        let peer = self.by_path.remove(path)?;
        if let Some(paths) = self.by_peer.get_mut(&peer) {
            paths.retain(|p| p != path);
            if paths.is_empty() {
                self.by_peer.remove(&peer);
            }
        }
        Some(peer)
    }

    /// All client paths owned by `peer`.
    pub fn paths_for_peer(&self, peer: &str) -> Vec<String> {
        self.by_peer.get(peer).cloned().unwrap_or_default()
    }

    /// All registered client paths.
    pub fn paths(&self) -> Vec<String> {
        self.by_path.keys().cloned().collect()
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn contains_peer(&self, peer: &str) -> bool {
        self.by_peer.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

/// FIFO window of the most recent location paths.
///
/// The manager keeps a bounded number of Location objects exported so that
/// slow clients can still resolve the path they were last given; older
/// entries are evicted front-first.
#[derive(Debug)]
pub struct LocationWindow {
    entries: VecDeque<String>,
    next_id: u64,
    capacity: usize,
}

impl Default for LocationWindow {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
            next_id: 0,
            capacity: MAX_STORED_LOCATIONS,
        }
    }
}

impl LocationWindow {
    #[cfg(test)]
    fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Allocates the next location object path. Ids are monotonic and
    /// start at 1.
    pub fn mint_path(&mut self) -> String {
        self.next_id += 1;
        format!("{LOCATION_PATH_PREFIX}/{}", self.next_id)
    }

    /// Appends `path` and returns the entries that fell out of the window.
    pub fn push(&mut self, path: String) -> Vec<String> {
        self.entries.push_back(path);
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            if let Some(old) = self.entries.pop_front() {
                evicted.push(old);
            }
        }
        evicted
    }

    /// The most recently stored path.
    pub fn latest(&self) -> Option<&str> {
        self.entries.back().map(String::as_str)
    }

    /// Empties the window, returning every stored path.
    pub fn drain(&mut self) -> Vec<String> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minted_paths_are_monotonic() {
        let mut registry = ClientRegistry::default();
        assert_eq!(registry.mint_path(), "/org/freedesktop/GeoClue2/Client/1");
        assert_eq!(registry.mint_path(), "/org/freedesktop/GeoClue2/Client/2");
        assert_eq!(registry.mint_path(), "/org/freedesktop/GeoClue2/Client/3");
    }

    #[test]
    fn test_reuse_for_peer() {
        let mut registry = ClientRegistry::default();
        assert!(registry.existing_for_peer(":1.42").is_none());

        let path = registry.mint_path();
        registry.insert(":1.42", path.clone());

        // Back-to-back lookups keep returning the same client.
        assert_eq!(registry.existing_for_peer(":1.42"), Some(path.as_str()));
        assert_eq!(registry.existing_for_peer(":1.42"), Some(path.as_str()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_multiple_clients_per_peer() {
        let mut registry = ClientRegistry::default();
        for _ in 0..3 {
            let path = registry.mint_path();
            registry.insert(":1.7", path);
        }
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.paths_for_peer(":1.7").len(), 3);
    }

    #[test]
    fn test_remove_updates_both_indexes() {
        let mut registry = ClientRegistry::default();
        let a = registry.mint_path();
        let b = registry.mint_path();
        registry.insert(":1.7", a.clone());
        registry.insert(":1.7", b.clone());

        assert_eq!(registry.remove(&a), Some(":1.7".to_string()));
        assert!(!registry.contains_path(&a));
        assert!(registry.contains_peer(":1.7"));

        assert_eq!(registry.remove(&b), Some(":1.7".to_string()));
        assert!(!registry.contains_peer(":1.7"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown_path_is_idempotent() {
        let mut registry = ClientRegistry::default();
        assert_eq!(registry.remove("/org/freedesktop/GeoClue2/Client/9"), None);

        let path = registry.mint_path();
        registry.insert(":1.1", path.clone());
        assert!(registry.remove(&path).is_some());
        assert_eq!(registry.remove(&path), None);
    }

    #[test]
    fn test_peer_vanish_lookup_covers_all_clients() {
        let mut registry = ClientRegistry::default();
        let a = registry.mint_path();
        let b = registry.mint_path();
        let other = registry.mint_path();
        registry.insert(":1.7", a.clone());
        registry.insert(":1.7", b.clone());
        registry.insert(":1.8", other.clone());

        let mut vanished = registry.paths_for_peer(":1.7");
        vanished.sort();
        assert_eq!(vanished, vec![a, b]);
        assert!(registry.contains_path(&other));
    }

    #[test]
    fn test_window_paths_are_monotonic() {
        let mut window = LocationWindow::default();
        assert_eq!(window.mint_path(), "/org/freedesktop/GeoClue2/Location/1");
        assert_eq!(window.mint_path(), "/org/freedesktop/GeoClue2/Location/2");
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut window = LocationWindow::default();
        for _ in 0..100 {
            let path = window.mint_path();
            let evicted = window.push(path);
            assert!(window.len() <= MAX_STORED_LOCATIONS);
            for old in &evicted {
                assert!(!old.is_empty());
            }
        }
        assert_eq!(window.len(), MAX_STORED_LOCATIONS);
        assert_eq!(
            window.latest(),
            Some("/org/freedesktop/GeoClue2/Location/100")
        );
    }

    #[test]
    fn test_window_evicts_fifo() {
        let mut window = LocationWindow::with_capacity(2);
        let first = window.mint_path();
        let second = window.mint_path();
        let third = window.mint_path();

        assert!(window.push(first.clone()).is_empty());
        assert!(window.push(second).is_empty());
        let evicted = window.push(third);
        assert_eq!(evicted, vec![first]);
    }

    #[test]
    fn test_window_drain() {
        let mut window = LocationWindow::default();
        for _ in 0..5 {
            let path = window.mint_path();
            window.push(path);
        }
        let drained = window.drain();
        assert_eq!(drained.len(), 5);
        assert!(window.is_empty());
    }
}
