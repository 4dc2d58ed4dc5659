//! Server-side username → endpoint directory.
//!
//! Names are kept in a `BTreeMap` so the roster comes out in lexicographic
//! order without sorting.  Reverse lookups (endpoint → name) scan the map;
//! the directory never holds more than `capacity` entries.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use thiserror::Error;

/// Why a join was refused.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    #[error("server full")]
    ServerFull,
    #[error("username not available")]
    UsernameUnavailable,
}

#[derive(Debug, Clone)]
pub struct Directory {
    capacity: usize,
    users: BTreeMap<String, SocketAddr>,
}

impl Directory {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, users: BTreeMap::new() }
    }

    /// Admit `name` at `addr`.
    ///
    /// Capacity is checked before uniqueness, so a full server answers
    /// "full" even for a taken name.  A refused join changes nothing.
    pub fn join(&mut self, name: &str, addr: SocketAddr) -> Result<(), JoinError> {
        if self.users.len() >= self.capacity {
            return Err(JoinError::ServerFull);
        }
        if self.users.contains_key(name) {
            return Err(JoinError::UsernameUnavailable);
        }
        self.users.insert(name.to_string(), addr);
        Ok(())
    }

    /// Remove `name`, returning its endpoint.  Absent names are a no-op.
    pub fn disconnect(&mut self, name: &str) -> Option<SocketAddr> {
        self.users.remove(name)
    }

    pub fn lookup(&self, name: &str) -> Option<SocketAddr> {
        self.users.get(name).copied()
    }

    /// The username registered at `addr`, if any.
    pub fn username_of(&self, addr: SocketAddr) -> Option<&str> {
        self.users
            .iter()
            .find(|(_, a)| **a == addr)
            .map(|(name, _)| name.as_str())
    }

    /// All usernames in lexicographic order.
    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.users.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn join_then_lookup_both_ways() {
        let mut d = Directory::new(10);
        d.join("alice", addr(1)).unwrap();
        assert_eq!(d.lookup("alice"), Some(addr(1)));
        assert_eq!(d.username_of(addr(1)), Some("alice"));
        assert_eq!(d.username_of(addr(2)), None);
    }

    #[test]
    fn full_directory_rejects_without_mutation() {
        let mut d = Directory::new(2);
        d.join("a", addr(1)).unwrap();
        d.join("b", addr(2)).unwrap();

        assert_eq!(d.join("c", addr(3)), Err(JoinError::ServerFull));
        // Full wins over duplicate.
        assert_eq!(d.join("a", addr(4)), Err(JoinError::ServerFull));
        assert_eq!(d.usernames().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(d.lookup("a"), Some(addr(1)));
    }

    #[test]
    fn duplicate_name_rejected_without_mutation() {
        let mut d = Directory::new(10);
        d.join("alice", addr(1)).unwrap();
        assert_eq!(d.join("alice", addr(2)), Err(JoinError::UsernameUnavailable));
        assert_eq!(d.lookup("alice"), Some(addr(1)));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut d = Directory::new(10);
        d.join("alice", addr(1)).unwrap();
        assert_eq!(d.disconnect("bob"), None);
        assert_eq!(d.len(), 1);
        assert_eq!(d.disconnect("alice"), Some(addr(1)));
        assert_eq!(d.disconnect("alice"), None);
        assert!(d.is_empty());
    }

    #[test]
    fn usernames_are_sorted() {
        let mut d = Directory::new(10);
        for (i, name) in ["carol", "alice", "bob", "Zed"].iter().enumerate() {
            d.join(name, addr(i as u16)).unwrap();
        }
        assert_eq!(d.usernames().collect::<Vec<_>>(), vec!["Zed", "alice", "bob", "carol"]);
    }

    #[test]
    fn name_is_free_again_after_disconnect() {
        let mut d = Directory::new(1);
        d.join("alice", addr(1)).unwrap();
        d.disconnect("alice");
        assert!(d.join("alice", addr(2)).is_ok());
        assert_eq!(d.lookup("alice"), Some(addr(2)));
    }
}
