//! Local view of the game's membership
//!
//! Every node keeps its own ordered copy of the member list. There is no single
//! owner: the list is overwritten by elections and by snapshot deliveries, so
//! two nodes may briefly disagree until the next of either arrives.

use log::warn;
use shared::PeerRef;

/// Ordered collection of node references
///
/// Order matters: elections visit members in list order, and after an election
/// the list is rebuilt in ascending identity order so the highest-ranked node
/// (the primary) sits last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    members: Vec<PeerRef>,
}

impl Membership {
    pub fn new(members: Vec<PeerRef>) -> Self {
        let mut membership = Self::default();
        for peer in members {
            membership.insert(peer);
        }
        membership
    }

    pub fn members(&self) -> &[PeerRef] {
        &self.members
    }

    pub fn to_vec(&self) -> Vec<PeerRef> {
        self.members.clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.members.iter().map(|peer| peer.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resolve(id).is_some()
    }

    /// Finds the reference registered under `id`
    pub fn resolve(&self, id: &str) -> Option<&PeerRef> {
        self.members.iter().find(|peer| peer.id == id)
    }

    /// Adds a peer, replacing any stale entry that carries the same identity
    pub fn insert(&mut self, peer: PeerRef) {
        match self.members.iter_mut().find(|existing| existing.id == peer.id) {
            Some(existing) => *existing = peer,
            None => self.members.push(peer),
        }
    }

    /// Removes the member with the given identity. Returns true if it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|peer| peer.id != id);
        self.members.len() != before
    }

    /// All members except `id`, in list order
    pub fn others<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a PeerRef> + 'a {
        self.members.iter().filter(move |peer| peer.id != id)
    }

    /// Rebuilds a membership from ranked identities
    ///
    /// Each id is resolved against `self`; ids with no known reference are
    /// dropped with a warning. The result keeps the order of `ranked`.
    pub fn rebuild(&self, ranked: &[String]) -> Membership {
        let mut members = Vec::with_capacity(ranked.len());
        for id in ranked {
            match self.resolve(id) {
                Some(peer) => members.push(peer.clone()),
                None => warn!("Could not resolve member {}, dropping it", id),
            }
        }
        Membership { members }
    }
}

impl From<Vec<PeerRef>> for Membership {
    fn from(members: Vec<PeerRef>) -> Self {
        Membership::new(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn peer(id: &str, port: u16) -> PeerRef {
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        PeerRef::new(id, addr)
    }

    #[test]
    fn test_membership_creation() {
        let membership = Membership::new(vec![peer("ab", 9001), peer("cd", 9002)]);
        assert_eq!(membership.len(), 2);
        assert!(!membership.is_empty());
        assert_eq!(membership.ids(), vec!["ab", "cd"]);
    }

    #[test]
    fn test_duplicate_identity_replaces_entry() {
        let mut membership = Membership::new(vec![peer("ab", 9001)]);
        membership.insert(peer("ab", 9005));

        assert_eq!(membership.len(), 1);
        assert_eq!(membership.resolve("ab").unwrap().addr.port(), 9005);
    }

    #[test]
    fn test_remove_member() {
        let mut membership = Membership::new(vec![peer("ab", 9001), peer("cd", 9002)]);

        assert!(membership.remove("ab"));
        assert!(!membership.contains("ab"));
        assert!(!membership.remove("ab"));
        assert_eq!(membership.len(), 1);
    }

    #[test]
    fn test_others_skips_self() {
        let membership =
            Membership::new(vec![peer("ab", 9001), peer("cd", 9002), peer("ef", 9003)]);
        let others: Vec<&str> = membership.others("cd").map(|p| p.id.as_str()).collect();
        assert_eq!(others, vec!["ab", "ef"]);
    }

    #[test]
    fn test_rebuild_drops_unknown_ids() {
        let membership = Membership::new(vec![peer("ab", 9001), peer("cd", 9002)]);
        let ranked = vec!["ab".to_string(), "zz".to_string(), "cd".to_string()];

        let rebuilt = membership.rebuild(&ranked);
        assert_eq!(rebuilt.ids(), vec!["ab", "cd"]);
    }
}
