//! Registered peers held by the tracker
//!
//! The registry only records who asked to join. It does not know whether a
//! peer is still alive: liveness is checked by the caller when it matters,
//! and departing peers remove themselves.

use log::info;
use shared::PeerRef;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    /// Peers in registration order
    members: Vec<PeerRef>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self) -> Vec<PeerRef> {
        self.members.clone()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&PeerRef> {
        self.members.iter().find(|peer| peer.id == id)
    }

    /// Appends a peer, replacing an existing entry with the same identity
    pub fn add(&mut self, peer: PeerRef) {
        self.remove(&peer.id);
        info!("Registered {} ({} peers)", peer, self.members.len() + 1);
        self.members.push(peer);
    }

    /// Returns true if an entry was removed
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|peer| peer.id != id);
        self.members.len() != before
    }
}
