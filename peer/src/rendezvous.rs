//! Client side of the tracker protocol

use crate::error::NodeError;
use shared::rpc;
use shared::{PeerRef, Registration, TrackerRequest, TrackerResponse};
use std::net::SocketAddr;
use std::time::Duration;

/// Talks to the rendezvous tracker
///
/// Registration makes the tracker run a full election on the caller, and the
/// tracker serializes registrations, so every call here uses the long bound.
#[derive(Debug, Clone)]
pub struct TrackerClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl TrackerClient {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    async fn request(&self, request: TrackerRequest) -> Result<TrackerResponse, NodeError> {
        match rpc::call(self.addr, &request, self.timeout).await? {
            TrackerResponse::Error(message) => Err(NodeError::Tracker(message)),
            response => Ok(response),
        }
    }

    /// Registers `peer`, which makes the tracker run an election on it
    pub async fn register(&self, peer: &PeerRef) -> Result<(), NodeError> {
        let request = TrackerRequest::Register { peer: peer.clone() };
        match self.request(request).await? {
            TrackerResponse::Registered(Registration::Accepted) => Ok(()),
            TrackerResponse::Registered(Registration::DuplicateIdentity) => {
                Err(NodeError::DuplicateIdentity(peer.id.clone()))
            }
            TrackerResponse::Registered(Registration::ElectionFailed) => {
                Err(NodeError::RegistrationFailed(peer.id.clone()))
            }
            other => Err(unexpected(other)),
        }
    }

    pub async fn deregister(&self, id: &str) -> Result<(), NodeError> {
        let request = TrackerRequest::Deregister { id: id.to_string() };
        match self.request(request).await? {
            TrackerResponse::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn membership(&self) -> Result<Vec<PeerRef>, NodeError> {
        match self.request(TrackerRequest::GetMembership).await? {
            TrackerResponse::Membership(members) => Ok(members),
            other => Err(unexpected(other)),
        }
    }

    pub async fn grid_size(&self) -> Result<usize, NodeError> {
        match self.request(TrackerRequest::GetGridSize).await? {
            TrackerResponse::GridSize(size) => Ok(size),
            other => Err(unexpected(other)),
        }
    }

    pub async fn treasure_count(&self) -> Result<usize, NodeError> {
        match self.request(TrackerRequest::GetTreasureCount).await? {
            TrackerResponse::TreasureCount(count) => Ok(count),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: TrackerResponse) -> NodeError {
    NodeError::Tracker(format!("unexpected response {:?}", response))
}
