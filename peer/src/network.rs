//! Peer network layer: the inbound listener and the typed outbound client

use crate::node::Node;
use log::{debug, error, warn};
use shared::rpc::{self, read_frame, write_frame};
use shared::{
    GameSnapshot, PeerRef, PeerRequest, PeerResponse, Position, Role, RpcError, PONG,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Spawns the task that accepts peer connections
///
/// Each connection carries exactly one request and is served on its own task,
/// so a slow election never blocks a heartbeat.
pub fn spawn_listener(node: Arc<Node>, listener: TcpListener) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let node = Arc::clone(&node);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(node, stream).await {
                            debug!("Connection from {} ended early: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    })
}

async fn serve_connection(node: Arc<Node>, mut stream: TcpStream) -> Result<(), RpcError> {
    stream.set_nodelay(true)?;
    let request: PeerRequest = read_frame(&mut stream).await?;
    let response = node.handle(request).await;
    write_frame(&mut stream, &response).await
}

impl Node {
    /// Dispatches one inbound request to the matching operation
    pub(crate) async fn handle(&self, request: PeerRequest) -> PeerResponse {
        match request {
            PeerRequest::GetIdentity => PeerResponse::Identity(self.id()),
            PeerRequest::SetIdentity { id } => {
                self.set_identity(id).await;
                PeerResponse::Ack
            }
            PeerRequest::GetRole => PeerResponse::Role(self.role().await),
            PeerRequest::Ping => PeerResponse::Pong(PONG.to_string()),
            PeerRequest::ClearReceivedIds => {
                self.clear_received_ids().await;
                PeerResponse::Ack
            }
            PeerRequest::SetMembership { members } => {
                self.set_membership(members).await;
                PeerResponse::Ack
            }
            PeerRequest::BroadcastId => {
                self.broadcast_id().await;
                PeerResponse::Ack
            }
            PeerRequest::ReceiveId { id } => {
                self.receive_id(id).await;
                PeerResponse::Ack
            }
            PeerRequest::RunElection { candidates } => {
                match self.initiate_election(candidates).await {
                    Ok(()) => PeerResponse::Ack,
                    Err(e) => PeerResponse::Error(e.to_string()),
                }
            }
            PeerRequest::ElectServers => match self.elect_servers().await {
                Ok(_) => PeerResponse::Ack,
                Err(e) => PeerResponse::Error(e.to_string()),
            },
            PeerRequest::PromoteBackupToPrimary => {
                self.promote_backup_to_primary().await;
                PeerResponse::Ack
            }
            PeerRequest::DemoteToBackup => {
                self.demote_to_backup().await;
                PeerResponse::Ack
            }
            PeerRequest::DemoteToPlayer => {
                self.demote_to_player().await;
                PeerResponse::Ack
            }
            PeerRequest::GetGameState { requester } => {
                PeerResponse::Snapshot(self.get_game_state(&requester).await)
            }
            PeerRequest::AwaitInitialized => {
                // Answer before the caller's own bound runs out.
                let limit = self.config.election_timeout / 2;
                PeerResponse::Initialized(self.wait_initialized(limit).await)
            }
            PeerRequest::UpdateGameState { snapshot } => {
                match self.accept_replica(snapshot).await {
                    Ok(()) => PeerResponse::Ack,
                    Err(e) => PeerResponse::Error(e.to_string()),
                }
            }
            PeerRequest::ApplyMove { requester, x, y } => {
                PeerResponse::Snapshot(self.apply_move(&requester, Position::new(x, y)).await)
            }
            PeerRequest::RemovePlayerState { id } => {
                self.remove_player_state(&id).await;
                PeerResponse::Ack
            }
            PeerRequest::PruneMembership => {
                self.prune_membership().await;
                PeerResponse::Ack
            }
            PeerRequest::Leave => match self.leave().await {
                Ok(()) => {
                    self.shutdown();
                    PeerResponse::Ack
                }
                Err(e) => {
                    warn!("Leave failed: {}", e);
                    PeerResponse::Error(e.to_string())
                }
            },
        }
    }
}

/// Typed calls to other nodes
///
/// Short calls are bounded by `call_timeout`. Calls that run a whole election
/// round, fan out to the membership, or wait for bootstrap use
/// `election_timeout` instead.
#[derive(Debug, Clone)]
pub struct PeerClient {
    call_timeout: Duration,
    election_timeout: Duration,
}

impl PeerClient {
    pub fn new(call_timeout: Duration, election_timeout: Duration) -> Self {
        Self {
            call_timeout,
            election_timeout,
        }
    }

    async fn request(
        &self,
        peer: &PeerRef,
        request: PeerRequest,
        timeout: Duration,
    ) -> Result<PeerResponse, RpcError> {
        match rpc::call(peer.addr, &request, timeout).await? {
            PeerResponse::Error(message) => Err(RpcError::Remote(message)),
            response => Ok(response),
        }
    }

    async fn expect_ack(
        &self,
        peer: &PeerRef,
        request: PeerRequest,
        timeout: Duration,
    ) -> Result<(), RpcError> {
        match self.request(peer, request, timeout).await? {
            PeerResponse::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn expect_snapshot(
        &self,
        peer: &PeerRef,
        request: PeerRequest,
    ) -> Result<GameSnapshot, RpcError> {
        match self.request(peer, request, self.call_timeout).await? {
            PeerResponse::Snapshot(snapshot) => Ok(snapshot),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_identity(&self, peer: &PeerRef) -> Result<String, RpcError> {
        match self
            .request(peer, PeerRequest::GetIdentity, self.call_timeout)
            .await?
        {
            PeerResponse::Identity(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    pub async fn set_identity(&self, peer: &PeerRef, id: &str) -> Result<(), RpcError> {
        let request = PeerRequest::SetIdentity { id: id.to_string() };
        self.expect_ack(peer, request, self.call_timeout).await
    }

    pub async fn get_role(&self, peer: &PeerRef) -> Result<Role, RpcError> {
        match self
            .request(peer, PeerRequest::GetRole, self.call_timeout)
            .await?
        {
            PeerResponse::Role(role) => Ok(role),
            other => Err(unexpected(other)),
        }
    }

    pub async fn ping(&self, peer: &PeerRef) -> Result<(), RpcError> {
        match self.request(peer, PeerRequest::Ping, self.call_timeout).await? {
            PeerResponse::Pong(reply) if reply == PONG => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn clear_received_ids(&self, peer: &PeerRef) -> Result<(), RpcError> {
        self.expect_ack(peer, PeerRequest::ClearReceivedIds, self.call_timeout)
            .await
    }

    pub async fn set_membership(
        &self,
        peer: &PeerRef,
        members: Vec<PeerRef>,
    ) -> Result<(), RpcError> {
        self.expect_ack(
            peer,
            PeerRequest::SetMembership { members },
            self.call_timeout,
        )
        .await
    }

    pub async fn broadcast_id(&self, peer: &PeerRef) -> Result<(), RpcError> {
        self.expect_ack(peer, PeerRequest::BroadcastId, self.election_timeout)
            .await
    }

    pub async fn receive_id(&self, peer: &PeerRef, id: &str) -> Result<(), RpcError> {
        let request = PeerRequest::ReceiveId { id: id.to_string() };
        self.expect_ack(peer, request, self.call_timeout).await
    }

    pub async fn run_election(
        &self,
        peer: &PeerRef,
        candidates: Vec<PeerRef>,
    ) -> Result<(), RpcError> {
        self.expect_ack(
            peer,
            PeerRequest::RunElection { candidates },
            self.election_timeout,
        )
        .await
    }

    pub async fn elect_servers(&self, peer: &PeerRef) -> Result<(), RpcError> {
        self.expect_ack(peer, PeerRequest::ElectServers, self.election_timeout)
            .await
    }

    pub async fn promote_backup_to_primary(&self, peer: &PeerRef) -> Result<(), RpcError> {
        self.expect_ack(peer, PeerRequest::PromoteBackupToPrimary, self.call_timeout)
            .await
    }

    pub async fn demote_to_backup(&self, peer: &PeerRef) -> Result<(), RpcError> {
        self.expect_ack(peer, PeerRequest::DemoteToBackup, self.call_timeout)
            .await
    }

    pub async fn demote_to_player(&self, peer: &PeerRef) -> Result<(), RpcError> {
        self.expect_ack(peer, PeerRequest::DemoteToPlayer, self.call_timeout)
            .await
    }

    pub async fn get_game_state(
        &self,
        peer: &PeerRef,
        requester: &str,
    ) -> Result<GameSnapshot, RpcError> {
        let request = PeerRequest::GetGameState {
            requester: requester.to_string(),
        };
        self.expect_snapshot(peer, request).await
    }

    pub async fn await_initialized(&self, peer: &PeerRef) -> Result<bool, RpcError> {
        match self
            .request(peer, PeerRequest::AwaitInitialized, self.election_timeout)
            .await?
        {
            PeerResponse::Initialized(ready) => Ok(ready),
            other => Err(unexpected(other)),
        }
    }

    pub async fn update_game_state(
        &self,
        peer: &PeerRef,
        snapshot: GameSnapshot,
    ) -> Result<(), RpcError> {
        self.expect_ack(
            peer,
            PeerRequest::UpdateGameState { snapshot },
            self.call_timeout,
        )
        .await
    }

    pub async fn apply_move(
        &self,
        peer: &PeerRef,
        requester: &str,
        target: Position,
    ) -> Result<GameSnapshot, RpcError> {
        let request = PeerRequest::ApplyMove {
            requester: requester.to_string(),
            x: target.x,
            y: target.y,
        };
        self.expect_snapshot(peer, request).await
    }

    pub async fn remove_player_state(&self, peer: &PeerRef, id: &str) -> Result<(), RpcError> {
        let request = PeerRequest::RemovePlayerState { id: id.to_string() };
        self.expect_ack(peer, request, self.call_timeout).await
    }

    pub async fn prune_membership(&self, peer: &PeerRef) -> Result<(), RpcError> {
        self.expect_ack(peer, PeerRequest::PruneMembership, self.election_timeout)
            .await
    }

    pub async fn leave(&self, peer: &PeerRef) -> Result<(), RpcError> {
        self.expect_ack(peer, PeerRequest::Leave, self.election_timeout)
            .await
    }
}

fn unexpected(response: PeerResponse) -> RpcError {
    RpcError::UnexpectedResponse(format!("{:?}", response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio_test::{assert_err, assert_ok};

    /// Serves `replies` to successive connections, one frame each
    async fn scripted_peer(replies: Vec<PeerResponse>) -> PeerRef {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for reply in replies {
                let (mut stream, _) = listener.accept().await.unwrap();
                let _: PeerRequest = read_frame(&mut stream).await.unwrap();
                write_frame(&mut stream, &reply).await.unwrap();
            }
        });
        PeerRef::new("zz", addr)
    }

    fn client() -> PeerClient {
        PeerClient::new(Duration::from_millis(500), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_ping_accepts_pong() {
        let peer = scripted_peer(vec![PeerResponse::Pong(PONG.to_string())]).await;
        assert_ok!(client().ping(&peer).await);
    }

    #[tokio::test]
    async fn test_ping_rejects_wrong_reply() {
        let peer = scripted_peer(vec![PeerResponse::Pong("nope".to_string())]).await;
        assert_err!(client().ping(&peer).await);
    }

    #[tokio::test]
    async fn test_remote_error_is_surfaced() {
        let peer = scripted_peer(vec![PeerResponse::Error("no candidates".to_string())]).await;
        let result = client().run_election(&peer, Vec::new()).await;
        assert!(matches!(result, Err(RpcError::Remote(message)) if message == "no candidates"));
    }

    #[tokio::test]
    async fn test_typed_replies() {
        let peer = scripted_peer(vec![
            PeerResponse::Identity("zz".to_string()),
            PeerResponse::Role(Role::Backup),
            PeerResponse::Initialized(true),
        ])
        .await;
        let client = client();

        assert_eq!(client.get_identity(&peer).await.unwrap(), "zz");
        assert_eq!(client.get_role(&peer).await.unwrap(), Role::Backup);
        assert!(client.await_initialized(&peer).await.unwrap());
    }

    #[tokio::test]
    async fn test_mismatched_reply_is_unexpected() {
        let peer = scripted_peer(vec![PeerResponse::Ack]).await;
        let result = client().get_game_state(&peer, "ab").await;
        assert!(matches!(result, Err(RpcError::UnexpectedResponse(_))));
    }

    #[tokio::test]
    async fn test_dead_peer_fails_fast() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        drop(listener);

        let peer = PeerRef::new("gone", addr);
        assert_err!(client().ping(&peer).await);
    }
}
