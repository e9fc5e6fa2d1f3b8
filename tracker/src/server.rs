//! Tracker network layer
//!
//! Serves one request per connection, like the peers do. Registrations are
//! handled one at a time: the registry lock is held until the election
//! started on the newcomer has finished, so elections never overlap.

use crate::error::TrackerError;
use crate::registry::Registry;
use log::{debug, error, info, warn};
use shared::rpc::{self, read_frame, write_frame};
use shared::{
    PeerRef, PeerRequest, PeerResponse, Registration, RpcError, TrackerRequest, TrackerResponse,
    DEFAULT_GRID_SIZE, DEFAULT_TREASURE_COUNT, PONG,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub bind_addr: String,
    pub grid_size: usize,
    pub treasure_count: usize,
    /// Bound on the liveness ping sent to an existing holder of an identity
    pub call_timeout: Duration,
    /// Bound on the election started on a newly registered peer
    pub election_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            grid_size: DEFAULT_GRID_SIZE,
            treasure_count: DEFAULT_TREASURE_COUNT,
            call_timeout: Duration::from_millis(1000),
            election_timeout: Duration::from_millis(10_000),
        }
    }
}

pub struct TrackerServer {
    listener: TcpListener,
    registry: Arc<Mutex<Registry>>,
    config: Arc<TrackerConfig>,
}

impl TrackerServer {
    pub async fn bind(config: TrackerConfig) -> Result<Self, TrackerError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!(
            "Tracker listening on {} (N={}, K={})",
            listener.local_addr()?,
            config.grid_size,
            config.treasure_count
        );

        Ok(Self {
            listener,
            registry: Arc::new(Mutex::new(Registry::new())),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TrackerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the task is dropped
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let registry = Arc::clone(&self.registry);
                    let config = Arc::clone(&self.config);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(registry, config, stream).await {
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
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

async fn serve_connection(
    registry: Arc<Mutex<Registry>>,
    config: Arc<TrackerConfig>,
    mut stream: TcpStream,
) -> Result<(), RpcError> {
    stream.set_nodelay(true)?;
    let request: TrackerRequest = read_frame(&mut stream).await?;
    let response = handle(&registry, &config, request).await;
    write_frame(&mut stream, &response).await
}

async fn handle(
    registry: &Mutex<Registry>,
    config: &TrackerConfig,
    request: TrackerRequest,
) -> TrackerResponse {
    match request {
        TrackerRequest::Register { peer } => {
            TrackerResponse::Registered(register(registry, config, peer).await)
        }
        TrackerRequest::Deregister { id } => {
            if registry.lock().await.remove(&id) {
                info!("Deregistered {}", id);
            }
            TrackerResponse::Ack
        }
        TrackerRequest::GetMembership => {
            TrackerResponse::Membership(registry.lock().await.members())
        }
        TrackerRequest::GetGridSize => TrackerResponse::GridSize(config.grid_size),
        TrackerRequest::GetTreasureCount => TrackerResponse::TreasureCount(config.treasure_count),
    }
}

/// Adds `peer` and starts an election on it
///
/// Rejected when a live node already holds the identity. A stale entry whose
/// owner no longer answers is replaced. If the election cannot be run, the
/// registration is rolled back.
async fn register(
    registry: &Mutex<Registry>,
    config: &TrackerConfig,
    peer: PeerRef,
) -> Registration {
    let mut registry = registry.lock().await;
    info!(
        "{} is trying to register ({} registered)",
        peer,
        registry.len()
    );

    if let Some(existing) = registry.find(&peer.id).cloned() {
        if is_alive(&existing, config.call_timeout).await {
            warn!("Identity {} is held by a live node, rejecting", peer.id);
            return Registration::DuplicateIdentity;
        }
        warn!("Replacing unreachable entry {}", existing);
    }

    registry.add(peer.clone());
    let request = PeerRequest::RunElection {
        candidates: registry.members(),
    };

    match rpc::call::<_, PeerResponse>(peer.addr, &request, config.election_timeout).await {
        Ok(PeerResponse::Ack) => {
            info!("{} registered and election finished", peer.id);
            Registration::Accepted
        }
        Ok(other) => {
            error!("Election on {} failed: {:?}", peer.id, other);
            registry.remove(&peer.id);
            Registration::ElectionFailed
        }
        Err(e) => {
            error!("Could not start election on {}: {}", peer.id, e);
            registry.remove(&peer.id);
            Registration::ElectionFailed
        }
    }
}

async fn is_alive(peer: &PeerRef, timeout: Duration) -> bool {
    matches!(
        rpc::call::<_, PeerResponse>(peer.addr, &PeerRequest::Ping, timeout).await,
        Ok(PeerResponse::Pong(reply)) if reply == PONG
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn config() -> TrackerConfig {
        TrackerConfig {
            grid_size: 5,
            treasure_count: 3,
            call_timeout: Duration::from_millis(300),
            election_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    /// A peer that answers pings and acknowledges elections
    async fn agreeable_peer(id: &str) -> PeerRef {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                let request: PeerRequest = read_frame(&mut stream).await.unwrap();
                let reply = match request {
                    PeerRequest::Ping => PeerResponse::Pong(PONG.to_string()),
                    _ => PeerResponse::Ack,
                };
                write_frame(&mut stream, &reply).await.unwrap();
            }
        });
        PeerRef::new(id, addr)
    }

    async fn dead_peer(id: &str) -> PeerRef {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        PeerRef::new(id, addr)
    }

    #[tokio::test]
    async fn test_parameters() {
        let registry = Mutex::new(Registry::new());
        let config = config();

        assert!(matches!(
            handle(&registry, &config, TrackerRequest::GetGridSize).await,
            TrackerResponse::GridSize(5)
        ));
        assert!(matches!(
            handle(&registry, &config, TrackerRequest::GetTreasureCount).await,
            TrackerResponse::TreasureCount(3)
        ));
    }

    #[tokio::test]
    async fn test_register_runs_election() {
        let registry = Mutex::new(Registry::new());
        let peer = agreeable_peer("ab").await;

        assert_eq!(
            register(&registry, &config(), peer.clone()).await,
            Registration::Accepted
        );
        assert_eq!(registry.lock().await.members(), vec![peer]);
    }

    #[tokio::test]
    async fn test_live_duplicate_is_rejected() {
        let registry = Mutex::new(Registry::new());
        let first = agreeable_peer("ab").await;
        let second = agreeable_peer("ab").await;

        assert_eq!(
            register(&registry, &config(), first.clone()).await,
            Registration::Accepted
        );
        assert_eq!(
            register(&registry, &config(), second).await,
            Registration::DuplicateIdentity
        );
        assert_eq!(registry.lock().await.members(), vec![first]);
    }

    #[tokio::test]
    async fn test_stale_duplicate_is_replaced() {
        let registry = Mutex::new(Registry::new());
        registry.lock().await.add(dead_peer("ab").await);
        let fresh = agreeable_peer("ab").await;

        assert_eq!(
            register(&registry, &config(), fresh.clone()).await,
            Registration::Accepted
        );
        assert_eq!(registry.lock().await.members(), vec![fresh]);
    }

    #[tokio::test]
    async fn test_failed_election_rolls_back() {
        let registry = Mutex::new(Registry::new());
        let peer = dead_peer("ab").await;

        assert_eq!(
            register(&registry, &config(), peer).await,
            Registration::ElectionFailed
        );
        assert!(registry.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_deregister() {
        let registry = Mutex::new(Registry::new());
        let config = config();
        let peer = agreeable_peer("ab").await;
        assert_eq!(
            register(&registry, &config, peer).await,
            Registration::Accepted
        );

        let request = TrackerRequest::Deregister {
            id: "ab".to_string(),
        };
        assert!(matches!(
            handle(&registry, &config, request).await,
            TrackerResponse::Ack
        ));
        assert!(registry.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_served_over_tcp() {
        let server = TrackerServer::bind(config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        server.spawn();

        let response: TrackerResponse = assert_ok!(
            rpc::call(addr, &TrackerRequest::GetMembership, Duration::from_secs(1)).await
        );
        assert!(matches!(response, TrackerResponse::Membership(members) if members.is_empty()));
    }
}
