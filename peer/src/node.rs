//! A game node: identity, role, cached state and the tasks that serve it
//!
//! Every node is reachable by every other node at any time. Inbound calls run
//! on their own tasks, the failure detector runs on its own timer, and all of
//! them meet at one per-node lock around [`NodeState`]. No code path holds that
//! lock across an outbound call, so two nodes calling each other can never
//! wait on one another.

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::membership::Membership;
use crate::network::{spawn_listener, PeerClient};
use crate::rendezvous::TrackerClient;
use crate::state::{clock_time, GameState};
use log::{info, warn};
use shared::{GameSnapshot, PeerRef, Position, Role};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Attempts at claiming a starting cell before giving up on joining
const MAX_SPAWN_ATTEMPTS: usize = 8;

/// Everything a node mutates, guarded by one lock
#[derive(Debug)]
pub struct NodeState {
    pub role: Role,
    pub primary: Option<PeerRef>,
    pub backup: Option<PeerRef>,
    /// Identities collected during the current election round
    pub received_ids: Vec<String>,
    pub game: GameState,
}

pub struct Node {
    pub(crate) config: NodeConfig,
    identity: std::sync::RwLock<PeerRef>,
    pub(crate) state: RwLock<NodeState>,
    /// Serializes move application together with the backup push that follows it
    pub(crate) move_lock: Mutex<()>,
    /// Flips to true once this node holds an initialized game
    pub(crate) ready: watch::Sender<bool>,
    pub(crate) client: PeerClient,
    tracker: TrackerClient,
    grid_size: usize,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    fn new(
        config: NodeConfig,
        me: PeerRef,
        tracker: TrackerClient,
        grid_size: usize,
        treasure_count: usize,
        known: Vec<PeerRef>,
    ) -> Self {
        let mut game = GameState::new(grid_size, treasure_count);
        game.membership = Membership::new(known);
        let (ready, _) = watch::channel(false);
        let client = PeerClient::new(config.call_timeout, config.election_timeout);

        Self {
            config,
            identity: std::sync::RwLock::new(me),
            state: RwLock::new(NodeState {
                role: Role::Player,
                primary: None,
                backup: None,
                received_ids: Vec::new(),
                game,
            }),
            move_lock: Mutex::new(()),
            ready,
            client,
            tracker,
            grid_size,
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Joins the game through the tracker
    ///
    /// Binds the peer listener, fetches N, K and the current membership,
    /// registers (which makes the tracker start an election on this node),
    /// obtains an initialized game, claims a starting cell and finally starts
    /// the failure detector.
    pub async fn join(config: NodeConfig) -> Result<Arc<Node>, NodeError> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        let me = PeerRef::new(config.id.clone(), listener.local_addr()?);
        info!("Player {} listening on {}", me.id, me.addr);

        let tracker = TrackerClient::new(config.tracker_addr, config.election_timeout);
        let grid_size = tracker.grid_size().await?;
        let treasure_count = tracker.treasure_count().await?;
        let known = tracker.membership().await?;
        info!(
            "Tracker reports N={}, K={}, {} registered players",
            grid_size,
            treasure_count,
            known.len()
        );

        let node = Arc::new(Node::new(
            config,
            me.clone(),
            tracker,
            grid_size,
            treasure_count,
            known,
        ));
        node.track(spawn_listener(Arc::clone(&node), listener));

        if let Err(e) = node.tracker.register(&me).await {
            node.shutdown();
            return Err(e);
        }

        if let Err(e) = node.bootstrap().await {
            node.shutdown();
            return Err(e);
        }

        node.spawn_failure_detector();
        Ok(node)
    }

    async fn bootstrap(&self) -> Result<(), NodeError> {
        let id = self.id();
        let (role, primary) = {
            let state = self.state.read().await;
            (state.role, state.primary.clone())
        };

        if role == Role::Primary {
            {
                let mut state = self.state.write().await;
                if !state.game.initialized {
                    state.game.initialize(clock_time());
                }
            }
            self.ready.send_replace(true);
        } else {
            let primary = primary.ok_or(NodeError::NoPrimary)?;
            info!("{} waiting for primary {} to initialize", id, primary.id);
            if !self.client.await_initialized(&primary).await? {
                return Err(NodeError::NotInitialized);
            }
            let snapshot = self.client.get_game_state(&primary, &id).await?;
            self.update_game_state(snapshot).await;
        }

        self.claim_starting_cell().await.map(|_| ())
    }

    /// Picks a random empty cell and registers it with the primary as a move
    async fn claim_starting_cell(&self) -> Result<Position, NodeError> {
        let id = self.id();

        for attempt in 1..=MAX_SPAWN_ATTEMPTS {
            let cell = {
                let mut state = self.state.write().await;
                let cell = state.game.random_empty_cell().ok_or(NodeError::GridFull)?;
                state.game.positions.insert(id.clone(), cell);
                cell
            };

            let snapshot = self.submit_move(cell).await?;
            if snapshot.positions.get(&id) == Some(&cell) {
                info!("Player {} is initialized at position {}", id, cell);
                return Ok(cell);
            }
            warn!(
                "Starting cell {} was taken, retrying ({}/{})",
                cell, attempt, MAX_SPAWN_ATTEMPTS
            );
        }

        Err(NodeError::SpawnFailed(MAX_SPAWN_ATTEMPTS))
    }

    /// Waits until this node holds an initialized game, up to `limit`
    pub async fn wait_initialized(&self, limit: Duration) -> bool {
        let mut ready = self.ready.subscribe();
        let initialized = matches!(
            tokio::time::timeout(limit, ready.wait_for(|initialized| *initialized)).await,
            Ok(Ok(_))
        );
        initialized
    }

    pub(crate) fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Stops the listener and the failure detector
    ///
    /// From the outside this looks exactly like a crash: connections are
    /// refused from now on.
    pub fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            handle.abort();
        }
        info!("Player {} shut down", self.id());
    }

    /// Removes this node from the tracker's list, logging failures
    pub async fn deregister(&self) {
        let id = self.id();
        if let Err(e) = self.tracker.deregister(&id).await {
            warn!("Failed to deregister {} from tracker: {}", id, e);
        }
    }

    pub fn me(&self) -> PeerRef {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn id(&self) -> String {
        self.me().id
    }

    pub fn addr(&self) -> std::net::SocketAddr {
        self.me().addr
    }

    /// Renames this node, carrying its own position and score over
    pub async fn set_identity(&self, id: String) {
        let old = {
            let mut identity = self
                .identity
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut identity.id, id.clone())
        };
        if old == id {
            return;
        }

        let mut state = self.state.write().await;
        if let Some(position) = state.game.positions.remove(&old) {
            state.game.positions.insert(id.clone(), position);
        }
        if let Some(score) = state.game.scores.remove(&old) {
            state.game.scores.insert(id.clone(), score);
        }
        info!("Player {} is now known as {}", old, id);
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    pub async fn role(&self) -> Role {
        self.state.read().await.role
    }

    pub async fn primary(&self) -> Option<PeerRef> {
        self.state.read().await.primary.clone()
    }

    pub async fn backup(&self) -> Option<PeerRef> {
        self.state.read().await.backup.clone()
    }

    pub async fn membership(&self) -> Vec<PeerRef> {
        self.state.read().await.game.membership.to_vec()
    }

    pub async fn snapshot(&self) -> GameSnapshot {
        self.state.read().await.game.snapshot()
    }

    pub async fn position(&self) -> Option<Position> {
        let id = self.id();
        self.state.read().await.game.positions.get(&id).copied()
    }
}
