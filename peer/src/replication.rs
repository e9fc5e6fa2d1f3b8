//! Moves, replication to the backup, pruning and graceful leave
//!
//! Only the primary applies moves. Each applied move (accepted or not) is
//! pushed to the backup before the caller gets its answer, and the push
//! happens under `move_lock` so the backup sees snapshots in version order.

use crate::error::NodeError;
use crate::input::Direction;
use crate::node::Node;
use log::{debug, info, warn};
use shared::{GameSnapshot, PeerRef, Position, Role};

impl Node {
    pub async fn get_game_state(&self, requester: &str) -> GameSnapshot {
        debug!("{} requested the game state", requester);
        self.state.read().await.game.snapshot()
    }

    /// Replaces the local view with a delivered snapshot
    pub async fn update_game_state(&self, snapshot: GameSnapshot) {
        let initialized = snapshot.initialized;
        let id = self.id();
        {
            let mut state = self.state.write().await;
            state.game.adopt(snapshot, &id);
        }
        if initialized {
            self.ready.send_replace(true);
        }
    }

    /// Adopts a snapshot pushed by the primary
    ///
    /// A node that is primary itself takes no pushes, and a snapshot older
    /// than the local one is dropped.
    pub async fn accept_replica(&self, snapshot: GameSnapshot) -> Result<(), NodeError> {
        let initialized = snapshot.initialized;
        let id = self.id();
        {
            let mut state = self.state.write().await;
            if state.role == Role::Primary {
                warn!(
                    "{} is primary, refusing pushed version {}",
                    id, snapshot.version
                );
                return Err(NodeError::ReplicaRefused(id));
            }
            if snapshot.version < state.game.version {
                warn!(
                    "{} dropping pushed version {} older than local {}",
                    id, snapshot.version, state.game.version
                );
                return Err(NodeError::StaleSnapshot {
                    received: snapshot.version,
                    local: state.game.version,
                });
            }
            state.game.adopt(snapshot, &id);
        }
        if initialized {
            self.ready.send_replace(true);
        }
        Ok(())
    }

    /// Applies one move and returns the resulting state
    ///
    /// A node that is not primary applies nothing and answers with its cached
    /// state, which the caller sees as a rejected move.
    pub async fn apply_move(&self, requester: &str, target: Position) -> GameSnapshot {
        let _serial = self.move_lock.lock().await;

        let (snapshot, backup) = {
            let mut state = self.state.write().await;
            if state.role != Role::Primary {
                warn!(
                    "{} asked non-primary {} to move to {}",
                    requester,
                    self.id(),
                    target
                );
                return state.game.snapshot();
            }

            let outcome = state.game.apply_move(requester, target);
            debug!("Move of {} to {}: {:?}", requester, target, outcome);
            (state.game.snapshot(), state.backup.clone())
        };

        self.push_to_backup(backup.as_ref(), &snapshot).await;
        snapshot
    }

    async fn push_to_backup(&self, backup: Option<&PeerRef>, snapshot: &GameSnapshot) {
        let Some(backup) = backup.filter(|backup| backup.id != self.id()) else {
            return;
        };
        if let Err(e) = self
            .client
            .update_game_state(backup, snapshot.clone())
            .await
        {
            warn!("Failed to replicate version {} to {}: {}", snapshot.version, backup, e);
        }
    }

    pub async fn remove_player_state(&self, id: &str) {
        let mut state = self.state.write().await;
        if state.game.remove_player(id) {
            state.game.version += 1;
            info!("Removed state of {}", id);
        }
    }

    /// Pings every other member and drops the ones that do not answer
    ///
    /// Returns the identities that were removed. On the primary the pruned
    /// state is pushed to the backup.
    pub async fn prune_membership(&self) -> Vec<String> {
        let me = self.id();
        let members = self.membership().await;

        let mut dead = Vec::new();
        for peer in members.iter().filter(|peer| peer.id != me) {
            if !self.probe(peer).await {
                dead.push(peer.id.clone());
            }
        }
        if dead.is_empty() {
            return dead;
        }

        let _serial = self.move_lock.lock().await;
        let (snapshot, backup, role) = {
            let mut state = self.state.write().await;
            for id in &dead {
                state.game.membership.remove(id);
            }
            state.game.retain_members();
            state.game.version += 1;
            (state.game.snapshot(), state.backup.clone(), state.role)
        };
        info!("{} pruned unreachable members {:?}", me, dead);

        if role == Role::Primary {
            let backup = backup.filter(|backup| !dead.contains(&backup.id));
            self.push_to_backup(backup.as_ref(), &snapshot).await;
        }
        dead
    }

    /// Sends a move of this node to the primary, or applies it if this node is primary
    pub async fn submit_move(&self, target: Position) -> Result<GameSnapshot, NodeError> {
        let id = self.id();
        let (role, primary) = {
            let state = self.state.read().await;
            (state.role, state.primary.clone())
        };

        if role == Role::Primary {
            return Ok(self.apply_move(&id, target).await);
        }

        let primary = primary.ok_or(NodeError::NoPrimary)?;
        let snapshot = self.client.apply_move(&primary, &id, target).await?;
        self.update_game_state(snapshot.clone()).await;
        Ok(snapshot)
    }

    /// Moves one cell in `direction`
    ///
    /// Returns `None` without contacting anyone when the step would leave the
    /// grid or when this node has no position yet.
    pub async fn step(&self, direction: Direction) -> Result<Option<GameSnapshot>, NodeError> {
        let Some(from) = self.position().await else {
            warn!("{} has no position yet", self.id());
            return Ok(None);
        };
        let Some(target) = direction.step(from, self.grid_size()) else {
            debug!("Step {:?} from {} leaves the grid", direction, from);
            return Ok(None);
        };
        self.submit_move(target).await.map(Some)
    }

    /// Refreshes the cached state from the primary
    pub async fn resync(&self) -> Result<GameSnapshot, NodeError> {
        let id = self.id();
        let (role, primary) = {
            let state = self.state.read().await;
            (state.role, state.primary.clone())
        };

        if role == Role::Primary {
            return Ok(self.snapshot().await);
        }

        let primary = primary.ok_or(NodeError::NoPrimary)?;
        let snapshot = self.client.get_game_state(&primary, &id).await?;
        self.update_game_state(snapshot.clone()).await;
        Ok(snapshot)
    }

    /// Leaves the game gracefully
    ///
    /// The node drops its own state and stops acting as a server before
    /// anyone else hears of the departure. A departing primary then has its
    /// state removed on the backup and tells every member to treat the backup
    /// as primary. Everything up to here runs under `move_lock`. Then the
    /// remaining members elect new servers. The caller shuts the node down
    /// afterwards.
    pub async fn leave(&self) -> Result<(), NodeError> {
        let me = self.id();
        let serial = self.move_lock.lock().await;

        let (role, backup, remaining) = {
            let mut state = self.state.write().await;
            let role = state.role;
            state.role = Role::Player;
            state.game.membership.remove(&me);
            state.game.remove_player(&me);
            (
                role,
                state.backup.clone(),
                state.game.membership.to_vec(),
            )
        };
        info!("{} leaving the game as {}", me, role);

        if role == Role::Primary {
            if let Some(backup) = backup.as_ref().filter(|backup| backup.id != me) {
                if let Err(e) = self.client.remove_player_state(backup, &me).await {
                    warn!("Backup {} did not drop our state: {}", backup, e);
                }
            }
            for peer in &remaining {
                if let Err(e) = self.client.promote_backup_to_primary(peer).await {
                    warn!("{} did not promote the backup: {}", peer, e);
                }
            }
        }
        drop(serial);

        if remaining.is_empty() {
            info!("No players left after {} leaves", me);
            return Ok(());
        }
        self.initiate_election(remaining).await
    }
}
