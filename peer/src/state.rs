//! Game state model and the move rules the primary enforces
//!
//! The primary owns the authoritative copy of this state; every other node
//! holds a cache that is overwritten by snapshot delivery. All rule checks
//! (occupancy, bounds, treasure collection and replenishment) live here so the
//! replication layer only has to serialize calls and ship snapshots.

use crate::membership::Membership;
use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use shared::{GameSnapshot, Position};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Result of applying one move on the primary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The requester now stands on the target cell
    Moved,
    /// The requester moved onto a treasure and scored
    Collected { score: u32 },
    /// Another live player already holds the target cell
    Occupied,
    /// The target lies outside the grid
    OutOfBounds,
}

impl MoveOutcome {
    pub fn accepted(self) -> bool {
        matches!(self, MoveOutcome::Moved | MoveOutcome::Collected { .. })
    }
}

#[derive(Debug, Clone)]
pub struct GameState {
    pub grid_size: usize,
    pub treasure_count: usize,
    pub initialized: bool,
    pub version: u64,
    pub membership: Membership,
    pub positions: HashMap<String, Position>,
    pub treasures: Vec<Position>,
    pub scores: HashMap<String, u32>,
    pub start_time: String,
}

impl GameState {
    pub fn new(grid_size: usize, treasure_count: usize) -> Self {
        Self {
            grid_size,
            treasure_count,
            initialized: false,
            version: 0,
            membership: Membership::default(),
            positions: HashMap::new(),
            treasures: Vec::new(),
            scores: HashMap::new(),
            start_time: String::new(),
        }
    }

    /// Starts a fresh game: records the start time and scatters K treasures
    pub fn initialize(&mut self, start_time: String) {
        self.start_time = start_time;
        self.treasures.clear();
        self.replenish_treasures();
        self.initialized = true;
        self.version += 1;
        info!(
            "Game initialized at {} with {} treasures on a {}x{} grid",
            self.start_time,
            self.treasures.len(),
            self.grid_size,
            self.grid_size
        );
    }

    pub fn is_empty_cell(&self, cell: Position) -> bool {
        !self.positions.values().any(|pos| *pos == cell) && !self.treasures.contains(&cell)
    }

    /// Cells that hold neither a player nor a treasure, in row-major order
    pub fn empty_cells(&self) -> Vec<Position> {
        let taken: HashSet<Position> = self
            .positions
            .values()
            .copied()
            .chain(self.treasures.iter().copied())
            .collect();

        (0..self.grid_size)
            .flat_map(|x| (0..self.grid_size).map(move |y| Position::new(x, y)))
            .filter(|cell| !taken.contains(cell))
            .collect()
    }

    pub fn random_empty_cell(&self) -> Option<Position> {
        self.empty_cells().choose(&mut rand::thread_rng()).copied()
    }

    pub fn occupant(&self, cell: Position) -> Option<&str> {
        self.positions
            .iter()
            .find(|(_, pos)| **pos == cell)
            .map(|(id, _)| id.as_str())
    }

    /// Applies a move requested by `requester`
    ///
    /// Callers must serialize invocations: the occupancy check and the write
    /// that follows it are only meaningful as one step. Every call, accepted
    /// or not, bumps the version because it produces a fresh snapshot.
    pub fn apply_move(&mut self, requester: &str, target: Position) -> MoveOutcome {
        self.version += 1;

        if !target.in_bounds(self.grid_size) {
            debug!("{} tried to leave the grid at {}", requester, target);
            return MoveOutcome::OutOfBounds;
        }

        if let Some(other) = self.occupant(target) {
            if other != requester {
                info!(
                    "{} cannot move to {}: occupied by {}",
                    requester, target, other
                );
                return MoveOutcome::Occupied;
            }
        }

        self.positions.insert(requester.to_string(), target);
        let score = self.scores.entry(requester.to_string()).or_insert(0);

        let mut outcome = MoveOutcome::Moved;
        if let Some(index) = self.treasures.iter().position(|t| *t == target) {
            self.treasures.remove(index);
            *score += 1;
            outcome = MoveOutcome::Collected { score: *score };
            info!(
                "{} collected a treasure at {}, score now {}",
                requester, target, score
            );
        } else {
            debug!("{} moved to {}", requester, target);
        }

        if !self.treasure_invariant_holds() {
            error!(
                "Treasure count {} is outside {{{}, {}}}",
                self.treasures.len(),
                self.treasure_count,
                self.treasure_count.saturating_sub(1)
            );
        }
        if self.treasures.len() < self.treasure_count {
            self.replenish_treasures();
        }

        outcome
    }

    pub fn treasure_invariant_holds(&self) -> bool {
        let count = self.treasures.len();
        count == self.treasure_count || count + 1 == self.treasure_count
    }

    /// Tops the treasure set back up to K from shuffled empty cells
    fn replenish_treasures(&mut self) {
        let missing = self.treasure_count.saturating_sub(self.treasures.len());
        if missing == 0 {
            return;
        }

        let mut empty = self.empty_cells();
        empty.shuffle(&mut rand::thread_rng());
        if empty.len() < missing {
            warn!(
                "Only {} empty cells left for {} missing treasures",
                empty.len(),
                missing
            );
        }
        self.treasures.extend(empty.into_iter().take(missing));
    }

    /// Replaces the member list and drops state of anyone no longer in it
    pub fn set_membership(&mut self, membership: Membership) {
        self.membership = membership;
        self.retain_members();
    }

    pub fn retain_members(&mut self) {
        let membership = &self.membership;
        self.positions.retain(|id, _| membership.contains(id));
        self.scores.retain(|id, _| membership.contains(id));
    }

    /// Removes a player's position and score. Returns true if anything was removed.
    pub fn remove_player(&mut self, id: &str) -> bool {
        let had_position = self.positions.remove(id).is_some();
        let had_score = self.scores.remove(id).is_some();
        had_position || had_score
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            initialized: self.initialized,
            version: self.version,
            membership: self.membership.to_vec(),
            positions: self.positions.clone(),
            treasures: self.treasures.clone(),
            scores: self.scores.clone(),
            start_time: self.start_time.clone(),
        }
    }

    /// Overwrites the local view with a delivered snapshot
    ///
    /// If `own_id` has a position locally that the snapshot does not carry yet,
    /// it is kept: the snapshot may have been taken before the node's starting
    /// move reached the primary.
    pub fn adopt(&mut self, snapshot: GameSnapshot, own_id: &str) {
        if snapshot.version < self.version {
            debug!(
                "Adopting snapshot version {} over local version {}",
                snapshot.version, self.version
            );
        }

        let own_position = self.positions.get(own_id).copied();

        self.initialized = snapshot.initialized;
        self.version = snapshot.version;
        self.membership = Membership::new(snapshot.membership);
        self.positions = snapshot.positions;
        self.treasures = snapshot.treasures;
        self.scores = snapshot.scores;
        self.start_time = snapshot.start_time;

        if let Some(position) = own_position {
            if !self.positions.contains_key(own_id) {
                debug!("Keeping own position {} missing from snapshot", position);
                self.positions.insert(own_id.to_string(), position);
            }
        }
    }
}

/// Wall-clock time of day (UTC) formatted as `HH:MM:SS`
pub fn clock_time() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs();
    format_clock(secs)
}

fn format_clock(secs_since_epoch: u64) -> String {
    let secs_of_day = secs_since_epoch % 86_400;
    format!(
        "{:02}:{:02}:{:02}",
        secs_of_day / 3600,
        (secs_of_day % 3600) / 60,
        secs_of_day % 60
    )
}
