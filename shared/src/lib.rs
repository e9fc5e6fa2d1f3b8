use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

pub mod rpc;

pub use rpc::RpcError;

pub const DEFAULT_GRID_SIZE: usize = 15;
pub const DEFAULT_TREASURE_COUNT: usize = 10;
pub const PONG: &str = "pong";

/// A value reference to a node: its identity and the address of its listener.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct PeerRef {
    pub id: String,
    pub addr: SocketAddr,
}

impl PeerRef {
    pub fn new(id: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            id: id.into(),
            addr,
        }
    }
}

impl fmt::Display for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Primary,
    Backup,
    Player,
}

impl Role {
    pub fn is_server(self) -> bool {
        matches!(self, Role::Primary | Role::Backup)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Primary => "PRIMARY",
            Role::Backup => "BACKUP",
            Role::Player => "PLAYER",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: usize,
    pub y: usize,
}

impl Position {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    pub fn in_bounds(&self, grid_size: usize) -> bool {
        self.x < grid_size && self.y < grid_size
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Full copy of the shared game state as produced by the primary.
///
/// Snapshots travel by value: once delivered, the recipient's copy is
/// independent of the sender's until the next delivery.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct GameSnapshot {
    pub initialized: bool,
    pub version: u64,
    pub membership: Vec<PeerRef>,
    pub positions: HashMap<String, Position>,
    pub treasures: Vec<Position>,
    pub scores: HashMap<String, u32>,
    pub start_time: String,
}

impl GameSnapshot {
    pub fn member_ids(&self) -> Vec<String> {
        self.membership.iter().map(|peer| peer.id.clone()).collect()
    }

    pub fn occupant(&self, cell: Position) -> Option<&str> {
        self.positions
            .iter()
            .find(|(_, pos)| **pos == cell)
            .map(|(id, _)| id.as_str())
    }

    pub fn total_score(&self) -> u32 {
        self.scores.values().sum()
    }
}

/// Total order over node identities: case-insensitive first, bytewise to break ties.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Calls a node accepts from its peers and from the tracker.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum PeerRequest {
    GetIdentity,
    SetIdentity {
        id: String,
    },
    GetRole,
    Ping,
    ClearReceivedIds,
    SetMembership {
        members: Vec<PeerRef>,
    },
    BroadcastId,
    ReceiveId {
        id: String,
    },
    RunElection {
        candidates: Vec<PeerRef>,
    },
    ElectServers,
    PromoteBackupToPrimary,
    DemoteToBackup,
    DemoteToPlayer,
    GetGameState {
        requester: String,
    },
    AwaitInitialized,
    UpdateGameState {
        snapshot: GameSnapshot,
    },
    ApplyMove {
        requester: String,
        x: usize,
        y: usize,
    },
    RemovePlayerState {
        id: String,
    },
    PruneMembership,
    Leave,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum PeerResponse {
    Identity(String),
    Role(Role),
    Pong(String),
    Ack,
    Snapshot(GameSnapshot),
    Initialized(bool),
    Error(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum TrackerRequest {
    Register { peer: PeerRef },
    Deregister { id: String },
    GetMembership,
    GetGridSize,
    GetTreasureCount,
}

/// Outcome of a registration at the tracker
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Accepted,
    /// A live node already holds the identity
    DuplicateIdentity,
    /// The election started on the newcomer did not finish; nothing was kept
    ElectionFailed,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum TrackerResponse {
    Registered(Registration),
    Ack,
    Membership(Vec<PeerRef>),
    GridSize(usize),
    TreasureCount(usize),
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_compare_ids_ignores_case() {
        assert_eq!(compare_ids("alpha", "Beta"), Ordering::Less);
        assert_eq!(compare_ids("Zed", "apple"), Ordering::Greater);
        assert_eq!(compare_ids("ab", "ab"), Ordering::Equal);
    }

    #[test]
    fn test_compare_ids_breaks_case_ties() {
        assert_ne!(compare_ids("Ab", "aB"), Ordering::Equal);
        assert_eq!(compare_ids("Ab", "aB"), compare_ids("Ab", "aB"));
        assert_eq!(compare_ids("aB", "Ab"), compare_ids("Ab", "aB").reverse());
    }

    #[test]
    fn test_sorting_ids() {
        let mut ids = vec!["player3", "Player1", "PLAYER2", "ab"];
        ids.sort_by(|a, b| compare_ids(a, b));
        assert_eq!(ids, vec!["ab", "Player1", "PLAYER2", "player3"]);
    }

    #[test]
    fn test_position_bounds() {
        assert!(Position::new(0, 0).in_bounds(15));
        assert!(Position::new(14, 14).in_bounds(15));
        assert!(!Position::new(15, 3).in_bounds(15));
        assert!(!Position::new(3, 15).in_bounds(15));
    }

    #[test]
    fn test_role_is_server() {
        assert!(Role::Primary.is_server());
        assert!(Role::Backup.is_server());
        assert!(!Role::Player.is_server());
        assert_eq!(Role::Backup.to_string(), "BACKUP");
    }

    #[test]
    fn test_snapshot_queries() {
        let mut snapshot = GameSnapshot {
            membership: vec![PeerRef::new("ab", addr(9001)), PeerRef::new("cd", addr(9002))],
            ..Default::default()
        };
        snapshot.positions.insert("ab".to_string(), Position::new(1, 2));
        snapshot.positions.insert("cd".to_string(), Position::new(3, 4));
        snapshot.scores.insert("ab".to_string(), 2);
        snapshot.scores.insert("cd".to_string(), 5);

        assert_eq!(snapshot.member_ids(), vec!["ab", "cd"]);
        assert_eq!(snapshot.occupant(Position::new(3, 4)), Some("cd"));
        assert_eq!(snapshot.occupant(Position::new(0, 0)), None);
        assert_eq!(snapshot.total_score(), 7);
    }

    #[test]
    fn test_packet_serialization_apply_move() {
        let request = PeerRequest::ApplyMove {
            requester: "ab".to_string(),
            x: 3,
            y: 7,
        };
        let serialized = bincode::serialize(&request).unwrap();
        let deserialized: PeerRequest = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            PeerRequest::ApplyMove { requester, x, y } => {
                assert_eq!(requester, "ab");
                assert_eq!(x, 3);
                assert_eq!(y, 7);
            }
            _ => panic!("Wrong request type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_snapshot() {
        let mut snapshot = GameSnapshot {
            initialized: true,
            version: 42,
            membership: vec![PeerRef::new("ab", addr(9001))],
            start_time: "12:00:00".to_string(),
            ..Default::default()
        };
        snapshot.positions.insert("ab".to_string(), Position::new(0, 1));
        snapshot.treasures.push(Position::new(5, 5));
        snapshot.scores.insert("ab".to_string(), 3);

        let response = PeerResponse::Snapshot(snapshot.clone());
        let serialized = bincode::serialize(&response).unwrap();
        let deserialized: PeerResponse = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            PeerResponse::Snapshot(received) => assert_eq!(received, snapshot),
            _ => panic!("Wrong response type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_register() {
        let request = TrackerRequest::Register {
            peer: PeerRef::new("zz", addr(7000)),
        };
        let serialized = bincode::serialize(&request).unwrap();
        let deserialized: TrackerRequest = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            TrackerRequest::Register { peer } => {
                assert_eq!(peer.id, "zz");
                assert_eq!(peer.addr, addr(7000));
            }
            _ => panic!("Wrong request type after deserialization"),
        }
    }
}
