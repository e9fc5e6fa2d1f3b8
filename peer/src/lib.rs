//! # Treasure Hunt Peer Library
//!
//! Every player runs one node. Nodes find each other through the tracker and
//! then talk directly: there is no central game server. Two of the nodes take
//! on server duties for the group.
//!
//! ## Roles
//!
//! ### Primary
//! Holds the authoritative game state and is the only node that applies
//! moves. Every applied move is copied to the backup before the mover gets
//! its answer.
//!
//! ### Backup
//! Holds a replica of the primary's state, current as of the last applied
//! move. Takes over when the primary disappears.
//!
//! ### Player
//! Keeps a cached copy of the state that is refreshed on every own move and
//! on demand.
//!
//! ## Lifecycle
//!
//! A joining node registers with the tracker, which starts an election on the
//! newcomer. The highest identity becomes primary and the next one backup.
//! The node then waits for an initialized game, picks a random empty cell and
//! starts its failure detector.
//!
//! Servers probe each other on a timer, and the primary also probes plain
//! players. A silent player is pruned from the membership. A silent server
//! triggers a new election among the remaining members. A node that leaves
//! gracefully hands its role over before shutting down.
//!
//! ## Module Organization
//!
//! - `node`: the node itself, bootstrap and shutdown
//! - `election`: the three-phase election and role changes
//! - `replication`: moves, backup pushes, pruning and leave
//! - `detector`: heartbeat sweep and server watchdog
//! - `network`: inbound listener and typed outbound calls
//! - `rendezvous`: the tracker client
//! - `state`: game rules on the local state
//! - `membership`: the ordered member list
//! - `input`, `view`: the terminal front end
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use peer::{Direction, Node, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tracker = "127.0.0.1:6789".parse()?;
//!     let node = Node::join(NodeConfig::new("ab", tracker)).await?;
//!
//!     node.step(Direction::East).await?;
//!
//!     node.leave().await?;
//!     node.shutdown();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod detector;
pub mod election;
pub mod error;
pub mod input;
pub mod membership;
pub mod network;
pub mod node;
pub mod rendezvous;
pub mod replication;
pub mod state;
pub mod view;

pub use config::NodeConfig;
pub use detector::Alarm;
pub use election::Ballot;
pub use error::NodeError;
pub use input::{Command, Direction};
pub use node::Node;
