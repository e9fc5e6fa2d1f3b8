//! # Treasure Hunt Tracker
//!
//! The rendezvous point of the game. Peers ask it for the grid size N, the
//! treasure count K and the list of registered peers, and register
//! themselves with it. The tracker takes no part in the game itself.
//!
//! On every accepted registration the tracker asks the newcomer to run an
//! election over the full peer list, and answers the registration only once
//! that election is over.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use tracker::{TrackerConfig, TrackerServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TrackerConfig {
//!         bind_addr: "127.0.0.1:6789".to_string(),
//!         ..Default::default()
//!     };
//!     TrackerServer::bind(config).await?.run().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod registry;
pub mod server;

pub use error::TrackerError;
pub use registry::Registry;
pub use server::{TrackerConfig, TrackerServer};
