use shared::RpcError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Identity {0} is already registered")]
    DuplicateIdentity(String),

    #[error("Election has no reachable candidates")]
    NoCandidates,

    #[error("No primary is known")]
    NoPrimary,

    #[error("Game was not initialized in time")]
    NotInitialized,

    #[error("No empty cell left on the grid")]
    GridFull,

    #[error("Could not claim a starting cell after {0} attempts")]
    SpawnFailed(usize),

    #[error("Tracker could not run the election for {0}")]
    RegistrationFailed(String),

    #[error("{0} is primary and takes no pushed state")]
    ReplicaRefused(String),

    #[error("Pushed version {received} is older than local version {local}")]
    StaleSnapshot { received: u64, local: u64 },

    #[error("Tracker error: {0}")]
    Tracker(String),
}
