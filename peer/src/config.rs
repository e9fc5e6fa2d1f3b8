use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 500;
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_ELECTION_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_PROBE_RETRIES: u32 = 0;

/// Tunables for one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: String,
    pub tracker_addr: SocketAddr,
    pub listen_addr: String,
    /// Period of the heartbeat sweep and the watchdog.
    pub probe_interval: Duration,
    /// Bound on every short peer call, probes included.
    pub call_timeout: Duration,
    /// Extra attempts before a silent peer is declared dead.
    pub probe_retries: u32,
    /// Bound on calls that run a whole election or wait for bootstrap.
    pub election_timeout: Duration,
}

impl NodeConfig {
    pub fn new(id: &str, tracker_addr: SocketAddr) -> Self {
        Self {
            id: id.to_string(),
            tracker_addr,
            listen_addr: "127.0.0.1:0".to_string(),
            probe_interval: Duration::from_millis(DEFAULT_PROBE_INTERVAL_MS),
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            probe_retries: DEFAULT_PROBE_RETRIES,
            election_timeout: Duration::from_millis(DEFAULT_ELECTION_TIMEOUT_MS),
        }
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_probe_retries(mut self, retries: u32) -> Self {
        self.probe_retries = retries;
        self
    }

    pub fn with_election_timeout(mut self, timeout: Duration) -> Self {
        self.election_timeout = timeout;
        self
    }

    pub fn with_listen_addr(mut self, addr: &str) -> Self {
        self.listen_addr = addr.to_string();
        self
    }
}
