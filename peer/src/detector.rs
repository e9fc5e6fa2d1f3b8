//! Failure detection
//!
//! Runs on a timer on every node but only does work on servers. The primary
//! sweeps plain players and prunes the ones that stop answering. The primary
//! and the backup watch each other, and a silent partner triggers a new
//! election over the local membership.

use crate::node::Node;
use log::{debug, error, info, warn};
use shared::{PeerRef, Role};
use std::fmt;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

impl Node {
    /// Starts the periodic sweep and watchdog for this node
    pub fn spawn_failure_detector(self: &Arc<Self>) {
        let node = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(node.config.probe_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick fires immediately.
            interval.tick().await;

            loop {
                interval.tick().await;

                if let Some(dead) = node.heartbeat_sweep().await {
                    info!("Player {} stopped answering, pruning", dead);
                    node.prune_membership().await;
                }

                if let Some(alarm) = node.watchdog().await {
                    warn!("{}, starting election", alarm);
                    let members = node.membership().await;
                    if let Err(e) = node.initiate_election(members).await {
                        error!("Election after alarm on {} failed: {}", alarm.partner(), e);
                    }
                }
            }
        });
        self.track(handle);
    }

    /// Pings `peer`, retrying up to the configured number of times
    pub async fn probe(&self, peer: &PeerRef) -> bool {
        for attempt in 0..=self.config.probe_retries {
            match self.client.ping(peer).await {
                Ok(()) => return true,
                Err(e) => debug!("Probe {} of {} failed: {}", attempt + 1, peer, e),
            }
        }
        false
    }

    /// On the primary, returns the first plain member that does not answer
    ///
    /// The backup is left to the watchdog.
    pub async fn heartbeat_sweep(&self) -> Option<PeerRef> {
        let me = self.id();
        let (role, backup, members) = {
            let state = self.state.read().await;
            (
                state.role,
                state.backup.clone(),
                state.game.membership.to_vec(),
            )
        };
        if role != Role::Primary {
            return None;
        }

        let backup_id = backup.map(|backup| backup.id);
        for peer in members {
            if peer.id == me || Some(&peer.id) == backup_id.as_ref() {
                continue;
            }
            if !self.probe(&peer).await {
                return Some(peer);
            }
        }
        None
    }

    /// Checks the server partner and raises an alarm when a new election is due
    ///
    /// The primary watches the backup and the backup watches the primary.
    /// Plain players watch nobody. A primary whose backup answers as primary
    /// itself has been voted out behind its back.
    pub async fn watchdog(&self) -> Option<Alarm> {
        let me = self.id();
        let (role, partner) = {
            let state = self.state.read().await;
            let partner = match state.role {
                Role::Primary => state.backup.clone(),
                Role::Backup => state.primary.clone(),
                Role::Player => None,
            };
            (state.role, partner)
        };

        let partner = partner.filter(|partner| partner.id != me)?;
        if !self.probe(&partner).await {
            return Some(Alarm::Silent(partner));
        }

        if role == Role::Primary {
            match self.client.get_role(&partner).await {
                Ok(Role::Primary) => return Some(Alarm::RivalPrimary(partner)),
                Ok(_) => {}
                Err(e) => debug!("Could not read role of {}: {}", partner, e),
            }
        }
        None
    }
}

/// Reason for the watchdog to start an election
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alarm {
    /// The partner stopped answering
    Silent(PeerRef),
    /// The backup answers, but as primary
    RivalPrimary(PeerRef),
}

impl Alarm {
    pub fn partner(&self) -> &PeerRef {
        match self {
            Alarm::Silent(peer) | Alarm::RivalPrimary(peer) => peer,
        }
    }
}

impl fmt::Display for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alarm::Silent(peer) => write!(f, "Server {} stopped answering", peer),
            Alarm::RivalPrimary(peer) => write!(f, "Backup {} also acts as primary", peer),
        }
    }
}
