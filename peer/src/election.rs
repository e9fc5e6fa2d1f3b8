//! Leader election
//!
//! One round runs in three phases, each finishing on every participant before
//! the next starts:
//!
//! 1. every candidate forgets the identities it collected in earlier rounds
//! 2. every candidate receives the member list and broadcasts its identity
//! 3. every candidate, in member-list order, ranks what it collected and
//!    assumes its resulting role
//!
//! All candidates rank the same set of identities, so they agree on which
//! node is primary (the highest) and which is backup (the next highest).

use crate::error::NodeError;
use crate::membership::Membership;
use crate::network::PeerClient;
use crate::node::Node;
use log::{debug, error, info, warn};
use shared::{compare_ids, GameSnapshot, PeerRef, Role, RpcError};
use std::future::Future;
use std::iter;
use tokio::task::JoinSet;

/// Result of ranking the identities seen in one round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    /// Distinct identities in ascending order
    pub ranked: Vec<String>,
    pub primary: String,
    pub backup: Option<String>,
}

impl Ballot {
    /// Ranks identities, ignoring case first and then comparing bytes
    ///
    /// Returns `None` when there is nobody to rank.
    pub fn tally<I>(ids: I) -> Option<Ballot>
    where
        I: IntoIterator<Item = String>,
    {
        let mut ranked: Vec<String> = ids.into_iter().collect();
        ranked.sort_by(|a, b| compare_ids(a, b));
        ranked.dedup();

        let primary = ranked.last()?.clone();
        let backup = ranked.iter().rev().nth(1).cloned();

        Some(Ballot {
            ranked,
            primary,
            backup,
        })
    }

    pub fn role_of(&self, id: &str) -> Role {
        if self.primary == id {
            Role::Primary
        } else if self.backup.as_deref() == Some(id) {
            Role::Backup
        } else {
            Role::Player
        }
    }

    fn names_backup(&self, id: &str) -> bool {
        self.backup.as_deref() == Some(id)
    }
}

impl Node {
    pub async fn clear_received_ids(&self) {
        self.state.write().await.received_ids.clear();
        debug!("{} cleared received ids", self.id());
    }

    pub async fn set_membership(&self, members: Vec<PeerRef>) {
        let mut state = self.state.write().await;
        state.game.membership = Membership::new(members);
    }

    pub async fn receive_id(&self, id: String) {
        let mut state = self.state.write().await;
        if !state.received_ids.contains(&id) {
            state.received_ids.push(id);
        }
    }

    /// Sends this node's identity to every other member
    pub async fn broadcast_id(&self) {
        let me = self.id();
        let others: Vec<PeerRef> = {
            let state = self.state.read().await;
            state.game.membership.others(&me).cloned().collect()
        };

        for peer in others {
            if let Err(e) = self.client.receive_id(&peer, &me).await {
                warn!("{} could not send its id to {}: {}", me, peer, e);
            }
        }
    }

    /// Runs a complete election over `candidates`
    ///
    /// Unreachable candidates are dropped first, as are nodes that answer to a
    /// different identity than the one listed. Fails only when nobody is left.
    pub async fn initiate_election(&self, candidates: Vec<PeerRef>) -> Result<(), NodeError> {
        let candidates = Membership::new(candidates).to_vec();
        info!(
            "{} starting election over {} candidates",
            self.id(),
            candidates.len()
        );

        let reachable = self
            .fan_out("identity check", &candidates, |client, peer| async move {
                let id = client.get_identity(&peer).await?;
                if id == peer.id {
                    Ok(())
                } else {
                    Err(RpcError::UnexpectedResponse(format!(
                        "{} answers as {}",
                        peer, id
                    )))
                }
            })
            .await;

        if reachable.is_empty() {
            error!("No reachable candidates, election abandoned");
            return Err(NodeError::NoCandidates);
        }

        let cleared = self
            .fan_out("clear", &reachable, |client, peer| async move {
                client.clear_received_ids(&peer).await
            })
            .await;

        let members = cleared.clone();
        let announced = self
            .fan_out("announce", &cleared, move |client, peer| {
                let members = members.clone();
                async move {
                    client.set_membership(&peer, members).await?;
                    client.broadcast_id(&peer).await
                }
            })
            .await;

        for peer in &announced {
            if let Err(e) = self.client.elect_servers(peer).await {
                warn!("{} failed to elect servers: {}", peer, e);
            }
        }

        info!(
            "{} finished election with {} participants",
            self.id(),
            announced.len()
        );
        Ok(())
    }

    /// Runs `call` against every peer concurrently and waits for all of them
    ///
    /// Returns the peers whose call succeeded, in input order.
    async fn fan_out<F, Fut>(&self, phase: &str, peers: &[PeerRef], call: F) -> Vec<PeerRef>
    where
        F: Fn(PeerClient, PeerRef) -> Fut,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        let mut calls = JoinSet::new();
        for (index, peer) in peers.iter().cloned().enumerate() {
            let pending = call(self.client.clone(), peer.clone());
            calls.spawn(async move { (index, peer, pending.await) });
        }

        let mut succeeded = Vec::with_capacity(peers.len());
        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((index, peer, Ok(()))) => succeeded.push((index, peer)),
                Ok((_, peer, Err(e))) => warn!("Election {} failed for {}: {}", phase, peer, e),
                Err(e) => error!("Election {} task failed: {}", phase, e),
            }
        }

        succeeded.sort_by_key(|(index, _)| *index);
        succeeded.into_iter().map(|(_, peer)| peer).collect()
    }

    /// Ranks the collected identities and assumes the resulting role
    ///
    /// Before ranking, the freshest state held by the previous primary or
    /// backup is pulled in, so the game survives the hand-over.
    pub async fn elect_servers(&self) -> Result<Role, NodeError> {
        let me = self.me();
        let (received, candidates) = {
            let state = self.state.read().await;
            (state.received_ids.clone(), state.game.membership.clone())
        };

        let (prior_primary, prior_backup) = self.find_prior_servers(&candidates).await;
        self.absorb_prior_state(&me, [&prior_primary, &prior_backup])
            .await;

        let ballot = Ballot::tally(received.into_iter().chain(iter::once(me.id.clone())))
            .ok_or(NodeError::NoCandidates)?;
        let role = ballot.role_of(&me.id);

        match role {
            Role::Primary => {
                if let Some(old) = prior_primary.as_ref().filter(|p| p.id != me.id) {
                    if ballot.names_backup(&old.id) {
                        self.demote(old, Role::Backup).await;
                    } else {
                        self.demote(old, Role::Player).await;
                    }
                }
                if let Some(old) = prior_backup
                    .as_ref()
                    .filter(|p| p.id != me.id && !ballot.names_backup(&p.id))
                {
                    self.demote(old, Role::Player).await;
                }
            }
            Role::Backup => {
                if let Some(old) = prior_backup
                    .as_ref()
                    .filter(|p| p.id != me.id && p.id != ballot.primary)
                {
                    self.demote(old, Role::Player).await;
                }
            }
            Role::Player => {}
        }

        let resolve = |id: &str| {
            if id == me.id {
                Some(me.clone())
            } else {
                candidates.resolve(id).cloned()
            }
        };
        let primary = resolve(&ballot.primary);
        let backup = ballot.backup.as_deref().and_then(resolve);

        {
            let mut state = self.state.write().await;
            state.role = role;
            state.primary = primary;
            state.backup = backup;
            let mut known = candidates.clone();
            known.insert(me.clone());
            state.game.set_membership(known.rebuild(&ballot.ranked));
        }

        info!(
            "{} elected as {} (primary {}, backup {})",
            me.id,
            role,
            ballot.primary,
            ballot.backup.as_deref().unwrap_or("none")
        );
        Ok(role)
    }

    /// Asks every candidate for its role and returns the current primary and backup
    async fn find_prior_servers(
        &self,
        candidates: &Membership,
    ) -> (Option<PeerRef>, Option<PeerRef>) {
        let mut primary = None;
        let mut backup = None;

        for peer in candidates.members() {
            match self.client.get_role(peer).await {
                Ok(Role::Primary) if primary.is_none() => primary = Some(peer.clone()),
                Ok(Role::Backup) if backup.is_none() => backup = Some(peer.clone()),
                Ok(_) => {}
                Err(e) => debug!("Could not read role of {}: {}", peer, e),
            }
        }

        (primary, backup)
    }

    /// Adopts the highest-versioned snapshot held by a prior server
    ///
    /// The prior primary wins ties. A node that itself was a server keeps its
    /// own state unless a strictly newer one turns up.
    async fn absorb_prior_state(&self, me: &PeerRef, sources: [&Option<PeerRef>; 2]) {
        let mut freshest: Option<GameSnapshot> = None;

        for source in sources.into_iter().flatten() {
            if source.id == me.id {
                continue;
            }
            match self.client.get_game_state(source, &me.id).await {
                Ok(snapshot) => {
                    let newer = freshest
                        .as_ref()
                        .map_or(true, |best| snapshot.version > best.version);
                    if newer {
                        freshest = Some(snapshot);
                    }
                }
                Err(e) => warn!("Could not pull state from {}: {}", source, e),
            }
        }

        let Some(snapshot) = freshest else {
            return;
        };

        let (local_version, local_initialized) = {
            let state = self.state.read().await;
            (state.game.version, state.game.initialized)
        };
        if snapshot.initialized && (!local_initialized || snapshot.version >= local_version) {
            self.update_game_state(snapshot).await;
        }
    }

    async fn demote(&self, peer: &PeerRef, role: Role) {
        info!("Demoting {} to {}", peer, role);
        let result = match role {
            Role::Backup => self.client.demote_to_backup(peer).await,
            _ => self.client.demote_to_player(peer).await,
        };
        if let Err(e) = result {
            warn!("Failed to demote {}: {}", peer, e);
        }
    }

    /// Makes the known backup the known primary
    pub async fn promote_backup_to_primary(&self) {
        let mut state = self.state.write().await;
        if let Some(backup) = state.backup.take() {
            info!("{} now treats {} as primary", self.id(), backup);
            state.primary = Some(backup);
        }
    }

    pub async fn demote_to_backup(&self) {
        self.state.write().await.role = Role::Backup;
        info!("{} demoted to BACKUP", self.id());
    }

    pub async fn demote_to_player(&self) {
        self.state.write().await.role = Role::Player;
        info!("{} demoted to PLAYER", self.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_highest_id_is_primary() {
        let ballot = Ballot::tally(ids(&["p1", "p3", "p2"])).unwrap();

        assert_eq!(ballot.primary, "p3");
        assert_eq!(ballot.backup.as_deref(), Some("p2"));
        assert_eq!(ballot.ranked, ids(&["p1", "p2", "p3"]));
    }

    #[test]
    fn test_single_candidate_has_no_backup() {
        let ballot = Ballot::tally(ids(&["ab"])).unwrap();

        assert_eq!(ballot.primary, "ab");
        assert_eq!(ballot.backup, None);
        assert_eq!(ballot.role_of("ab"), Role::Primary);
    }

    #[test]
    fn test_empty_ballot() {
        assert_eq!(Ballot::tally(Vec::new()), None);
    }

    #[test]
    fn test_ordering_ignores_case() {
        let ballot = Ballot::tally(ids(&["Zz", "ab", "cD"])).unwrap();

        assert_eq!(ballot.primary, "Zz");
        assert_eq!(ballot.backup.as_deref(), Some("cD"));
    }

    #[test]
    fn test_case_ties_break_on_bytes() {
        let ballot = Ballot::tally(ids(&["ab", "AB"])).unwrap();

        // Uppercase sorts first bytewise.
        assert_eq!(ballot.ranked, ids(&["AB", "ab"]));
        assert_eq!(ballot.primary, "ab");
    }

    #[test]
    fn test_duplicates_are_collapsed() {
        let ballot = Ballot::tally(ids(&["ab", "cd", "cd", "ab"])).unwrap();

        assert_eq!(ballot.ranked, ids(&["ab", "cd"]));
        assert_eq!(ballot.backup.as_deref(), Some("ab"));
    }

    #[test]
    fn test_role_of() {
        let ballot = Ballot::tally(ids(&["aa", "bb", "cc", "dd"])).unwrap();

        assert_eq!(ballot.role_of("dd"), Role::Primary);
        assert_eq!(ballot.role_of("cc"), Role::Backup);
        assert_eq!(ballot.role_of("aa"), Role::Player);
        assert_eq!(ballot.role_of("zz"), Role::Player);
    }
}
