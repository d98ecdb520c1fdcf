//! Coordinator leader election
//!
//! Term-based election with randomized timeouts and leader heartbeats, so
//! that exactly one coordinator replica runs two-phase commit at a time.
//! There is no log replication: AppendEntries only carries heartbeats.

use crate::common::{ConsensusConfig, CoordinatorMetrics};
use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::rpc::PeerChannel;
use futures_util::stream::{FuturesUnordered, StreamExt};
use rand::Rng;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Consensus role of a coordinator replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Follower => write!(f, "follower"),
            NodeState::Candidate => write!(f, "candidate"),
            NodeState::Leader => write!(f, "leader"),
        }
    }
}

/// Point-in-time view of the consensus state, published on every change.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RoleSnapshot {
    pub role: NodeState,
    pub term: u64,
    pub leader_id: Option<String>,
}

/// Another coordinator replica
pub struct Peer {
    pub id: String,
    pub channel: Arc<dyn PeerChannel>,
}

impl Peer {
    pub fn new(id: impl Into<String>, channel: Arc<dyn PeerChannel>) -> Self {
        Self {
            id: id.into(),
            channel,
        }
    }
}

struct ConsensusState {
    role: NodeState,
    term: u64,
    voted_for: Option<String>,
    leader_id: Option<String>,
    last_contact: Instant,
    election_timeout: Duration,
}

pub struct ConsensusModule {
    node_id: String,
    peers: Vec<Peer>,
    config: ConsensusConfig,
    state: Mutex<ConsensusState>,
    role_tx: watch::Sender<RoleSnapshot>,
    shutdown_tx: watch::Sender<bool>,
    metrics: Option<Arc<CoordinatorMetrics>>,
}

impl ConsensusModule {
    pub fn new(node_id: impl Into<String>, peers: Vec<Peer>, config: ConsensusConfig) -> Self {
        let election_timeout = random_timeout(&config);
        let (role_tx, _) = watch::channel(RoleSnapshot {
            role: NodeState::Follower,
            term: 0,
            leader_id: None,
        });
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            node_id: node_id.into(),
            peers,
            config,
            state: Mutex::new(ConsensusState {
                role: NodeState::Follower,
                term: 0,
                voted_for: None,
                leader_id: None,
                last_contact: Instant::now(),
                election_timeout,
            }),
            role_tx,
            shutdown_tx,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CoordinatorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn state(&self) -> MutexGuard<'_, ConsensusState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, s: &ConsensusState) {
        self.role_tx.send_if_modified(|snap| {
            let next = RoleSnapshot {
                role: s.role,
                term: s.term,
                leader_id: s.leader_id.clone(),
            };
            if *snap == next {
                false
            } else {
                *snap = next;
                true
            }
        });
    }

    fn reset_timer(&self, s: &mut ConsensusState) {
        s.last_contact = Instant::now();
        s.election_timeout = random_timeout(&self.config);
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn is_leader(&self) -> bool {
        self.state().role == NodeState::Leader
    }

    pub fn role(&self) -> NodeState {
        self.state().role
    }

    pub fn term(&self) -> u64 {
        self.state().term
    }

    pub fn leader_id(&self) -> Option<String> {
        self.state().leader_id.clone()
    }

    /// Last known leader, for redirecting rejected writes.
    pub fn leader_hint(&self) -> String {
        self.leader_id().unwrap_or_else(|| "unknown".to_string())
    }

    pub fn snapshot(&self) -> RoleSnapshot {
        let s = self.state();
        RoleSnapshot {
            role: s.role,
            term: s.term,
            leader_id: s.leader_id.clone(),
        }
    }

    /// Watch role and term changes.
    pub fn subscribe(&self) -> watch::Receiver<RoleSnapshot> {
        self.role_tx.subscribe()
    }

    /// Adopt a higher term (if any) and become a follower.
    pub fn step_down(&self, term: u64, leader_id: Option<String>) {
        let mut s = self.state();
        self.step_down_locked(&mut s, term, leader_id);
    }

    fn step_down_locked(&self, s: &mut ConsensusState, term: u64, leader_id: Option<String>) {
        if term > s.term {
            s.term = term;
            s.voted_for = None;
        }
        if s.role != NodeState::Follower {
            tracing::info!(node = %self.node_id, term = s.term, "Demoted to follower");
        }
        s.role = NodeState::Follower;
        s.leader_id = leader_id;
        self.reset_timer(s);
        self.publish(s);
    }

    /// RequestVote handler.
    ///
    /// Grants iff the term is at least ours and we have not voted for
    /// someone else in that term.
    pub fn handle_request_vote(&self, req: VoteRequest) -> VoteResponse {
        let mut s = self.state();
        if req.term < s.term {
            return VoteResponse {
                vote_granted: false,
                term: s.term,
            };
        }
        if req.term > s.term {
            self.step_down_locked(&mut s, req.term, None);
        }

        let granted = match &s.voted_for {
            None => true,
            Some(candidate) => candidate == &req.candidate_id,
        };
        if granted {
            s.voted_for = Some(req.candidate_id.clone());
            self.reset_timer(&mut s);
            tracing::debug!(node = %self.node_id, term = s.term, candidate = %req.candidate_id, "Vote granted");
        }
        VoteResponse {
            vote_granted: granted,
            term: s.term,
        }
    }

    /// AppendEntries (heartbeat) handler.
    pub fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesResponse {
        let mut s = self.state();
        if req.term < s.term {
            tracing::debug!(node = %self.node_id, term = s.term, stale_term = req.term, leader = %req.leader_id, "Rejected heartbeat from stale leader");
            return AppendEntriesResponse {
                success: false,
                term: s.term,
            };
        }
        if s.role == NodeState::Leader && req.term == s.term {
            tracing::warn!(node = %self.node_id, term = s.term, other = %req.leader_id, "Second leader in the same term");
        }
        let leader_changed = s.leader_id.as_deref() != Some(req.leader_id.as_str());
        self.step_down_locked(&mut s, req.term, Some(req.leader_id.clone()));
        if leader_changed {
            tracing::info!(node = %self.node_id, term = s.term, leader = %req.leader_id, "Following new leader");
        }
        AppendEntriesResponse {
            success: true,
            term: s.term,
        }
    }

    /// Start the election/heartbeat loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move { node.run().await })
    }

    /// Stop the loop started by [`start`](Self::start).
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        tracing::info!(node = %self.node_id, peers = self.peers.len(), "Consensus loop started");

        // Fixed heartbeat cadence while leading; a round never outlasts it.
        let mut heartbeat: Option<Interval> = None;
        while !*shutdown.borrow() {
            if self.role() == NodeState::Leader {
                let ticker = heartbeat.get_or_insert_with(|| {
                    let mut ticker = tokio::time::interval(self.config.heartbeat_interval());
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker
                });
                tokio::select! {
                    _ = ticker.tick() => self.broadcast_heartbeats().await,
                    _ = shutdown.changed() => {}
                }
            } else {
                heartbeat = None;
                let deadline = {
                    let s = self.state();
                    s.last_contact + s.election_timeout
                };
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        self.run_election().await;
                    }
                    _ = shutdown.changed() => {}
                }
            }
        }

        tracing::info!(node = %self.node_id, "Consensus loop stopped");
    }

    /// Become a candidate and collect votes, if the election timer has
    /// really expired. A heartbeat that arrived after the timer was armed
    /// moves `last_contact` forward and cancels the election.
    async fn run_election(&self) {
        let req = {
            let mut s = self.state();
            if s.role == NodeState::Leader || s.last_contact.elapsed() < s.election_timeout {
                return;
            }
            s.term += 1;
            s.role = NodeState::Candidate;
            s.voted_for = Some(self.node_id.clone());
            s.leader_id = None;
            self.reset_timer(&mut s);
            self.publish(&s);
            VoteRequest {
                term: s.term,
                candidate_id: self.node_id.clone(),
            }
        };
        let term = req.term;
        let cluster = self.cluster_size();
        tracing::info!(node = %self.node_id, term, "Election started");
        if let Some(m) = &self.metrics {
            m.elections_started.inc();
        }

        let mut votes = 1usize;
        if votes * 2 <= cluster {
            let rpc_timeout = self.config.rpc_timeout();
            let mut pending: FuturesUnordered<_> = self
                .peers
                .iter()
                .map(|peer| {
                    let req = req.clone();
                    async move {
                        let res = tokio::time::timeout(rpc_timeout, peer.channel.request_vote(req)).await;
                        (peer.id.as_str(), res)
                    }
                })
                .collect();
            let window = tokio::time::sleep(self.config.vote_window());
            tokio::pin!(window);

            loop {
                tokio::select! {
                    next = pending.next() => match next {
                        None => break,
                        Some((_, Ok(Ok(resp)))) => {
                            if resp.term > term {
                                self.step_down(resp.term, None);
                                return;
                            }
                            if resp.vote_granted {
                                votes += 1;
                                if votes * 2 > cluster {
                                    break;
                                }
                            }
                        }
                        Some((peer, Ok(Err(e)))) => {
                            tracing::debug!(node = %self.node_id, peer, "Vote request failed: {}", e);
                        }
                        Some((peer, Err(_))) => {
                            tracing::debug!(node = %self.node_id, peer, "Vote request timed out");
                        }
                    },
                    _ = &mut window => break,
                }
            }
        }

        let mut s = self.state();
        if s.role != NodeState::Candidate || s.term != term {
            // Superseded by a higher term or another leader's heartbeat.
            return;
        }
        if votes * 2 > cluster {
            s.role = NodeState::Leader;
            s.leader_id = Some(self.node_id.clone());
            self.publish(&s);
            tracing::info!(node = %self.node_id, term, votes, cluster, "Leader elected");
            if let Some(m) = &self.metrics {
                m.elections_won.inc();
            }
        } else {
            s.role = NodeState::Follower;
            self.reset_timer(&mut s);
            self.publish(&s);
            tracing::info!(node = %self.node_id, term, votes, cluster, "Election failed");
        }
    }

    async fn broadcast_heartbeats(&self) {
        let req = {
            let s = self.state();
            if s.role != NodeState::Leader {
                return;
            }
            AppendEntriesRequest {
                term: s.term,
                leader_id: self.node_id.clone(),
            }
        };
        let term = req.term;
        let rpc_timeout = self.config.rpc_timeout().min(self.config.heartbeat_interval());

        let results = futures_util::future::join_all(self.peers.iter().map(|peer| {
            let req = req.clone();
            async move {
                let res = tokio::time::timeout(rpc_timeout, peer.channel.append_entries(req)).await;
                (peer.id.as_str(), res)
            }
        }))
        .await;

        for (peer, res) in results {
            match res {
                Ok(Ok(resp)) if resp.term > term => {
                    tracing::warn!(node = %self.node_id, peer, term, higher_term = resp.term, "Peer has a higher term");
                    self.step_down(resp.term, None);
                    return;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::debug!(node = %self.node_id, peer, "Heartbeat failed: {}", e);
                }
                Err(_) => {
                    tracing::debug!(node = %self.node_id, peer, "Heartbeat timed out");
                }
            }
        }
    }
}

fn random_timeout(config: &ConsensusConfig) -> Duration {
    let ms = rand::thread_rng()
        .gen_range(config.election_timeout_min_ms..=config.election_timeout_max_ms);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> ConsensusModule {
        ConsensusModule::new(id, Vec::new(), ConsensusConfig::default())
    }

    fn vote(term: u64, candidate: &str) -> VoteRequest {
        VoteRequest {
            term,
            candidate_id: candidate.to_string(),
        }
    }

    #[test]
    fn test_starts_as_follower() {
        let n = node("node1");
        assert_eq!(n.role(), NodeState::Follower);
        assert_eq!(n.term(), 0);
        assert!(!n.is_leader());
    }

    #[test]
    fn test_one_vote_per_term() {
        let n = node("node1");
        assert!(n.handle_request_vote(vote(1, "node2")).vote_granted);
        assert!(n.handle_request_vote(vote(1, "node2")).vote_granted);
        assert!(!n.handle_request_vote(vote(1, "node3")).vote_granted);
        // A new term frees the vote.
        assert!(n.handle_request_vote(vote(2, "node3")).vote_granted);
        assert_eq!(n.term(), 2);
    }

    #[test]
    fn test_rejects_stale_vote_request() {
        let n = node("node1");
        n.handle_request_vote(vote(5, "node2"));
        let resp = n.handle_request_vote(vote(4, "node3"));
        assert!(!resp.vote_granted);
        assert_eq!(resp.term, 5);
    }

    #[test]
    fn test_heartbeat_accepts_leader() {
        let n = node("node1");
        let resp = n.handle_append_entries(AppendEntriesRequest {
            term: 3,
            leader_id: "node2".into(),
        });
        assert!(resp.success);
        assert_eq!(n.term(), 3);
        assert_eq!(n.leader_id().as_deref(), Some("node2"));
        assert_eq!(n.leader_hint(), "node2");
    }

    #[test]
    fn test_stale_heartbeat_rejected() {
        let n = node("node1");
        n.handle_append_entries(AppendEntriesRequest {
            term: 3,
            leader_id: "node2".into(),
        });
        let resp = n.handle_append_entries(AppendEntriesRequest {
            term: 2,
            leader_id: "node3".into(),
        });
        assert!(!resp.success);
        assert_eq!(resp.term, 3);
        assert_eq!(n.leader_id().as_deref(), Some("node2"));
    }

    #[tokio::test]
    async fn test_single_node_elects_itself() {
        let n = Arc::new(node("solo"));
        let mut rx = n.subscribe();
        let handle = n.start();

        tokio::time::timeout(Duration::from_secs(2), async {
            while rx.borrow_and_update().role != NodeState::Leader {
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("single node should elect itself");

        assert!(n.is_leader());
        assert_eq!(n.term(), 1);
        n.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_leader_demoted_by_higher_term() {
        let n = Arc::new(node("solo"));
        let handle = n.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(n.is_leader());

        let resp = n.handle_append_entries(AppendEntriesRequest {
            term: n.term() + 1,
            leader_id: "other".into(),
        });
        assert!(resp.success);
        assert_eq!(n.role(), NodeState::Follower);
        assert_eq!(n.leader_hint(), "other");

        n.shutdown();
        handle.await.unwrap();
    }
}
