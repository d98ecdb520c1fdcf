//! Two-phase commit across shards
//!
//! The coordinator routes each edge insertion to the shards owning its
//! endpoints and drives Prepare/Commit/Abort against them. Only the
//! consensus leader accepts writes.
//!
//! Prepare is sent one shard at a time in ascending shard-id order: that is
//! the global lock-acquisition order, so two transactions can never hold
//! each other's next shard. Commit and Abort fan out concurrently and are
//! retried on communication errors. A shard that never hears back reclaims
//! its prepared lock on its own.
//!
//! The protocol runs in its own task, so a caller that gives up (a dropped
//! gRPC request) cannot cut a transaction off between the two phases.

use crate::common::{
    with_timeout, CoordinatorMetrics, Edge, Error, NodeId, Result, ShardDescriptor, ShardId,
    TxnRequest,
};
use crate::coordinator::consensus::ConsensusModule;
use crate::coordinator::routing::ShardRouter;
use crate::coordinator::txlog::{TransactionLog, TxnStatus};
use crate::rpc::{CommitAck, PrepareVote, ShardChannel};
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deliveries of a Commit or Abort before giving up on a shard.
const PHASE_TWO_ATTEMPTS: u32 = 3;
const PHASE_TWO_BACKOFF: Duration = Duration::from_millis(50);

/// A shard and the channel used to reach it
pub struct ShardHandle {
    pub descriptor: ShardDescriptor,
    pub channel: Arc<dyn ShardChannel>,
}

impl ShardHandle {
    pub fn new(descriptor: ShardDescriptor, channel: Arc<dyn ShardChannel>) -> Self {
        Self {
            descriptor,
            channel,
        }
    }
}

/// Successful result of `insert_data`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Committed {
        txn_id: String,
    },
    /// At least one shard wrote the edge, but not all of them.
    CommittedPartial {
        txn_id: String,
        failed_shards: Vec<ShardId>,
    },
}

impl InsertOutcome {
    pub fn txn_id(&self) -> &str {
        match self {
            InsertOutcome::Committed { txn_id } => txn_id,
            InsertOutcome::CommittedPartial { txn_id, .. } => txn_id,
        }
    }

    pub fn message(&self) -> String {
        match self {
            InsertOutcome::Committed { .. } => "Transaction committed".to_string(),
            InsertOutcome::CommittedPartial { failed_shards, .. } => format!(
                "Transaction committed with warning: commit failed on shard(s) {:?}",
                failed_shards
            ),
        }
    }
}

pub struct Coordinator {
    node_id: String,
    router: ShardRouter,
    channels: HashMap<ShardId, Arc<dyn ShardChannel>>,
    consensus: Arc<ConsensusModule>,
    log: TransactionLog,
    metrics: Arc<CoordinatorMetrics>,
    rpc_timeout: Duration,
    next_seq: AtomicU64,
}

impl Coordinator {
    pub fn new(
        shards: Vec<ShardHandle>,
        consensus: Arc<ConsensusModule>,
        rpc_timeout: Duration,
    ) -> Self {
        let mut descriptors = Vec::with_capacity(shards.len());
        let mut channels = HashMap::with_capacity(shards.len());
        for handle in shards {
            channels.insert(handle.descriptor.shard_id, handle.channel);
            descriptors.push(handle.descriptor);
        }
        Self {
            node_id: consensus.node_id().to_string(),
            router: ShardRouter::new(descriptors),
            channels,
            consensus,
            log: TransactionLog::in_memory(),
            metrics: Arc::new(CoordinatorMetrics::new()),
            rpc_timeout,
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn with_log(mut self, log: TransactionLog) -> Self {
        self.log = log;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<CoordinatorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    pub fn consensus(&self) -> &Arc<ConsensusModule> {
        &self.consensus
    }

    pub fn transaction_log(&self) -> &TransactionLog {
        &self.log
    }

    pub fn metrics(&self) -> &Arc<CoordinatorMetrics> {
        &self.metrics
    }

    fn channel(&self, shard: ShardId) -> Result<Arc<dyn ShardChannel>> {
        self.channels
            .get(&shard)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no channel for shard{}", shard)))
    }

    fn next_txn_id(&self) -> String {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", self.node_id, self.consensus.term(), seq)
    }

    fn mark(&self, txn_id: &str, status: TxnStatus, detail: Option<String>) {
        if let Err(e) = self.log.transition(txn_id, status, detail) {
            tracing::error!(txn_id, "Transaction log update failed: {}", e);
        }
    }

    /// Insert one directed edge atomically across the shards owning its
    /// endpoints.
    pub async fn insert_data(
        self: &Arc<Self>,
        timestamp: impl Into<String>,
        node1: NodeId,
        node2: NodeId,
        weight: i64,
    ) -> Result<InsertOutcome> {
        if !self.consensus.is_leader() {
            self.metrics.txn_rejected_not_leader.inc();
            return Err(Error::NotLeader(self.consensus.leader_hint()));
        }

        let shard_ids = self.router.involved(node1, node2)?;
        let txn = TxnRequest {
            txn_id: self.next_txn_id(),
            timestamp: timestamp.into(),
            node1,
            node2,
            weight,
        };
        self.log.begin(
            txn.txn_id.clone(),
            txn.timestamp.clone(),
            node1,
            node2,
            weight,
            shard_ids.clone(),
        );
        tracing::info!(txn_id = %txn.txn_id, node1, node2, weight, shards = ?shard_ids, "Insert request routed");

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_two_phase(txn, shard_ids).await })
            .await
            .map_err(|e| Error::Internal(format!("transaction task failed: {}", e)))?
    }

    async fn run_two_phase(
        &self,
        txn: TxnRequest,
        shard_ids: Vec<ShardId>,
    ) -> Result<InsertOutcome> {
        // Phase 1: prepare, in shard-id order.
        let mut prepared: Vec<ShardId> = Vec::with_capacity(shard_ids.len());
        let mut failure: Option<(ShardId, String, bool)> = None;
        for &shard in &shard_ids {
            let channel = self.channel(shard)?;
            let start = Instant::now();
            match with_timeout(self.rpc_timeout, "prepare", channel.prepare(&txn)).await {
                Ok(PrepareVote::Yes) => {
                    tracing::info!(txn_id = %txn.txn_id, shard, latency_ms = start.elapsed().as_millis() as u64, "Shard prepared");
                    prepared.push(shard);
                }
                Ok(PrepareVote::No(reason)) => {
                    tracing::warn!(txn_id = %txn.txn_id, shard, %reason, "Shard rejected prepare");
                    failure = Some((shard, reason, false));
                    break;
                }
                Err(e) => {
                    tracing::warn!(txn_id = %txn.txn_id, shard, "Prepare communication error: {}", e);
                    failure = Some((shard, e.to_string(), e.is_communication()));
                    break;
                }
            }
        }

        if let Some((failed_shard, reason, uncertain)) = failure {
            // A shard we lost contact with may still take the lock late.
            let mut targets = prepared;
            if uncertain {
                targets.push(failed_shard);
            }
            self.abort_all(&txn, &targets).await;
            self.mark(&txn.txn_id, TxnStatus::Aborted, Some(reason.clone()));
            self.metrics.txn_aborted.inc();
            tracing::warn!(txn_id = %txn.txn_id, "Prepare phase failed, transaction aborted");
            return Err(Error::PrepareFailed {
                shard: format!("shard{}", failed_shard),
                reason,
            });
        }
        self.mark(&txn.txn_id, TxnStatus::Prepared, None);

        // Phase 2: commit everywhere.
        let (written, failed) = self.commit_all(&txn, &shard_ids).await;
        if failed.is_empty() {
            self.mark(&txn.txn_id, TxnStatus::Committed, None);
            self.metrics.txn_committed.inc();
            tracing::info!(txn_id = %txn.txn_id, "Transaction committed");
            return Ok(InsertOutcome::Committed { txn_id: txn.txn_id });
        }

        let detail = failed
            .iter()
            .map(|(shard, reason)| format!("shard{}: {}", shard, reason))
            .collect::<Vec<_>>()
            .join("; ");
        if written.is_empty() {
            self.mark(&txn.txn_id, TxnStatus::Failed, Some(detail.clone()));
            self.metrics.txn_failed.inc();
            tracing::error!(txn_id = %txn.txn_id, %detail, "Commit failed on every shard");
            return Err(Error::CommitFailed {
                shard: format!("shard{}", failed[0].0),
                reason: detail,
            });
        }

        // Commit is not transactional across shards: the edge is now
        // visible from some shards only.
        self.mark(&txn.txn_id, TxnStatus::CommittedPartial, Some(detail.clone()));
        self.metrics.txn_committed_partial.inc();
        tracing::warn!(txn_id = %txn.txn_id, written = ?written, %detail, "Transaction partially committed");
        Ok(InsertOutcome::CommittedPartial {
            txn_id: txn.txn_id,
            failed_shards: failed.into_iter().map(|(shard, _)| shard).collect(),
        })
    }

    async fn commit_all(
        &self,
        txn: &TxnRequest,
        shards: &[ShardId],
    ) -> (Vec<ShardId>, Vec<(ShardId, String)>) {
        let calls = shards.iter().map(|&shard| async move {
            let res = self
                .deliver(&txn.txn_id, shard, "commit", |channel| async move {
                    channel.commit(txn).await
                })
                .await;
            (shard, res)
        });

        let mut written = Vec::new();
        let mut failed = Vec::new();
        for (shard, res) in join_all(calls).await {
            match res {
                Ok(CommitAck::Written) => written.push(shard),
                Ok(CommitAck::Failed(reason)) => {
                    tracing::error!(txn_id = %txn.txn_id, shard, %reason, "Shard commit failed");
                    failed.push((shard, reason));
                }
                Err(e) => {
                    tracing::error!(txn_id = %txn.txn_id, shard, "Commit communication error: {}", e);
                    failed.push((shard, e.to_string()));
                }
            }
        }
        (written, failed)
    }

    /// Send a phase-two call, retrying while the shard is unreachable.
    /// Commit and Abort are idempotent on the shard.
    async fn deliver<T, F, Fut>(
        &self,
        txn_id: &str,
        shard: ShardId,
        op: &'static str,
        call: F,
    ) -> Result<T>
    where
        F: Fn(Arc<dyn ShardChannel>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let channel = self.channel(shard)?;
        let mut attempt = 1;
        loop {
            match with_timeout(self.rpc_timeout, op, call(channel.clone())).await {
                Err(e) if e.is_communication() && attempt < PHASE_TWO_ATTEMPTS => {
                    tracing::warn!(txn_id, shard, attempt, "{} not delivered, retrying: {}", op, e);
                    tokio::time::sleep(PHASE_TWO_BACKOFF * attempt).await;
                    attempt += 1;
                }
                res => return res,
            }
        }
    }

    async fn abort_all(&self, txn: &TxnRequest, shards: &[ShardId]) {
        let calls = shards.iter().map(|&shard| async move {
            let res = self
                .deliver(&txn.txn_id, shard, "abort", |channel| async move {
                    channel.abort(txn).await
                })
                .await;
            (shard, res)
        });

        for (shard, res) in join_all(calls).await {
            match res {
                Ok(()) => tracing::info!(txn_id = %txn.txn_id, shard, "Abort delivered"),
                Err(e) => {
                    tracing::error!(txn_id = %txn.txn_id, shard, "Abort not delivered, shard will reclaim the lock when it expires: {}", e)
                }
            }
        }
    }

    /// Edges touching `node`, merged from every shard.
    ///
    /// Never fails: unreachable shards are skipped and the gap is logged.
    /// A cross-shard edge is stored on both shards and returned once.
    pub async fn get_edges(&self, node: NodeId) -> Vec<Edge> {
        let calls = self.router.shards().iter().map(|s| {
            let shard = s.shard_id;
            async move {
                let res = match self.channel(shard) {
                    Ok(channel) => {
                        with_timeout(self.rpc_timeout, "get_edges", channel.get_edges(node)).await
                    }
                    Err(e) => Err(e),
                };
                (shard, res)
            }
        });

        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        for (shard, res) in join_all(calls).await {
            match res {
                Ok(list) => {
                    tracing::debug!(node, shard, count = list.len(), "Received edges");
                    for edge in list {
                        if seen.insert(edge.key()) {
                            edges.push(edge);
                        }
                    }
                }
                Err(e) => {
                    self.metrics.edge_scan_gaps.inc();
                    tracing::warn!(node, shard, "Edge query failed, result is partial: {}", e);
                }
            }
        }
        edges
    }
}
