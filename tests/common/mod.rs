//! Shared helpers: an in-process two-shard cluster and a shard channel
//! that can be told to misbehave.

#![allow(dead_code)]

use socialgraph::common::{
    ConsensusConfig, Edge, NodeId, Result, ShardDescriptor, ShardRange, TxnRequest, WalSyncPolicy,
};
use socialgraph::coordinator::{ConsensusModule, Coordinator, NodeState, ShardHandle};
use socialgraph::rpc::{CommitAck, LocalShardChannel, PrepareVote, ShardChannel};
use socialgraph::shard::{ShardTransactionManager, DEFAULT_PREPARED_TTL};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const SHARD1: ShardRange = ShardRange {
    start: 1,
    end: 949,
};
pub const SHARD2: ShardRange = ShardRange {
    start: 950,
    end: 1899,
};

/// Shard channel wrapper with switchable failures and call counters.
pub struct FaultyShard {
    inner: LocalShardChannel,
    pub reject_prepare: AtomicBool,
    pub hang_prepare: AtomicBool,
    pub fail_commit: AtomicBool,
    pub unreachable: AtomicBool,
    /// Commits to drop in transit before delivering again.
    pub lose_commits: AtomicUsize,
    pub prepares: AtomicUsize,
    pub commits: AtomicUsize,
    pub aborts: AtomicUsize,
}

impl FaultyShard {
    pub fn new(manager: Arc<ShardTransactionManager>) -> Self {
        Self {
            inner: LocalShardChannel::new(manager),
            reject_prepare: AtomicBool::new(false),
            hang_prepare: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
            lose_commits: AtomicUsize::new(0),
            prepares: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
        }
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(socialgraph::Error::ConnectionFailed("shard down".into()));
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl ShardChannel for FaultyShard {
    async fn prepare(&self, txn: &TxnRequest) -> Result<PrepareVote> {
        self.check_reachable()?;
        self.prepares.fetch_add(1, Ordering::SeqCst);
        if self.reject_prepare.load(Ordering::SeqCst) {
            return Ok(PrepareVote::No("injected prepare failure".into()));
        }
        if self.hang_prepare.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.prepare(txn).await
    }

    async fn commit(&self, txn: &TxnRequest) -> Result<CommitAck> {
        self.check_reachable()?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        let lost = self
            .lose_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Err(socialgraph::Error::ConnectionFailed("commit lost".into()));
        }
        if self.fail_commit.load(Ordering::SeqCst) {
            // Release the lock the way a failed store write would.
            self.inner.abort(txn).await?;
            return Ok(CommitAck::Failed("injected store failure".into()));
        }
        self.inner.commit(txn).await
    }

    async fn abort(&self, txn: &TxnRequest) -> Result<()> {
        self.check_reachable()?;
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.inner.abort(txn).await
    }

    async fn get_edges(&self, node: NodeId) -> Result<Vec<Edge>> {
        self.check_reachable()?;
        self.inner.get_edges(node).await
    }
}

pub struct TestCluster {
    pub dir: TempDir,
    pub managers: Vec<Arc<ShardTransactionManager>>,
    pub channels: Vec<Arc<FaultyShard>>,
    pub consensus: Arc<ConsensusModule>,
    pub coordinator: Arc<Coordinator>,
}

impl TestCluster {
    /// Two shards, one coordinator that is already leader.
    pub async fn start() -> Self {
        Self::start_with(Duration::from_millis(500), Duration::from_millis(300)).await
    }

    pub async fn start_with(rpc_timeout: Duration, lock_wait: Duration) -> Self {
        Self::start_with_ttl(rpc_timeout, lock_wait, DEFAULT_PREPARED_TTL).await
    }

    pub async fn start_with_ttl(
        rpc_timeout: Duration,
        lock_wait: Duration,
        prepared_ttl: Duration,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let mut managers = Vec::new();
        let mut channels = Vec::new();
        let mut handles = Vec::new();
        for (id, range) in [(1, SHARD1), (2, SHARD2)] {
            let manager = Arc::new(
                ShardTransactionManager::open(
                    dir.path().join(format!("shard{}", id)),
                    id,
                    range,
                    WalSyncPolicy::Never,
                    lock_wait,
                )
                .unwrap()
                .with_prepared_ttl(prepared_ttl),
            );
            let channel = Arc::new(FaultyShard::new(manager.clone()));
            handles.push(ShardHandle::new(
                ShardDescriptor::new(id, range, format!("local://shard{}", id)),
                channel.clone(),
            ));
            managers.push(manager);
            channels.push(channel);
        }

        let consensus = Arc::new(ConsensusModule::new(
            "coord-1",
            Vec::new(),
            ConsensusConfig::default(),
        ));
        let _ = consensus.start();
        wait_for_role(&consensus, NodeState::Leader).await;

        let coordinator = Arc::new(Coordinator::new(handles, consensus.clone(), rpc_timeout));
        Self {
            dir,
            managers,
            channels,
            consensus,
            coordinator,
        }
    }

    pub fn shard(&self, id: usize) -> &Arc<ShardTransactionManager> {
        &self.managers[id - 1]
    }

    pub fn channel(&self, id: usize) -> &Arc<FaultyShard> {
        &self.channels[id - 1]
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        self.consensus.shutdown();
    }
}

pub async fn wait_for_role(node: &ConsensusModule, role: NodeState) {
    let mut rx = node.subscribe();
    tokio::time::timeout(Duration::from_secs(3), async {
        while rx.borrow_and_update().role != role {
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} never became {}", node.node_id(), role));
}

pub fn txn(id: &str, timestamp: &str, node1: NodeId, node2: NodeId, weight: i64) -> TxnRequest {
    TxnRequest {
        txn_id: id.to_string(),
        timestamp: timestamp.to_string(),
        node1,
        node2,
        weight,
    }
}
