//! Two-phase-commit participant
//!
//! Each shard has one exclusive lock. A successful Prepare takes it on
//! behalf of a transaction id and parks the permit in `prepared`; the paired
//! Commit or Abort removes the permit again, which releases the lock.
//!
//! Per transaction: `Idle -> Prepared -> {Committed | Aborted} -> Idle`.
//!
//! A prepared lock whose Commit/Abort never arrives is reclaimed after
//! `prepared_ttl`: the transaction is tombstoned as if aborted and the
//! permit dropped.

use crate::common::{
    Edge, EdgeKey, Error, NodeId, Result, ShardId, ShardRange, TxnRequest, WalSyncPolicy,
};
use crate::shard::store::{PutOutcome, ShardStore};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Remembered aborted transactions, for rejecting late Prepares.
const ABORT_TOMBSTONES: usize = 1024;

pub const DEFAULT_PREPARED_TTL: Duration = Duration::from_secs(30);

/// Result of a successful Prepare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// The shard lock is now held for this transaction.
    Locked,
    /// This transaction already held the lock.
    AlreadyPrepared,
    /// The edge is already stored; no lock was taken.
    Duplicate,
}

/// The shard lock, held between Prepare and Commit/Abort.
struct PreparedLock {
    key: EdgeKey,
    acquired_at: Instant,
    _permit: OwnedSemaphorePermit,
}

#[derive(Default)]
struct Tombstones {
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl Tombstones {
    fn insert(&mut self, txn_id: &str) {
        if txn_id.is_empty() || !self.set.insert(txn_id.to_string()) {
            return;
        }
        self.order.push_back(txn_id.to_string());
        if self.order.len() > ABORT_TOMBSTONES {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
    }

    fn contains(&self, txn_id: &str) -> bool {
        self.set.contains(txn_id)
    }
}

pub struct ShardTransactionManager {
    shard_id: ShardId,
    range: ShardRange,
    store: Mutex<ShardStore>,
    lock: Arc<Semaphore>,
    prepared: Mutex<HashMap<String, PreparedLock>>,
    aborted: Mutex<Tombstones>,
    lock_wait: Duration,
    prepared_ttl: Duration,
}

impl ShardTransactionManager {
    pub fn new(store: ShardStore, lock_wait: Duration) -> Self {
        let meta = store.metadata().clone();
        Self {
            shard_id: meta.shard_id,
            range: meta.range(),
            store: Mutex::new(store),
            lock: Arc::new(Semaphore::new(1)),
            prepared: Mutex::new(HashMap::new()),
            aborted: Mutex::new(Tombstones::default()),
            lock_wait,
            prepared_ttl: DEFAULT_PREPARED_TTL,
        }
    }

    /// How long a prepared lock may wait for its Commit/Abort.
    pub fn with_prepared_ttl(mut self, ttl: Duration) -> Self {
        self.prepared_ttl = ttl;
        self
    }

    /// Open the store in `dir` and wrap it.
    pub fn open(
        dir: impl AsRef<Path>,
        shard_id: ShardId,
        range: ShardRange,
        sync_policy: WalSyncPolicy,
        lock_wait: Duration,
    ) -> Result<Self> {
        let store = ShardStore::open(dir, shard_id, range, sync_policy)?;
        Ok(Self::new(store, lock_wait))
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn range(&self) -> ShardRange {
        self.range
    }

    fn store(&self) -> Result<std::sync::MutexGuard<'_, ShardStore>> {
        self.store
            .lock()
            .map_err(|_| Error::Internal("shard store mutex poisoned".into()))
    }

    fn prepared(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, PreparedLock>>> {
        self.prepared
            .lock()
            .map_err(|_| Error::Internal("prepared lock table poisoned".into()))
    }

    fn aborted(&self) -> Result<std::sync::MutexGuard<'_, Tombstones>> {
        self.aborted
            .lock()
            .map_err(|_| Error::Internal("abort tombstones poisoned".into()))
    }

    /// Id of the transaction currently holding the shard lock, if any.
    pub fn lock_holder(&self) -> Option<String> {
        self.prepared().ok()?.keys().next().cloned()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.available_permits() == 0
    }

    pub fn prepared_ttl(&self) -> Duration {
        self.prepared_ttl
    }

    /// Drop prepared locks older than `prepared_ttl`. Returns how many were
    /// reclaimed.
    pub fn reclaim_expired(&self) -> Result<usize> {
        let expired: Vec<(String, PreparedLock)> = {
            let mut prepared = self.prepared()?;
            let ids: Vec<String> = prepared
                .iter()
                .filter(|(_, lock)| lock.acquired_at.elapsed() >= self.prepared_ttl)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| prepared.remove(&id).map(|lock| (id, lock)))
                .collect()
        };
        if expired.is_empty() {
            return Ok(0);
        }

        let mut aborted = self.aborted()?;
        for (txn_id, lock) in &expired {
            aborted.insert(txn_id);
            tracing::warn!(shard = self.shard_id, txn_id = %txn_id, held_for = ?lock.acquired_at.elapsed(), "Prepared lock expired, transaction aborted");
        }
        Ok(expired.len())
    }

    /// Time until the current holder's lock expires, if one is held.
    fn holder_expires_in(&self) -> Result<Option<Duration>> {
        Ok(self
            .prepared()?
            .values()
            .map(|lock| self.prepared_ttl.saturating_sub(lock.acquired_at.elapsed()))
            .min())
    }

    /// Wait for the shard lock until `lock_wait` runs out, reclaiming the
    /// holder's lock if it expires first.
    async fn acquire(&self, txn_id: &str) -> Result<OwnedSemaphorePermit> {
        let deadline = tokio::time::Instant::now() + self.lock_wait;
        loop {
            self.reclaim_expired()?;
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let wait = match self.holder_expires_in()? {
                Some(expiry) => remaining.min(expiry + Duration::from_millis(1)),
                None => remaining,
            };
            match tokio::time::timeout(wait, self.lock.clone().acquire_owned()).await {
                Ok(Ok(permit)) => return Ok(permit),
                Ok(Err(_)) => return Err(Error::Internal("shard lock closed".into())),
                Err(_) if tokio::time::Instant::now() >= deadline => {
                    tracing::warn!(shard = self.shard_id, txn_id = %txn_id, holder = ?self.lock_holder(), "Timed out waiting for shard lock");
                    return Err(Error::LockTimeout(txn_id.to_string()));
                }
                Err(_) => continue,
            }
        }
    }

    /// Phase one. Rejects with `OutOfRange` when neither endpoint is ours.
    ///
    /// Waits up to `lock_wait` for the shard lock. Cancelling the returned
    /// future at any point leaves no lock behind: the permit is registered
    /// in the same synchronous step that acquires it.
    pub async fn prepare(&self, req: &TxnRequest) -> Result<PrepareOutcome> {
        if req.txn_id.is_empty() {
            return Err(Error::PrepareFailed {
                shard: format!("shard{}", self.shard_id),
                reason: "missing transaction id".into(),
            });
        }
        if !self.range.covers(req.node1, req.node2) {
            tracing::warn!(shard = self.shard_id, txn_id = %req.txn_id, node1 = req.node1, node2 = req.node2, "Prepare rejected: nodes outside range");
            return Err(Error::OutOfRange {
                node1: req.node1,
                node2: req.node2,
                range: self.range.to_string(),
            });
        }

        let key = req.key();
        if self.store()?.contains(&key) {
            tracing::info!(shard = self.shard_id, txn_id = %req.txn_id, key = %key, "Duplicate transaction, already stored");
            return Ok(PrepareOutcome::Duplicate);
        }
        if self.prepared()?.contains_key(&req.txn_id) {
            return Ok(PrepareOutcome::AlreadyPrepared);
        }
        if self.aborted()?.contains(&req.txn_id) {
            return Err(Error::PrepareFailed {
                shard: format!("shard{}", self.shard_id),
                reason: format!("transaction {} was already aborted", req.txn_id),
            });
        }

        let permit = self.acquire(&req.txn_id).await?;

        // The previous holder may have committed this very key, or the
        // coordinator may have aborted us while we waited.
        if self.store()?.contains(&key) {
            drop(permit);
            return Ok(PrepareOutcome::Duplicate);
        }
        if self.aborted()?.contains(&req.txn_id) {
            drop(permit);
            return Err(Error::PrepareFailed {
                shard: format!("shard{}", self.shard_id),
                reason: format!("transaction {} was aborted while waiting", req.txn_id),
            });
        }

        self.prepared()?.insert(
            req.txn_id.clone(),
            PreparedLock {
                key,
                acquired_at: Instant::now(),
                _permit: permit,
            },
        );
        tracing::info!(shard = self.shard_id, txn_id = %req.txn_id, "Transaction lock acquired");
        Ok(PrepareOutcome::Locked)
    }

    /// Phase two. Writes the edge and releases the lock on every path,
    /// including a failed write.
    pub fn commit(&self, req: &TxnRequest) -> Result<PutOutcome> {
        let held = self.prepared()?.remove(&req.txn_id);
        match &held {
            Some(lock) if lock.key != req.key() => {
                tracing::warn!(shard = self.shard_id, txn_id = %req.txn_id, "Commit key differs from prepared key")
            }
            Some(_) => {}
            None => {
                tracing::warn!(shard = self.shard_id, txn_id = %req.txn_id, "Commit without a prepared lock")
            }
        }

        let edge = req.edge();
        let self_loop = edge.is_self_loop;
        let result = self.store()?.put_if_absent(edge);
        let held_for = held.map(|lock| lock.acquired_at.elapsed());
        match &result {
            Ok(PutOutcome::Inserted) if self_loop => {
                tracing::info!(shard = self.shard_id, txn_id = %req.txn_id, node = req.node1, ?held_for, "User registered")
            }
            Ok(PutOutcome::Inserted) => {
                tracing::info!(shard = self.shard_id, txn_id = %req.txn_id, node1 = req.node1, node2 = req.node2, ?held_for, "Message recorded")
            }
            Ok(PutOutcome::AlreadyExists) => {
                tracing::info!(shard = self.shard_id, txn_id = %req.txn_id, "Commit of existing edge, nothing written")
            }
            Err(e) => {
                tracing::error!(shard = self.shard_id, txn_id = %req.txn_id, "Commit failed: {}", e)
            }
        }
        result
    }

    /// Release the lock without writing. Returns whether a lock was held.
    pub fn abort(&self, txn_id: &str) -> Result<bool> {
        self.aborted()?.insert(txn_id);
        let released = self.prepared()?.remove(txn_id).is_some();
        tracing::info!(shard = self.shard_id, txn_id = %txn_id, released, "Transaction aborted");
        Ok(released)
    }

    /// Outgoing and incoming edges of `node` stored on this shard.
    pub fn get_edges(&self, node: NodeId) -> Result<Vec<Edge>> {
        Ok(self.store()?.scan_by_node(node))
    }

    pub fn edge_count(&self) -> Result<usize> {
        Ok(self.store()?.len())
    }

    /// Force buffered log writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.store()?.sync()
    }
}
