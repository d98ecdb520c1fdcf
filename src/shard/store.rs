//! Durable per-shard edge store
//!
//! Edges live in an append-only [`EdgeLog`]; an in-memory key index enforces
//! the `(timestamp, sender, receiver)` uniqueness key and a per-node
//! adjacency index answers scans. A small `shard_meta.json` records the
//! range the store was created for and is checked on every open.

use crate::common::{Edge, EdgeKey, Error, NodeId, Result, ShardId, ShardRange, WalSyncPolicy};
use crate::shard::log::EdgeLog;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

const LOG_FILE: &str = "edges.log";
const META_FILE: &str = "shard_meta.json";

/// Result of an idempotent write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    AlreadyExists,
}

/// Persisted shard metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMetadata {
    pub shard_id: ShardId,
    pub range_start: NodeId,
    pub range_end: NodeId,
}

impl ShardMetadata {
    pub fn range(&self) -> ShardRange {
        ShardRange::new(self.range_start, self.range_end)
    }
}

pub struct ShardStore {
    dir: PathBuf,
    meta: ShardMetadata,
    log: EdgeLog,
    /// Edges in log order
    edges: Vec<Edge>,
    keys: HashSet<EdgeKey>,
    /// node -> positions in `edges`
    adjacency: HashMap<NodeId, Vec<usize>>,
}

impl ShardStore {
    /// Open or create the store in `dir`.
    ///
    /// Fails with `RangeMismatch` if the directory was created for a
    /// different shard or range.
    pub fn open(
        dir: impl AsRef<Path>,
        shard_id: ShardId,
        range: ShardRange,
        sync_policy: WalSyncPolicy,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let meta = ShardMetadata {
            shard_id,
            range_start: range.start,
            range_end: range.end,
        };
        Self::verify_or_write_meta(&dir.join(META_FILE), &meta)?;

        let mut edges = Vec::new();
        let log = EdgeLog::open(dir.join(LOG_FILE), sync_policy, |record| {
            edges.push(record.edge)
        })?;

        let mut store = Self {
            dir,
            meta,
            log,
            edges: Vec::with_capacity(edges.len()),
            keys: HashSet::new(),
            adjacency: HashMap::new(),
        };
        for edge in edges {
            // Replay tolerates duplicates left by a crash between append and index.
            if !store.keys.contains(&edge.key()) {
                store.index(edge);
            }
        }

        tracing::info!(
            shard = store.meta.shard_id,
            range = %range,
            edges = store.edges.len(),
            "Shard store opened"
        );
        Ok(store)
    }

    fn verify_or_write_meta(path: &Path, meta: &ShardMetadata) -> Result<()> {
        match std::fs::read(path) {
            Ok(bytes) => {
                let stored: ShardMetadata = serde_json::from_slice(&bytes)?;
                if &stored != meta {
                    return Err(Error::RangeMismatch {
                        stored: format!("shard{} {}", stored.shard_id, stored.range()),
                        configured: format!("shard{} {}", meta.shard_id, meta.range()),
                    });
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::write(path, serde_json::to_vec_pretty(meta)?)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn index(&mut self, edge: Edge) {
        let pos = self.edges.len();
        self.keys.insert(edge.key());
        self.adjacency.entry(edge.sender).or_default().push(pos);
        if edge.receiver != edge.sender {
            self.adjacency.entry(edge.receiver).or_default().push(pos);
        }
        self.edges.push(edge);
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metadata(&self) -> &ShardMetadata {
        &self.meta
    }

    pub fn contains(&self, key: &EdgeKey) -> bool {
        self.keys.contains(key)
    }

    /// Durably append `edge` unless its uniqueness key is already stored.
    pub fn put_if_absent(&mut self, edge: Edge) -> Result<PutOutcome> {
        if self.keys.contains(&edge.key()) {
            return Ok(PutOutcome::AlreadyExists);
        }
        self.log
            .append(&edge)
            .map_err(|e| Error::Store(format!("append failed: {}", e)))?;
        self.index(edge);
        Ok(PutOutcome::Inserted)
    }

    /// Outgoing and incoming edges of `node`, in log order.
    pub fn scan_by_node(&self, node: NodeId) -> Vec<Edge> {
        self.adjacency
            .get(&node)
            .map(|positions| positions.iter().map(|&i| self.edges[i].clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.log.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path) -> ShardStore {
        ShardStore::open(dir, 1, ShardRange::new(1, 949), WalSyncPolicy::Always).unwrap()
    }

    #[test]
    fn test_put_if_absent_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut store = open(dir.path());

        let edge = Edge::new("2024-01-01 10:00:00", 3, 7, 5);
        assert_eq!(store.put_if_absent(edge.clone()).unwrap(), PutOutcome::Inserted);
        assert_eq!(store.put_if_absent(edge).unwrap(), PutOutcome::AlreadyExists);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_scan_returns_both_directions() {
        let dir = tempdir().unwrap();
        let mut store = open(dir.path());

        store.put_if_absent(Edge::new("t1", 3, 7, 5)).unwrap();
        store.put_if_absent(Edge::new("t2", 9, 3, 1)).unwrap();
        store.put_if_absent(Edge::new("t3", 9, 7, 1)).unwrap();

        let edges = store.scan_by_node(3);
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].receiver, 7);
        assert_eq!(edges[1].sender, 9);
        assert!(store.scan_by_node(500).is_empty());
    }

    #[test]
    fn test_self_loop_indexed_once() {
        let dir = tempdir().unwrap();
        let mut store = open(dir.path());

        store.put_if_absent(Edge::new("t", 42, 42, 1)).unwrap();
        let edges = store.scan_by_node(42);
        assert_eq!(edges.len(), 1);
        assert!(edges[0].is_self_loop);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut store = open(dir.path());
            store.put_if_absent(Edge::new("t1", 3, 7, 5)).unwrap();
        }
        let mut store = open(dir.path());
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.put_if_absent(Edge::new("t1", 3, 7, 5)).unwrap(),
            PutOutcome::AlreadyExists
        );
    }

    #[test]
    fn test_range_mismatch_on_reopen() {
        let dir = tempdir().unwrap();
        drop(open(dir.path()));

        let res = ShardStore::open(
            dir.path(),
            1,
            ShardRange::new(1, 1000),
            WalSyncPolicy::Always,
        );
        assert!(matches!(res, Err(Error::RangeMismatch { .. })));
    }
}
