//! Coordinator transaction log
//!
//! Ordered, append-only record of every transaction the coordinator ran.
//! The most recent `retained` records are kept in memory for the status
//! API; when a path is configured every status transition is also appended
//! to a JSON-lines file, which is the complete audit record.

use crate::common::{Error, NodeId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub const DEFAULT_RETAINED: usize = 10_000;

/// Coordinator-side transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TxnStatus {
    Pending,
    Prepared,
    Committed,
    /// Commit landed on some shards but not all.
    CommittedPartial,
    /// Prepared everywhere but no shard managed to commit.
    Failed,
    Aborted,
}

impl TxnStatus {
    /// Transitions are monotonic; a finished transaction is never reopened.
    pub fn can_transition_to(self, next: TxnStatus) -> bool {
        use TxnStatus::*;
        matches!(
            (self, next),
            (Pending, Prepared)
                | (Pending, Aborted)
                | (Prepared, Committed)
                | (Prepared, CommittedPartial)
                | (Prepared, Failed)
        )
    }

    pub fn is_final(self) -> bool {
        !matches!(self, TxnStatus::Pending | TxnStatus::Prepared)
    }
}

impl std::fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxnStatus::Pending => "pending",
            TxnStatus::Prepared => "prepared",
            TxnStatus::Committed => "committed",
            TxnStatus::CommittedPartial => "committed-partial",
            TxnStatus::Failed => "failed",
            TxnStatus::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

/// One transaction as tracked by the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnRecord {
    pub id: String,
    pub timestamp: String,
    pub node1: NodeId,
    pub node2: NodeId,
    pub weight: i64,
    pub shards: Vec<u32>,
    pub status: TxnStatus,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One line of the audit file
#[derive(Debug, Serialize)]
struct TransitionLine<'a> {
    at: DateTime<Utc>,
    id: &'a str,
    status: TxnStatus,
    node1: NodeId,
    node2: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

pub struct TransactionLog {
    records: Mutex<VecDeque<TxnRecord>>,
    retained: usize,
    total: AtomicU64,
    file: Option<Mutex<File>>,
}

impl Default for TransactionLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl TransactionLog {
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            retained: DEFAULT_RETAINED,
            total: AtomicU64::new(0),
            file: None,
        }
    }

    /// Keep at most `retained` records in memory, dropping the oldest.
    pub fn with_retention(mut self, retained: usize) -> Self {
        self.retained = retained.max(1);
        self
    }

    /// Also append transitions to `path`.
    pub fn with_file(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some(Mutex::new(file)),
            ..Self::in_memory()
        })
    }

    fn records(&self) -> std::sync::MutexGuard<'_, VecDeque<TxnRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_line(&self, record: &TxnRecord) {
        let Some(file) = &self.file else {
            return;
        };
        let line = TransitionLine {
            at: record.updated_at,
            id: &record.id,
            status: record.status,
            node1: record.node1,
            node2: record.node2,
            detail: record.detail.as_deref(),
        };
        match serde_json::to_string(&line) {
            Ok(json) => {
                if let Ok(mut f) = file.lock() {
                    if let Err(e) = writeln!(f, "{}", json) {
                        tracing::warn!(txn_id = %record.id, "Failed to append transaction log: {}", e);
                    }
                }
            }
            Err(e) => tracing::warn!(txn_id = %record.id, "Failed to encode transaction log line: {}", e),
        }
    }

    /// Append a new pending transaction.
    pub fn begin(
        &self,
        id: String,
        timestamp: String,
        node1: NodeId,
        node2: NodeId,
        weight: i64,
        shards: Vec<u32>,
    ) -> TxnRecord {
        let now = Utc::now();
        let record = TxnRecord {
            id,
            timestamp,
            node1,
            node2,
            weight,
            shards,
            status: TxnStatus::Pending,
            detail: None,
            created_at: now,
            updated_at: now,
        };
        {
            let mut records = self.records();
            records.push_back(record.clone());
            while records.len() > self.retained {
                records.pop_front();
            }
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        self.write_line(&record);
        record
    }

    /// Move transaction `id` to `status`.
    pub fn transition(&self, id: &str, status: TxnStatus, detail: Option<String>) -> Result<()> {
        let updated = {
            let mut records = self.records();
            let record = records
                .iter_mut()
                .rev()
                .find(|r| r.id == id)
                .ok_or_else(|| Error::Internal(format!("unknown transaction {}", id)))?;
            if !record.status.can_transition_to(status) {
                return Err(Error::Internal(format!(
                    "illegal transition {} -> {} for {}",
                    record.status, status, id
                )));
            }
            record.status = status;
            record.detail = detail;
            record.updated_at = Utc::now();
            record.clone()
        };
        self.write_line(&updated);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<TxnRecord> {
        self.records().iter().rev().find(|r| r.id == id).cloned()
    }

    pub fn last(&self) -> Option<TxnRecord> {
        self.records().back().cloned()
    }

    /// Every retained record, oldest first.
    pub fn entries(&self) -> Vec<TxnRecord> {
        self.records().iter().cloned().collect()
    }

    /// The newest `limit` records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<TxnRecord> {
        let records = self.records();
        let skip = records.len().saturating_sub(limit);
        records.iter().skip(skip).cloned().collect()
    }

    /// Transactions started since the coordinator came up, including
    /// records no longer retained.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}
