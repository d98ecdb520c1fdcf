//! Core graph and shard types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a graph participant.
pub type NodeId = i64;

/// Identifies a shard. Lock acquisition follows ascending `ShardId`.
pub type ShardId = u32;

/// Inclusive range of node ids owned by a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardRange {
    pub start: NodeId,
    pub end: NodeId,
}

impl ShardRange {
    pub fn new(start: NodeId, end: NodeId) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.start <= node && node <= self.end
    }

    /// A shard covers an edge if either endpoint falls in its range.
    pub fn covers(&self, node1: NodeId, node2: NodeId) -> bool {
        self.contains(node1) || self.contains(node2)
    }

    pub fn overlaps(&self, other: &ShardRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for ShardRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Static shard configuration: id, owned range and gRPC address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    pub shard_id: ShardId,
    pub range: ShardRange,
    pub address: String,
}

impl ShardDescriptor {
    pub fn new(shard_id: ShardId, range: ShardRange, address: impl Into<String>) -> Self {
        Self {
            shard_id,
            range,
            address: address.into(),
        }
    }

    pub fn name(&self) -> String {
        format!("shard{}", self.shard_id)
    }
}

/// Uniqueness key of a stored edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub timestamp: String,
    pub sender: NodeId,
    pub receiver: NodeId,
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {} -> {})", self.timestamp, self.sender, self.receiver)
    }
}

/// A directed, weighted interaction. Self-loops record user registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub sender: NodeId,
    pub receiver: NodeId,
    pub weight: i64,
    pub timestamp: String,
    pub is_self_loop: bool,
}

impl Edge {
    pub fn new(timestamp: impl Into<String>, sender: NodeId, receiver: NodeId, weight: i64) -> Self {
        Self {
            sender,
            receiver,
            weight,
            timestamp: timestamp.into(),
            is_self_loop: sender == receiver,
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            timestamp: self.timestamp.clone(),
            sender: self.sender,
            receiver: self.receiver,
        }
    }

    pub fn touches(&self, node: NodeId) -> bool {
        self.sender == node || self.receiver == node
    }
}

/// Participant-facing view of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnRequest {
    pub txn_id: String,
    pub timestamp: String,
    pub node1: NodeId,
    pub node2: NodeId,
    pub weight: i64,
}

impl TxnRequest {
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            timestamp: self.timestamp.clone(),
            sender: self.node1,
            receiver: self.node2,
        }
    }

    pub fn edge(&self) -> Edge {
        Edge::new(self.timestamp.clone(), self.node1, self.node2, self.weight)
    }
}

// === Wire conversions ===

impl From<crate::proto::Transaction> for TxnRequest {
    fn from(t: crate::proto::Transaction) -> Self {
        Self {
            txn_id: t.txn_id,
            timestamp: t.timestamp,
            node1: t.node1,
            node2: t.node2,
            weight: t.weight,
        }
    }
}

impl From<&TxnRequest> for crate::proto::Transaction {
    fn from(t: &TxnRequest) -> Self {
        Self {
            timestamp: t.timestamp.clone(),
            node1: t.node1,
            node2: t.node2,
            weight: t.weight,
            txn_id: t.txn_id.clone(),
        }
    }
}

impl From<&TxnRequest> for crate::proto::AbortRequest {
    fn from(t: &TxnRequest) -> Self {
        Self {
            timestamp: t.timestamp.clone(),
            node1: t.node1,
            node2: t.node2,
            txn_id: t.txn_id.clone(),
        }
    }
}

impl From<&Edge> for crate::proto::Edge {
    fn from(e: &Edge) -> Self {
        Self {
            node1: e.sender,
            node2: e.receiver,
            weight: e.weight,
            timestamp: e.timestamp.clone(),
            is_self_loop: e.is_self_loop,
        }
    }
}

impl From<crate::proto::Edge> for Edge {
    fn from(e: crate::proto::Edge) -> Self {
        Self {
            sender: e.node1,
            receiver: e.node2,
            weight: e.weight,
            timestamp: e.timestamp,
            is_self_loop: e.is_self_loop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_bounds_inclusive() {
        let range = ShardRange::new(1, 949);
        assert!(range.contains(1));
        assert!(range.contains(949));
        assert!(!range.contains(950));
        assert!(!range.contains(0));
    }

    #[test]
    fn test_self_loop_flag() {
        assert!(Edge::new("t", 42, 42, 1).is_self_loop);
        assert!(!Edge::new("t", 3, 7, 5).is_self_loop);
    }

    #[test]
    fn test_overlap() {
        let a = ShardRange::new(1, 949);
        assert!(a.overlaps(&ShardRange::new(900, 1000)));
        assert!(!a.overlaps(&ShardRange::new(950, 1899)));
    }
}
