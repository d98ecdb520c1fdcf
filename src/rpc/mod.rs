//! Remote procedure channels
//!
//! The coordinator talks to shards through [`ShardChannel`] and to other
//! coordinator replicas through [`PeerChannel`]. Both return explicit
//! `Result`s: `Ok` carries the remote's answer (which may itself be a
//! rejection), `Err` means the call did not complete.

pub mod grpc;
pub mod local;

use crate::common::{Edge, NodeId, Result, TxnRequest};
use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};

pub use grpc::{GrpcPeerChannel, GrpcShardChannel};
pub use local::{LocalNetwork, LocalPeerChannel, LocalShardChannel};

/// A shard's answer to Prepare
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareVote {
    Yes,
    No(String),
}

/// A shard's answer to Commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitAck {
    Written,
    Failed(String),
}

#[tonic::async_trait]
pub trait ShardChannel: Send + Sync {
    async fn prepare(&self, txn: &TxnRequest) -> Result<PrepareVote>;

    async fn commit(&self, txn: &TxnRequest) -> Result<CommitAck>;

    async fn abort(&self, txn: &TxnRequest) -> Result<()>;

    async fn get_edges(&self, node: NodeId) -> Result<Vec<Edge>>;
}

#[tonic::async_trait]
pub trait PeerChannel: Send + Sync {
    async fn request_vote(&self, req: VoteRequest) -> Result<VoteResponse>;

    async fn append_entries(&self, req: AppendEntriesRequest) -> Result<AppendEntriesResponse>;
}
