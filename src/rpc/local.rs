//! In-process channels
//!
//! Used to run a whole cluster inside one process: shards are called
//! directly and consensus nodes are reached through a [`LocalNetwork`]
//! registry that can disconnect nodes to simulate crashes and partitions.

use super::{CommitAck, PeerChannel, PrepareVote, ShardChannel};
use crate::common::{Edge, Error, NodeId, Result, TxnRequest};
use crate::coordinator::consensus::ConsensusModule;
use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::shard::txn::ShardTransactionManager;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

pub struct LocalShardChannel {
    manager: Arc<ShardTransactionManager>,
}

impl LocalShardChannel {
    pub fn new(manager: Arc<ShardTransactionManager>) -> Self {
        Self { manager }
    }
}

#[tonic::async_trait]
impl ShardChannel for LocalShardChannel {
    async fn prepare(&self, txn: &TxnRequest) -> Result<PrepareVote> {
        Ok(match self.manager.prepare(txn).await {
            Ok(_) => PrepareVote::Yes,
            Err(e) => PrepareVote::No(e.to_string()),
        })
    }

    async fn commit(&self, txn: &TxnRequest) -> Result<CommitAck> {
        Ok(match self.manager.commit(txn) {
            Ok(_) => CommitAck::Written,
            Err(e) => CommitAck::Failed(e.to_string()),
        })
    }

    async fn abort(&self, txn: &TxnRequest) -> Result<()> {
        self.manager.abort(&txn.txn_id)?;
        Ok(())
    }

    async fn get_edges(&self, node: NodeId) -> Result<Vec<Edge>> {
        self.manager.get_edges(node)
    }
}

/// Registry of in-process consensus nodes
#[derive(Default)]
pub struct LocalNetwork {
    nodes: RwLock<HashMap<String, Arc<ConsensusModule>>>,
    down: RwLock<HashSet<String>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, module: Arc<ConsensusModule>) {
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.insert(module.node_id().to_string(), module);
        }
    }

    /// Make `id` unreachable in both directions.
    pub fn disconnect(&self, id: &str) {
        if let Ok(mut down) = self.down.write() {
            down.insert(id.to_string());
        }
    }

    pub fn reconnect(&self, id: &str) {
        if let Ok(mut down) = self.down.write() {
            down.remove(id);
        }
    }

    pub fn is_up(&self, id: &str) -> bool {
        self.down.read().map(|d| !d.contains(id)).unwrap_or(false)
    }

    /// Channel from `from` to `to`.
    pub fn channel(self: &Arc<Self>, from: &str, to: &str) -> LocalPeerChannel {
        LocalPeerChannel {
            network: self.clone(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    fn route(&self, from: &str, to: &str) -> Result<Arc<ConsensusModule>> {
        if !self.is_up(from) || !self.is_up(to) {
            return Err(Error::ConnectionFailed(format!("{} -> {}: link down", from, to)));
        }
        self.nodes
            .read()
            .ok()
            .and_then(|nodes| nodes.get(to).cloned())
            .ok_or_else(|| Error::ConnectionFailed(format!("{}: unknown node", to)))
    }
}

pub struct LocalPeerChannel {
    network: Arc<LocalNetwork>,
    from: String,
    to: String,
}

#[tonic::async_trait]
impl PeerChannel for LocalPeerChannel {
    async fn request_vote(&self, req: VoteRequest) -> Result<VoteResponse> {
        let target = self.network.route(&self.from, &self.to)?;
        Ok(target.handle_request_vote(req))
    }

    async fn append_entries(&self, req: AppendEntriesRequest) -> Result<AppendEntriesResponse> {
        let target = self.network.route(&self.from, &self.to)?;
        Ok(target.handle_append_entries(req))
    }
}
