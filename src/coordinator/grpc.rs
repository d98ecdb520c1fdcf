//! Coordinator gRPC services
//!
//! `SocialGraph` is the public API used by loaders and clients. `Consensus`
//! carries RequestVote/AppendEntries between coordinator replicas.
//!
//! InsertData answers in-band: a rejected or aborted write is an `Ack` with
//! `success = false`, and `leader_hint` is filled on `NotLeader`.

use crate::common::Error;
use crate::coordinator::consensus::ConsensusModule;
use crate::coordinator::engine::Coordinator;
use crate::proto::consensus_server::{Consensus, ConsensusServer};
use crate::proto::social_graph_server::{SocialGraph, SocialGraphServer};
use crate::proto::*;
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub struct SocialGraphService {
    coordinator: Arc<Coordinator>,
}

impl SocialGraphService {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    pub fn into_server(self) -> SocialGraphServer<Self> {
        SocialGraphServer::new(self)
    }
}

#[tonic::async_trait]
impl SocialGraph for SocialGraphService {
    async fn insert_data(&self, req: Request<Transaction>) -> Result<Response<Ack>, Status> {
        let tx = req.into_inner();
        let ack = match self
            .coordinator
            .insert_data(tx.timestamp, tx.node1, tx.node2, tx.weight)
            .await
        {
            Ok(outcome) => Ack {
                success: true,
                message: outcome.message(),
                leader_hint: String::new(),
            },
            Err(Error::NotLeader(leader)) => Ack {
                success: false,
                message: format!("Not the leader, retry against {}", leader),
                leader_hint: leader,
            },
            Err(e) => Ack {
                success: false,
                message: format!("Transaction aborted: {}", e),
                leader_hint: String::new(),
            },
        };
        Ok(Response::new(ack))
    }

    async fn get_edges(&self, req: Request<NodeId>) -> Result<Response<EdgeList>, Status> {
        let node = req.into_inner().id;
        let edges = self.coordinator.get_edges(node).await;
        Ok(Response::new(EdgeList {
            edges: edges.iter().map(Into::into).collect(),
        }))
    }
}

pub struct ConsensusService {
    consensus: Arc<ConsensusModule>,
}

impl ConsensusService {
    pub fn new(consensus: Arc<ConsensusModule>) -> Self {
        Self { consensus }
    }

    pub fn into_server(self) -> ConsensusServer<Self> {
        ConsensusServer::new(self)
    }
}

#[tonic::async_trait]
impl Consensus for ConsensusService {
    async fn request_vote(
        &self,
        req: Request<VoteRequest>,
    ) -> Result<Response<VoteResponse>, Status> {
        Ok(Response::new(
            self.consensus.handle_request_vote(req.into_inner()),
        ))
    }

    async fn append_entries(
        &self,
        req: Request<AppendEntriesRequest>,
    ) -> Result<Response<AppendEntriesResponse>, Status> {
        Ok(Response::new(
            self.consensus.handle_append_entries(req.into_inner()),
        ))
    }
}
