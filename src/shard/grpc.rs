//! Shard participant gRPC service
//!
//! Participant errors are reported in-band (`Vote.success = false`,
//! `Ack.success = false`) so the coordinator can tell a rejection apart
//! from a transport failure.

use crate::common::TxnRequest;
use crate::proto::shard_participant_server::{ShardParticipant, ShardParticipantServer};
use crate::proto::*;
use crate::shard::txn::ShardTransactionManager;
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub struct ShardGrpcService {
    manager: Arc<ShardTransactionManager>,
}

impl ShardGrpcService {
    pub fn new(manager: Arc<ShardTransactionManager>) -> Self {
        Self { manager }
    }

    pub fn into_server(self) -> ShardParticipantServer<Self> {
        ShardParticipantServer::new(self)
    }
}

#[tonic::async_trait]
impl ShardParticipant for ShardGrpcService {
    async fn prepare(&self, req: Request<Transaction>) -> Result<Response<Vote>, Status> {
        let txn: TxnRequest = req.into_inner().into();
        let vote = match self.manager.prepare(&txn).await {
            Ok(_) => Vote {
                success: true,
                reason: String::new(),
            },
            Err(e) => Vote {
                success: false,
                reason: e.to_string(),
            },
        };
        Ok(Response::new(vote))
    }

    async fn commit(&self, req: Request<Transaction>) -> Result<Response<Ack>, Status> {
        let txn: TxnRequest = req.into_inner().into();
        let ack = match self.manager.commit(&txn) {
            Ok(outcome) => Ack {
                success: true,
                message: format!("{:?}", outcome),
                leader_hint: String::new(),
            },
            Err(e) => Ack {
                success: false,
                message: e.to_string(),
                leader_hint: String::new(),
            },
        };
        Ok(Response::new(ack))
    }

    async fn abort(&self, req: Request<AbortRequest>) -> Result<Response<Ack>, Status> {
        let req = req.into_inner();
        let released = self
            .manager
            .abort(&req.txn_id)
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(Ack {
            success: true,
            message: if released {
                "lock released".to_string()
            } else {
                "no lock held".to_string()
            },
            leader_hint: String::new(),
        }))
    }

    async fn get_edges(&self, req: Request<NodeId>) -> Result<Response<EdgeList>, Status> {
        let node = req.into_inner().id;
        let edges = self
            .manager
            .get_edges(node)
            .map_err(|e| e.to_grpc_status())?;
        tracing::debug!(shard = self.manager.shard_id(), node, count = edges.len(), "Sending edges");
        Ok(Response::new(EdgeList {
            edges: edges.iter().map(Into::into).collect(),
        }))
    }
}
