//! gRPC-backed channels
//!
//! Channels connect lazily, so a shard or peer that is down at startup only
//! fails the calls made while it is unreachable.

use super::{CommitAck, PeerChannel, PrepareVote, ShardChannel};
use crate::common::{Edge, Error, NodeId, Result, TxnRequest};
use crate::proto::consensus_client::ConsensusClient;
use crate::proto::shard_participant_client::ShardParticipantClient;
use crate::proto::{
    AbortRequest, AppendEntriesRequest, AppendEntriesResponse, Transaction, VoteRequest,
    VoteResponse,
};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

fn lazy_channel(addr: &str) -> Result<Channel> {
    let endpoint = Endpoint::from_shared(addr.to_string())
        .map_err(|e| Error::InvalidConfig(format!("bad address {}: {}", addr, e)))?
        .connect_timeout(CONNECT_TIMEOUT);
    Ok(endpoint.connect_lazy())
}

fn transport_error(addr: &str, status: tonic::Status) -> Error {
    match status.code() {
        tonic::Code::Unavailable | tonic::Code::Unknown => {
            Error::ConnectionFailed(format!("{}: {}", addr, status.message()))
        }
        tonic::Code::DeadlineExceeded | tonic::Code::Cancelled => {
            Error::Timeout(format!("{}: {}", addr, status.message()))
        }
        _ => Error::Grpc(status),
    }
}

#[derive(Clone)]
pub struct GrpcShardChannel {
    addr: String,
    client: ShardParticipantClient<Channel>,
}

impl GrpcShardChannel {
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        let client = ShardParticipantClient::new(lazy_channel(&addr)?);
        Ok(Self { addr, client })
    }
}

#[tonic::async_trait]
impl ShardChannel for GrpcShardChannel {
    async fn prepare(&self, txn: &TxnRequest) -> Result<PrepareVote> {
        let mut client = self.client.clone();
        let vote = client
            .prepare(Transaction::from(txn))
            .await
            .map_err(|s| transport_error(&self.addr, s))?
            .into_inner();
        Ok(if vote.success {
            PrepareVote::Yes
        } else {
            PrepareVote::No(vote.reason)
        })
    }

    async fn commit(&self, txn: &TxnRequest) -> Result<CommitAck> {
        let mut client = self.client.clone();
        let ack = client
            .commit(Transaction::from(txn))
            .await
            .map_err(|s| transport_error(&self.addr, s))?
            .into_inner();
        Ok(if ack.success {
            CommitAck::Written
        } else {
            CommitAck::Failed(ack.message)
        })
    }

    async fn abort(&self, txn: &TxnRequest) -> Result<()> {
        let mut client = self.client.clone();
        client
            .abort(AbortRequest::from(txn))
            .await
            .map_err(|s| transport_error(&self.addr, s))?;
        Ok(())
    }

    async fn get_edges(&self, node: NodeId) -> Result<Vec<Edge>> {
        let mut client = self.client.clone();
        let list = client
            .get_edges(crate::proto::NodeId { id: node })
            .await
            .map_err(|s| transport_error(&self.addr, s))?
            .into_inner();
        Ok(list.edges.into_iter().map(Edge::from).collect())
    }
}

#[derive(Clone)]
pub struct GrpcPeerChannel {
    addr: String,
    client: ConsensusClient<Channel>,
}

impl GrpcPeerChannel {
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        let client = ConsensusClient::new(lazy_channel(&addr)?);
        Ok(Self { addr, client })
    }
}

#[tonic::async_trait]
impl PeerChannel for GrpcPeerChannel {
    async fn request_vote(&self, req: VoteRequest) -> Result<VoteResponse> {
        let mut client = self.client.clone();
        Ok(client
            .request_vote(req)
            .await
            .map_err(|s| transport_error(&self.addr, s))?
            .into_inner())
    }

    async fn append_entries(&self, req: AppendEntriesRequest) -> Result<AppendEntriesResponse> {
        let mut client = self.client.clone();
        Ok(client
            .append_entries(req)
            .await
            .map_err(|s| transport_error(&self.addr, s))?
            .into_inner())
    }
}
