//! Wire messages and generated gRPC services.
//!
//! The message structs are plain `prost` types; `build.rs` generates the
//! `SocialGraph`, `ShardParticipant` and `Consensus` client/server modules
//! against them.

/// A write request for a single directed edge.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Transaction {
    #[prost(string, tag = "1")]
    pub timestamp: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub node1: i64,
    #[prost(int64, tag = "3")]
    pub node2: i64,
    #[prost(int64, tag = "4")]
    pub weight: i64,
    /// Scopes the shard's prepared lock. Empty on client `InsertData` calls.
    #[prost(string, tag = "5")]
    pub txn_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AbortRequest {
    #[prost(string, tag = "1")]
    pub timestamp: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub node1: i64,
    #[prost(int64, tag = "3")]
    pub node2: i64,
    #[prost(string, tag = "4")]
    pub txn_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ack {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    /// Set on `NotLeader` rejections.
    #[prost(string, tag = "3")]
    pub leader_hint: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Vote {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub reason: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeId {
    #[prost(int64, tag = "1")]
    pub id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Edge {
    #[prost(int64, tag = "1")]
    pub node1: i64,
    #[prost(int64, tag = "2")]
    pub node2: i64,
    #[prost(int64, tag = "3")]
    pub weight: i64,
    #[prost(string, tag = "4")]
    pub timestamp: ::prost::alloc::string::String,
    #[prost(bool, tag = "5")]
    pub is_self_loop: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EdgeList {
    #[prost(message, repeated, tag = "1")]
    pub edges: ::prost::alloc::vec::Vec<Edge>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoteRequest {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(string, tag = "2")]
    pub candidate_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoteResponse {
    #[prost(bool, tag = "1")]
    pub vote_granted: bool,
    #[prost(uint64, tag = "2")]
    pub term: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppendEntriesRequest {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(string, tag = "2")]
    pub leader_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppendEntriesResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(uint64, tag = "2")]
    pub term: u64,
}

include!(concat!(env!("OUT_DIR"), "/socialgraph.SocialGraph.rs"));
include!(concat!(env!("OUT_DIR"), "/socialgraph.ShardParticipant.rs"));
include!(concat!(env!("OUT_DIR"), "/socialgraph.Consensus.rs"));
