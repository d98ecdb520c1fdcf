//! Coordinator replica
//!
//! A coordinator replica is responsible for:
//! - Leader election among replicas (only the leader accepts writes)
//! - Routing edges to shards by node-id range
//! - Write orchestration (2PC with shards)
//! - The transaction log and the read fan-out for edge queries

pub mod consensus;
pub mod engine;
pub mod grpc;
pub mod http;
pub mod routing;
pub mod server;
pub mod txlog;

pub use consensus::{ConsensusModule, NodeState, Peer, RoleSnapshot};
pub use engine::{Coordinator, InsertOutcome, ShardHandle};
pub use routing::ShardRouter;
pub use server::CoordinatorServer;
pub use txlog::{TransactionLog, TxnRecord, TxnStatus};
