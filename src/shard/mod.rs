//! Shard participant
//!
//! A shard owns a contiguous range of node ids and stores every edge whose
//! transaction it took part in:
//! - Append-only, checksummed edge log for durability
//! - Idempotent writes keyed by `(timestamp, sender, receiver)`
//! - Prepare/Commit/Abort under a single exclusive shard lock

pub mod grpc;
pub mod log;
pub mod server;
pub mod store;
pub mod txn;

pub use server::ShardServer;
pub use store::{PutOutcome, ShardStore};
pub use txn::{PrepareOutcome, ShardTransactionManager, DEFAULT_PREPARED_TTL};
