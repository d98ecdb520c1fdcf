//! # socialgraph
//!
//! A sharded, directed, weighted social-interaction graph with:
//! - Node-id range shards, each with a checksummed append-only edge log
//! - Two-phase commit for edges whose endpoints live on different shards
//! - Leader election among coordinator replicas (only the leader writes)
//! - gRPC for clients, shards and consensus, HTTP for status
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Coordinator Replicas            │
//! │  (leader election, heartbeats)          │
//! │   - Leader: runs 2PC                    │
//! │   - Followers: reject writes            │
//! └───────────┬─────────────────────────────┘
//!             │ gRPC (Prepare / Commit / Abort)
//!   ┌─────────┴──────────┐
//!   │                    │
//! ┌─▼──────────┐   ┌─────▼──────┐
//! │ Shard 1     │   │ Shard 2    │
//! │ 1..=949     │   │ 950..=1899 │
//! │ + edge log  │   │ + edge log │
//! └─────────────┘   └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the shards
//! ```bash
//! socialgraph-shard 1 949 50052 --shard-id 1
//! socialgraph-shard 950 1899 50053 --shard-id 2
//! ```
//!
//! ### Start a coordinator
//! ```bash
//! socialgraph-coord serve \
//!   --id coord-1 \
//!   --grpc 0.0.0.0:50051 \
//!   --http 0.0.0.0:8080 \
//!   --peer coord-2=http://10.0.0.2:50051 \
//!   --peer coord-3=http://10.0.0.3:50051
//! ```

pub mod common;
pub mod coordinator;
pub mod proto;
pub mod rpc;
pub mod shard;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::{Coordinator, CoordinatorServer};
pub use shard::ShardServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
