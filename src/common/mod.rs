//! Common utilities and types shared across socialgraph

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;
pub mod utils;

pub use config::{
    Config, ConsensusConfig, CoordinatorConfig, PeerConfig, ShardConfig, WalSyncPolicy,
};
pub use error::{Error, Result};
pub use metrics::CoordinatorMetrics;
pub use types::{Edge, EdgeKey, NodeId, ShardDescriptor, ShardId, ShardRange, TxnRequest};
pub use utils::{crc32, with_timeout};
