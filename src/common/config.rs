//! Configuration for socialgraph components

use crate::common::types::{ShardDescriptor, ShardId, ShardRange};
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides, e.g. `SOCIALGRAPH__LOG_LEVEL=debug`.
pub const ENV_PREFIX: &str = "SOCIALGRAPH";

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator-specific config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorConfig>,

    /// Shard-specific config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load from an optional TOML file, then apply `SOCIALGRAPH__*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

/// A consensus peer (another coordinator replica).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: String,
    pub address: String,
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Unique replica id
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Bind address for the public and consensus gRPC services
    #[serde(default = "default_coord_grpc_addr")]
    pub grpc_addr: SocketAddr,

    /// Bind address for the HTTP status API (disabled if unset)
    #[serde(default)]
    pub http_addr: Option<SocketAddr>,

    /// Shard table
    #[serde(default = "default_shards")]
    pub shards: Vec<ShardDescriptor>,

    /// Other coordinator replicas
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Per-call timeout for Prepare/Commit/Abort/GetEdges
    #[serde(default = "default_shard_rpc_timeout")]
    pub shard_rpc_timeout_ms: u64,

    /// Append each transaction transition to this JSON-lines file
    #[serde(default)]
    pub txn_log_path: Option<PathBuf>,

    /// Transactions kept in memory for the status API
    #[serde(default = "default_txn_log_retained")]
    pub txn_log_retained: usize,
}

fn default_node_id() -> String {
    "coord-1".to_string()
}
const DEFAULT_COORDINATOR_PORT: u16 = 50051;

fn default_coord_grpc_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_COORDINATOR_PORT))
}
fn default_shards() -> Vec<ShardDescriptor> {
    vec![
        ShardDescriptor::new(1, ShardRange::new(1, 949), "http://127.0.0.1:50052"),
        ShardDescriptor::new(2, ShardRange::new(950, 1899), "http://127.0.0.1:50053"),
    ]
}
fn default_shard_rpc_timeout() -> u64 {
    2_000
}
fn default_txn_log_retained() -> usize {
    10_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            grpc_addr: default_coord_grpc_addr(),
            http_addr: None,
            shards: default_shards(),
            peers: Vec::new(),
            consensus: ConsensusConfig::default(),
            shard_rpc_timeout_ms: default_shard_rpc_timeout(),
            txn_log_path: None,
            txn_log_retained: default_txn_log_retained(),
        }
    }
}

impl CoordinatorConfig {
    pub fn shard_rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.shard_rpc_timeout_ms)
    }

    /// Check the shard table and timing parameters.
    ///
    /// Shard ranges must not overlap and, sorted by start, must leave no gaps.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(Error::InvalidConfig("node_id must not be empty".into()));
        }
        if self.shards.is_empty() {
            return Err(Error::InvalidConfig("at least one shard is required".into()));
        }

        let mut ids = HashSet::new();
        for shard in &self.shards {
            if !ids.insert(shard.shard_id) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate shard id {}",
                    shard.shard_id
                )));
            }
            if shard.range.start > shard.range.end {
                return Err(Error::InvalidConfig(format!(
                    "shard {} has empty range {}",
                    shard.shard_id, shard.range
                )));
            }
        }

        let mut ranges: Vec<ShardRange> = self.shards.iter().map(|s| s.range).collect();
        ranges.sort_by_key(|r| r.start);
        for pair in ranges.windows(2) {
            if pair[0].overlaps(&pair[1]) {
                return Err(Error::InvalidConfig(format!(
                    "shard ranges {} and {} overlap",
                    pair[0], pair[1]
                )));
            }
            if pair[0].end.checked_add(1) != Some(pair[1].start) {
                return Err(Error::InvalidConfig(format!(
                    "gap between shard ranges {} and {}",
                    pair[0], pair[1]
                )));
            }
        }

        if self.peers.iter().any(|p| p.id == self.node_id) {
            return Err(Error::InvalidConfig(
                "peer list must not contain this node".into(),
            ));
        }

        self.consensus.validate()
    }
}

/// Leader election timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_election_timeout_min")]
    pub election_timeout_min_ms: u64,

    #[serde(default = "default_election_timeout_max")]
    pub election_timeout_max_ms: u64,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Timeout for a single RequestVote/AppendEntries call
    #[serde(default = "default_consensus_rpc_timeout")]
    pub rpc_timeout_ms: u64,
}

fn default_election_timeout_min() -> u64 {
    150
}
fn default_election_timeout_max() -> u64 {
    300
}
fn default_heartbeat_interval() -> u64 {
    50
}
fn default_consensus_rpc_timeout() -> u64 {
    100
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: default_election_timeout_min(),
            election_timeout_max_ms: default_election_timeout_max(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            rpc_timeout_ms: default_consensus_rpc_timeout(),
        }
    }
}

impl ConsensusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err(Error::InvalidConfig(
                "election_timeout_min_ms must be below election_timeout_max_ms".into(),
            ));
        }
        if self.heartbeat_interval_ms == 0
            || self.heartbeat_interval_ms >= self.election_timeout_min_ms
        {
            return Err(Error::InvalidConfig(
                "heartbeat_interval_ms must be positive and below election_timeout_min_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Votes are collected for at most one minimum election timeout.
    pub fn vote_window(&self) -> Duration {
        Duration::from_millis(self.election_timeout_min_ms)
    }
}

/// Sync policy for the shard's edge log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalSyncPolicy {
    /// fsync after every append
    #[default]
    Always,
    /// Flush to the OS after every append
    Interval,
    /// Leave buffering to the writer
    Never,
}

impl std::str::FromStr for WalSyncPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(WalSyncPolicy::Always),
            "interval" => Ok(WalSyncPolicy::Interval),
            "never" => Ok(WalSyncPolicy::Never),
            other => Err(Error::InvalidConfig(format!("unknown sync policy: {}", other))),
        }
    }
}

/// Shard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    pub shard_id: ShardId,

    pub range: ShardRange,

    /// Bind address for the participant gRPC service
    pub grpc_addr: SocketAddr,

    /// Directory holding `edges.log` and `shard_meta.json`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub wal_sync: WalSyncPolicy,

    /// How long Prepare waits for the shard lock before rejecting
    #[serde(default = "default_lock_wait")]
    pub lock_wait_timeout_ms: u64,

    /// Age at which a prepared lock with no Commit/Abort is reclaimed
    #[serde(default = "default_prepared_ttl")]
    pub prepared_ttl_ms: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_lock_wait() -> u64 {
    2_000
}
fn default_prepared_ttl() -> u64 {
    30_000
}

impl ShardConfig {
    pub fn new(shard_id: ShardId, range: ShardRange, grpc_addr: SocketAddr) -> Self {
        Self {
            shard_id,
            range,
            grpc_addr,
            data_dir: default_data_dir(),
            wal_sync: WalSyncPolicy::default(),
            lock_wait_timeout_ms: default_lock_wait(),
            prepared_ttl_ms: default_prepared_ttl(),
        }
    }

    /// Shard id for a shard started without an explicit one: the id of the
    /// default table entry with the same range, else one per port above the
    /// coordinator's.
    pub fn default_id_for(range: ShardRange, port: u16) -> ShardId {
        CoordinatorConfig::default()
            .shards
            .iter()
            .find(|s| s.range == range)
            .map(|s| s.shard_id)
            .unwrap_or_else(|| match port.checked_sub(DEFAULT_COORDINATOR_PORT) {
                Some(offset) if offset > 0 => ShardId::from(offset),
                _ => 1,
            })
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }

    pub fn prepared_ttl(&self) -> Duration {
        Duration::from_millis(self.prepared_ttl_ms)
    }

    /// Per-shard store directory, e.g. `./data/shard1`.
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join(format!("shard{}", self.shard_id))
    }

    pub fn validate(&self) -> Result<()> {
        if self.prepared_ttl_ms <= self.lock_wait_timeout_ms {
            return Err(Error::InvalidConfig(
                "prepared_ttl_ms must exceed lock_wait_timeout_ms".into(),
            ));
        }
        if self.range.start > self.range.end {
            return Err(Error::InvalidConfig(format!(
                "range start {} is after range end {}",
                self.range.start, self.range.end
            )));
        }
        Ok(())
    }
}
