//! Shard participant binary

use anyhow::Result;
use clap::Parser;
use socialgraph::common::{Config, ShardConfig, ShardRange, WalSyncPolicy};
use socialgraph::ShardServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "socialgraph-shard")]
#[command(about = "socialgraph shard - stores the edges of one node-id range")]
struct Args {
    /// First node id owned by this shard (inclusive)
    range_start: i64,

    /// Last node id owned by this shard (inclusive)
    range_end: i64,

    /// gRPC port to listen on
    port: u16,

    /// Shard id (also names the data subdirectory). Derived from the range
    /// or port when omitted
    #[arg(long)]
    shard_id: Option<u32>,

    /// Data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Edge log sync policy (always, interval, never)
    #[arg(long)]
    wal_sync: Option<WalSyncPolicy>,

    /// How long Prepare waits for the shard lock
    #[arg(long)]
    lock_wait_ms: Option<u64>,

    /// Age at which an unresolved prepared lock is reclaimed
    #[arg(long)]
    prepared_ttl_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let file_config = Config::load(args.config.as_deref())?;

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| file_config.log_level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let shard_config = shard_config(&args, file_config.shard);
    ShardServer::new(shard_config).serve().await?;
    Ok(())
}

/// File values first, CLI has priority.
fn shard_config(args: &Args, file: Option<ShardConfig>) -> ShardConfig {
    let range = ShardRange::new(args.range_start, args.range_end);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let mut config = match file {
        Some(mut conf) => {
            conf.range = range;
            conf.grpc_addr = addr;
            conf
        }
        None => ShardConfig::new(ShardConfig::default_id_for(range, args.port), range, addr),
    };
    if let Some(id) = args.shard_id {
        config.shard_id = id;
    }
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(policy) = args.wal_sync {
        config.wal_sync = policy;
    }
    if let Some(ms) = args.lock_wait_ms {
        config.lock_wait_timeout_ms = ms;
    }
    if let Some(ms) = args.prepared_ttl_ms {
        config.prepared_ttl_ms = ms;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("socialgraph-shard").chain(argv.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_positional_args_pick_distinct_shards() {
        let first = shard_config(&parse(&["1", "949", "50052"]), None);
        let second = shard_config(&parse(&["950", "1899", "50053"]), None);

        assert_eq!(first.shard_id, 1);
        assert_eq!(second.shard_id, 2);
        assert_eq!(second.range, ShardRange::new(950, 1899));
        assert_eq!(second.grpc_addr.port(), 50053);
        assert_ne!(first.store_dir(), second.store_dir());
    }

    #[test]
    fn test_flags_override_file_config() {
        let file = ShardConfig::new(7, ShardRange::new(1, 10), "0.0.0.0:1".parse().unwrap());
        let args = parse(&[
            "950",
            "1899",
            "50053",
            "--shard-id",
            "4",
            "--wal-sync",
            "never",
            "--lock-wait-ms",
            "100",
        ]);
        let config = shard_config(&args, Some(file));
        assert_eq!(config.shard_id, 4);
        assert_eq!(config.range, ShardRange::new(950, 1899));
        assert_eq!(config.wal_sync, WalSyncPolicy::Never);
        assert_eq!(config.lock_wait_timeout_ms, 100);
    }

    #[test]
    fn test_wrong_arity_is_rejected() {
        assert!(Args::try_parse_from(["socialgraph-shard", "1", "949"]).is_err());
    }
}
