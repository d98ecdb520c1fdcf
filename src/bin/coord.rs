//! Coordinator binary

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use socialgraph::common::{Config, PeerConfig, ShardDescriptor, ShardRange};
use socialgraph::CoordinatorServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "socialgraph-coord")]
#[command(about = "socialgraph coordinator with leader election and two-phase commit")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a coordinator replica
    Serve {
        /// Replica id
        #[arg(long)]
        id: Option<String>,

        /// Bind address for gRPC (public API and consensus)
        #[arg(long)]
        grpc: Option<SocketAddr>,

        /// Bind address for the HTTP status API
        #[arg(long)]
        http: Option<SocketAddr>,

        /// Consensus peer as id=url (repeatable)
        #[arg(long = "peer", value_parser = parse_peer)]
        peers: Vec<PeerConfig>,

        /// Shard as id=start:end@url (repeatable, replaces the default table)
        #[arg(long = "shard", value_parser = parse_shard)]
        shards: Vec<ShardDescriptor>,

        /// Append transaction transitions to this JSON-lines file
        #[arg(long)]
        txn_log: Option<PathBuf>,

        /// Log level (trace, debug, info, warn, error)
        #[arg(long)]
        log_level: Option<String>,

        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn parse_peer(s: &str) -> Result<PeerConfig, String> {
    let (id, address) = s
        .split_once('=')
        .ok_or_else(|| format!("expected id=url, got {:?}", s))?;
    Ok(PeerConfig {
        id: id.to_string(),
        address: address.to_string(),
    })
}

fn parse_shard(s: &str) -> Result<ShardDescriptor, String> {
    let parse = || -> anyhow::Result<ShardDescriptor> {
        let (id, rest) = s.split_once('=').ok_or_else(|| anyhow!("missing '='"))?;
        let (range, address) = rest.split_once('@').ok_or_else(|| anyhow!("missing '@'"))?;
        let (start, end) = range.split_once(':').ok_or_else(|| anyhow!("missing ':'"))?;
        Ok(ShardDescriptor::new(
            id.parse().context("shard id")?,
            ShardRange::new(start.parse().context("range start")?, end.parse().context("range end")?),
            address,
        ))
    };
    parse().map_err(|e| format!("expected id=start:end@url, got {:?}: {:#}", s, e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            grpc,
            http,
            peers,
            shards,
            txn_log,
            log_level,
            config,
        } => {
            // Load config from file, then override with CLI arguments
            let file_config = Config::load(config.as_deref())?;
            let log_level = log_level.unwrap_or_else(|| file_config.log_level.clone());
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| log_level.into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let mut coord_config = file_config.coordinator.unwrap_or_default();
            if let Some(id) = id {
                coord_config.node_id = id;
            }
            if let Some(grpc) = grpc {
                coord_config.grpc_addr = grpc;
            }
            if http.is_some() {
                coord_config.http_addr = http;
            }
            if !peers.is_empty() {
                coord_config.peers = peers;
            }
            if !shards.is_empty() {
                coord_config.shards = shards;
            }
            if txn_log.is_some() {
                coord_config.txn_log_path = txn_log;
            }

            CoordinatorServer::new(coord_config).serve().await?;
        }
    }

    Ok(())
}
