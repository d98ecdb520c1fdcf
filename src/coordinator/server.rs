//! Coordinator server

use crate::common::{CoordinatorConfig, CoordinatorMetrics, Error, Result};
use crate::coordinator::consensus::{ConsensusModule, NodeState, Peer};
use crate::coordinator::engine::{Coordinator, ShardHandle};
use crate::coordinator::grpc::{ConsensusService, SocialGraphService};
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::txlog::TransactionLog;
use crate::rpc::{GrpcPeerChannel, GrpcShardChannel};
use crate::shard::server::shutdown_signal;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;

pub struct CoordinatorServer {
    config: CoordinatorConfig,
}

impl CoordinatorServer {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    /// Wire consensus and 2PC to the configured peers and shards over gRPC.
    pub fn build(&self) -> Result<Arc<Coordinator>> {
        let metrics = Arc::new(CoordinatorMetrics::new());

        let mut peers = Vec::with_capacity(self.config.peers.len());
        for peer in &self.config.peers {
            let channel = GrpcPeerChannel::new(peer.address.clone())?;
            peers.push(Peer::new(peer.id.clone(), Arc::new(channel)));
        }
        let consensus = Arc::new(
            ConsensusModule::new(
                self.config.node_id.clone(),
                peers,
                self.config.consensus.clone(),
            )
            .with_metrics(metrics.clone()),
        );

        let mut shards = Vec::with_capacity(self.config.shards.len());
        for descriptor in &self.config.shards {
            let channel = GrpcShardChannel::new(descriptor.address.clone())?;
            shards.push(ShardHandle::new(descriptor.clone(), Arc::new(channel)));
        }

        let log = match &self.config.txn_log_path {
            Some(path) => TransactionLog::with_file(path)?,
            None => TransactionLog::in_memory(),
        }
        .with_retention(self.config.txn_log_retained);

        Ok(Arc::new(
            Coordinator::new(shards, consensus, self.config.shard_rpc_timeout())
                .with_log(log)
                .with_metrics(metrics),
        ))
    }

    pub async fn serve(self) -> Result<()> {
        self.config.validate()?;
        let grpc_listener = TcpListener::bind(self.config.grpc_addr).await?;
        let http_listener = match self.config.http_addr {
            Some(addr) => Some(TcpListener::bind(addr).await?),
            None => None,
        };
        self.serve_with_listener(grpc_listener, http_listener, shutdown_signal())
            .await
    }

    /// Serve on already bound listeners until `shutdown` resolves.
    pub async fn serve_with_listener(
        self,
        grpc_listener: TcpListener,
        http_listener: Option<TcpListener>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        tracing::info!("Starting coordinator: {}", self.config.node_id);
        tracing::info!("  gRPC API: {}", grpc_listener.local_addr()?);
        if let Some(l) = &http_listener {
            tracing::info!("  HTTP API: {}", l.local_addr()?);
        }
        tracing::info!("  Peers: {}", self.config.peers.len());
        for shard in &self.config.shards {
            tracing::info!("  {}: {} at {}", shard.name(), shard.range, shard.address);
        }

        let coordinator = self.build()?;
        let consensus = coordinator.consensus().clone();
        let role_logger = spawn_role_logger(&consensus);
        let consensus_handle = consensus.start();

        let grpc_server = tonic::transport::Server::builder()
            .add_service(SocialGraphService::new(coordinator.clone()).into_server())
            .add_service(ConsensusService::new(consensus.clone()).into_server())
            .serve_with_incoming(TcpListenerStream::new(grpc_listener));

        let http_state = CoordState {
            coordinator: coordinator.clone(),
        };
        let http_server = async move {
            match http_listener {
                Some(listener) => axum::serve(listener, create_router(http_state))
                    .await
                    .map_err(Error::from),
                None => std::future::pending().await,
            }
        };

        tracing::info!("✓ Coordinator ready ({})", consensus.role());

        tokio::select! {
            res = grpc_server => {
                if let Err(e) = res {
                    tracing::error!("gRPC server error: {}", e);
                }
            }
            res = http_server => {
                if let Err(e) = res {
                    tracing::error!("HTTP server error: {}", e);
                }
            }
            _ = shutdown => {
                tracing::info!("Shutdown requested");
            }
        }

        consensus.shutdown();
        if let Err(e) = consensus_handle.await {
            tracing::warn!("Consensus task ended abnormally: {}", e);
        }
        role_logger.abort();
        tracing::info!("Coordinator stopped");
        Ok(())
    }
}

/// Log each gain or loss of leadership.
pub fn spawn_role_logger(consensus: &Arc<ConsensusModule>) -> JoinHandle<()> {
    let mut rx = consensus.subscribe();
    let node = consensus.node_id().to_string();
    tokio::spawn(async move {
        let mut was_leader = false;
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            let is_leader = snapshot.role == NodeState::Leader;
            if is_leader && !was_leader {
                tracing::info!(node = %node, term = snapshot.term, "Became leader, accepting writes");
            } else if !is_leader && was_leader {
                tracing::info!(node = %node, term = snapshot.term, leader = ?snapshot.leader_id, "Lost leadership, rejecting writes");
            }
            was_leader = is_leader;
        }
    })
}
