//! Shard server

use crate::common::{Result, ShardConfig};
use crate::shard::grpc::ShardGrpcService;
use crate::shard::txn::ShardTransactionManager;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::TcpListenerStream;

pub struct ShardServer {
    config: ShardConfig,
}

impl ShardServer {
    pub fn new(config: ShardConfig) -> Self {
        Self { config }
    }

    pub fn open_manager(&self) -> Result<Arc<ShardTransactionManager>> {
        Ok(Arc::new(ShardTransactionManager::open(
            self.config.store_dir(),
            self.config.shard_id,
            self.config.range,
            self.config.wal_sync,
            self.config.lock_wait_timeout(),
        )?
        .with_prepared_ttl(self.config.prepared_ttl())))
    }

    pub async fn serve(self) -> Result<()> {
        self.config.validate()?;
        let listener = TcpListener::bind(self.config.grpc_addr).await?;
        self.serve_with_listener(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve_with_listener(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        tracing::info!("Starting shard server: shard{}", self.config.shard_id);
        tracing::info!("  Node range: {}", self.config.range);
        tracing::info!("  gRPC API: {}", listener.local_addr()?);
        tracing::info!("  Data path: {}", self.config.store_dir().display());

        let manager = self.open_manager()?;
        let grpc_service = ShardGrpcService::new(manager.clone());
        let sweeper = spawn_lock_sweeper(manager.clone());

        tracing::info!("✓ Shard server ready");

        tonic::transport::Server::builder()
            .add_service(grpc_service.into_server())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await?;

        sweeper.abort();
        manager.sync()?;
        tracing::info!("Shard server stopped");
        Ok(())
    }
}

/// Periodically reclaim prepared locks whose Commit/Abort never came.
fn spawn_lock_sweeper(manager: Arc<ShardTransactionManager>) -> JoinHandle<()> {
    let period = (manager.prepared_ttl() / 4).max(Duration::from_millis(10));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = manager.reclaim_expired() {
                tracing::error!(shard = manager.shard_id(), "Prepared lock sweep failed: {}", e);
            }
        }
    })
}

pub(crate) async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
