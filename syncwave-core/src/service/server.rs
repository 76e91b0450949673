//! HTTP server for the realtime service

use super::realtime::RealtimeService;
use crate::shutdown::ShutdownCoordinator;
use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Serves the realtime router until the coordinator signals shutdown
pub struct RealtimeServer {
    service: Arc<RealtimeService>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl RealtimeServer {
    pub fn new(service: Arc<RealtimeService>, shutdown: Arc<ShutdownCoordinator>) -> Self {
        Self { service, shutdown }
    }

    /// Connect the service and serve on `listener`. On shutdown the service
    /// disconnects first, which ends every open stream so in-flight requests
    /// can drain.
    pub async fn run(self, listener: TcpListener) -> Result<()> {
        let _guard = self.shutdown.register("realtime-server");
        self.service.connect().await?;

        let router = self.service.router();
        let addr = listener.local_addr()?;
        info!(%addr, "realtime server listening");

        let service = self.service.clone();
        let shutdown = self.shutdown.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.wait_for_shutdown().await;
                info!("stopping realtime server");
                if let Err(e) = service.disconnect().await {
                    warn!(error = %e, "disconnect during shutdown failed");
                }
            })
            .await?;

        self.service.disconnect().await?;
        info!("realtime server stopped");
        Ok(())
    }
}

/// Convenience wrapper around `RealtimeServer::run`
pub async fn serve(
    service: Arc<RealtimeService>,
    listener: TcpListener,
    shutdown: Arc<ShutdownCoordinator>,
) -> Result<()> {
    RealtimeServer::new(service, shutdown).run(listener).await
}
