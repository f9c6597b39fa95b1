//! Extender HTTP Server
//!
//! Binds the extender router and serves it until the shutdown token fires.

use super::rest::{log_routes, ExtenderRouter};
use crate::cache::LedgerMetrics;
use crate::error::{Error, Result};
use crate::scheduler::SchedulingContext;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Extender HTTP server
pub struct ApiServer {
    addr: SocketAddr,
    ctx: Arc<SchedulingContext>,
    metrics: Arc<LedgerMetrics>,
}

impl ApiServer {
    pub fn new(addr: SocketAddr, ctx: Arc<SchedulingContext>, metrics: Arc<LedgerMetrics>) -> Self {
        Self { addr, ctx, metrics }
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let app = ExtenderRouter::new(self.ctx, self.metrics).build();

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind extender server: {}", e)))?;
        info!("Extender API listening on {}", self.addr);
        log_routes();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Extender API shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("Extender server error: {}", e)))?;

        Ok(())
    }
}
