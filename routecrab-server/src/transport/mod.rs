//! Inbound transports
//!
//! A transport accepts client connections and hands requests to the shared
//! [`Gateway`]. Only HTTP is provided.

pub mod http;

use crate::dispatch::Gateway;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Common interface for all transport implementations
#[async_trait]
pub trait Transport {
    /// Serve until `shutdown` is cancelled or an error occurs
    async fn start(self, gateway: Arc<Gateway>, shutdown: CancellationToken) -> Result<()>;
}

/// Cancel `shutdown` once `signal` fires
///
/// A signal listener that fails to install is logged and never fires; the
/// transports keep serving until cancelled some other way.
pub async fn cancel_on_signal<F>(signal: F, shutdown: CancellationToken)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            tracing::info!("Shutdown requested");
            shutdown.cancel();
        }
        Err(e) => {
            tracing::error!("Unable to listen for shutdown signal: {}", e);
        }
    }
}
