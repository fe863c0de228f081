//! Server Module
//!
//! Binds the node's HTTP listener, registers the node in the
//! coordination store and serves until shutdown. Losing the service
//! lease is treated like a shutdown signal: a node that cannot prove
//! membership stops serving instead of lingering half-registered.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::api::create_router;
use crate::error::{CacheError, Result};
use crate::registry::{self, Registration, RegistryConfig};

/// Server construction options.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Coordination-store parameters
    pub registry: RegistryConfig,
    /// Skip service registration (standalone node)
    pub standalone: bool,
}

/// A cache node's HTTP server.
pub struct CacheServer {
    addr: String,
    svc_name: String,
    options: ServerOptions,
}

impl CacheServer {
    pub fn new(addr: &str, svc_name: &str, options: ServerOptions) -> Self {
        Self {
            addr: addr.to_string(),
            svc_name: svc_name.to_string(),
            options,
        }
    }

    /// Serves until SIGINT/SIGTERM or a lost registration, then
    /// deregisters so peers drop this node promptly.
    pub async fn run(self) -> Result<()> {
        let app = create_router();
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|e| CacheError::Internal(format!("failed to bind {}: {e}", self.addr)))?;

        let registration = if self.options.standalone {
            None
        } else {
            Some(registry::register(&self.options.registry, &self.svc_name, &self.addr).await?)
        };
        let registration = Arc::new(Mutex::new(registration));

        info!(addr = %self.addr, service = %self.svc_name, "server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(registration.clone()))
            .await
            .map_err(|e| CacheError::Internal(format!("server error: {e}")))?;

        if let Some(registration) = registration.lock().await.take() {
            if let Err(e) = registration.deregister().await {
                error!(error = %e, "failed to deregister on shutdown");
            }
        }

        info!("server shutdown complete");
        Ok(())
    }
}

/// Waits for a shutdown condition: Ctrl+C, SIGTERM, or a lease
/// keep-alive failure reported by the registry adapter.
async fn shutdown_signal(registration: Arc<Mutex<Option<Registration>>>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let lease_lost = async {
        let mut guard = registration.lock().await;
        match guard.as_mut() {
            Some(registration) => registration.failed().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        failure = lease_lost => {
            match failure {
                Some(e) => warn!(error = %e, "service registration lost, shutting down"),
                None => warn!("registration failure channel closed, shutting down"),
            }
        }
    }
}
