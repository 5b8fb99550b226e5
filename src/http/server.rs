//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router around the proxy handler
//! - Wire up middleware (request tracing)
//! - Serve plain HTTP or HTTPS on the bound listener
//! - Drain in-flight requests on shutdown, bounded by the grace period

use std::path::Path;
use std::time::Duration;

use axum::Router;
use axum_server::Handle;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::http::proxy::{proxy_handler, AppState};
use crate::http::request::TargetError;
use crate::lifecycle::shutdown;
use crate::net::tls::{load_tls_config, TlsError};

/// Error type for building and running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid upstream target: {0}")]
    Target(#[from] TargetError),
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    pub fn new(config: ProxyConfig, state: AppState) -> Self {
        let router = build_router(state);
        Self { router, config }
    }

    /// Run the server on `listener` until `shutdown_rx` fires and in-flight
    /// requests drain (or the grace period runs out).
    pub async fn run(
        self,
        listener: std::net::TcpListener,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);

        let handle = Handle::new();
        tokio::spawn({
            let handle = handle.clone();
            async move {
                shutdown::recv(shutdown_rx).await;
                tracing::info!(
                    grace_secs = grace.as_secs(),
                    connections = handle.connection_count(),
                    "Draining connections"
                );
                handle.graceful_shutdown(Some(grace));
            }
        });

        let app = self.router.into_make_service();
        match &self.config.listener.tls {
            Some(tls) => {
                let rustls =
                    load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
                tracing::info!(address = %addr, "HTTPS server starting");
                axum_server::from_tcp_rustls(listener, rustls)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
            None => {
                tracing::info!(address = %addr, "HTTP server starting");
                axum_server::from_tcp(listener)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Every path and method goes to the proxy handler.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
