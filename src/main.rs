//! logxy
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!                    │                    logxy                     │
//!   Caller request   │  ┌────────┐   ┌─────────┐   ┌────────────┐   │
//!   ─────────────────┼─▶│ server │──▶│  proxy  │──▶│ connector  │───┼──▶ Upstream
//!                    │  └────────┘   │ handler │   │ DNS/TCP/TLS│   │
//!                    │               └────┬────┘   └────────────┘   │
//!   Caller response  │   instrumented     │   phase timer           │
//!   ◀────────────────┼── response body ◀──┘                         │
//!                    │        │                                     │
//!                    │        ▼                                     │
//!                    │  access record → tracing / metrics           │
//!                    └──────────────────────────────────────────────┘
//! ```

use std::net::TcpListener;
use std::sync::Arc;

use clap::Parser;

use logxy::cli::Cli;
use logxy::lifecycle::{wait_for_signal, Shutdown};
use logxy::observability::{logging, metrics, TracingSink};
use logxy::{AppState, HttpServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config()?;

    logging::init_logging(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "logxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        target = %config.upstream.target,
        tls = config.listener.tls.is_some(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let state = AppState::new(&config, Arc::new(TracingSink))?;

    let listener = TcpListener::bind(&config.listener.bind_address)?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        tracing::info!(signal, "Shutdown signal received");
        shutdown.trigger();
    });

    HttpServer::new(config, state).run(listener, shutdown_rx).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
