//! # Twins Server
//!
//! Hosts the twins service over the in-memory collaborators: loads config,
//! sets up logging, restores routing and drains the local broker queue until
//! a shutdown signal arrives.
//!
//! The queue is the ingress point for transport adapters. An adapter takes a
//! handle from [`LocalBroker::sender`](lib_twins::connections::LocalBroker::sender)
//! and pushes each inbound telemetry [`Message`](lib_twins::Message) into it;
//! the delivery loop hands it to the subscribed twin pipeline. No adapter is
//! bundled, so a bare server only serves the twins API surface.

use std::path::PathBuf;

use anyhow::Result;
use lib_twins::connections::memory_service;
use lib_twins::loggers;
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod twins_logic;
use twins_logic::config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config()?;

    let log_dir = config.twins.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"));
    let log_level = config.twins.log_level.clone().unwrap_or_else(|| "info".to_string());
    let log_path = loggers::setup_logging("server_twins", &log_dir, &log_level)?;
    log::info!("Logging to {}", log_path.display());
    if config.tokens.is_empty() {
        log::warn!("No access tokens configured, every twins operation will be rejected.");
    }

    let (service, backend) = memory_service(config.tokens.clone(), &config.twins);
    let routes = service.restore().await?;
    log::info!("Twins service ready with {} routes", routes);

    let cancel = CancellationToken::new();
    let broker = backend.broker.clone();
    log::info!("Broker ingress queue open for transport adapters");
    let broker_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { broker.run(cancel).await }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    cancel.cancel();
    let delivered = broker_handle.await?;

    log::info!("Shutdown complete after delivering {} messages.", delivered);
    Ok(())
}
