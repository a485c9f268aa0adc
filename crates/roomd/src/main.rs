//! roomd - RoomGossip room directory daemon
//!
//! This daemon serves the rooms published on this node and keeps a
//! replicated view of every other node's rooms through gossip.

use clap::Parser;
use roomd::config::Config;
use roomd::server::Server;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let config = Config::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roomd=info"));
    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    info!(
        "roomd v{} - RoomGossip Directory Daemon",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    // Create and run server
    let server = match Server::new(config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("Failed to initialize server: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Install signal handler
    let signal_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_server.shutdown();
    });

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    let stats = server.stats();
    info!(
        "Final stats: {} room(s), {} peer(s), {} reconciliation(s), {} imported, {} failed",
        stats.room_count,
        stats.peer_count,
        stats.reconcile.runs,
        stats.reconcile.imported,
        stats.reconcile.failures
    );

    ExitCode::SUCCESS
}
