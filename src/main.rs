//! StatusWatch - endpoint health monitoring service.
//!
//! Probes registered HTTP and TCP targets on a per-target interval, keeps a
//! bounded history per target and pushes changes to WebSocket subscribers.

mod config;
mod db;
mod notify;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use db::Store;
use notify::Notifier;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("statuswatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting StatusWatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Create scheduler
    let notifier = Notifier::default();
    let scheduler = Arc::new(Scheduler::new(store.clone(), notifier.clone())?);

    // Start scheduler
    scheduler.start().await?;

    // Start web server; returns after Ctrl-C
    let server = Server::new(cfg, store, scheduler.clone(), notifier);
    server.start().await?;

    scheduler.stop_all().await;
    tracing::info!("StatusWatch stopped");

    Ok(())
}
