//! Fairpot Server
//!
//! Hosts the configured tables and serves their feed over WebSocket.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fairpot::{
    network::FeedServer,
    FairpotConfig, TableManager, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = FairpotConfig::from_env();

    info!("Fairpot Server v{}", VERSION);
    info!(
        "Rounds: {}s countdown, {} participants to start, {} items max",
        config.table.countdown_secs, config.table.min_participants, config.table.max_items
    );
    match &config.randomness.beacon_url {
        Some(url) => info!("Random seed beacon: {}", url),
        None => warn!("Random seed beacon disabled, every round settles with reduced assurance"),
    }
    if !config.server.operator_enabled() {
        warn!("No operator token configured, deposits and operator commands are disabled");
    }

    let tables = Arc::new(TableManager::new(config.table.clone(), config.randomness.clone()));
    for table_id in &config.server.tables {
        tables.create_table(table_id).await;
    }

    let server = FeedServer::new(config.server.clone(), tables.clone());
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            let _ = shutdown.send(());
        }
    });

    server.run().await.context("feed server failed")?;

    tables.shutdown().await;
    info!("Fairpot Server stopped");
    Ok(())
}
