use anyhow::Context;
use foodsafe_indexer::{Indexer, IndexerConfig, Projection};
use foodsafe_ledger::{Config as LedgerConfig, Ledger};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = IndexerConfig::from_env().context("Failed to load configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_target(false);
    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting FoodSafe Indexer...");

    // Open the ledger
    let mut ledger_config = match &config.ledger.config_file {
        Some(path) => LedgerConfig::from_file(path).context("Failed to load ledger configuration")?,
        None => LedgerConfig::from_env().context("Failed to load ledger configuration")?,
    };
    if let Some(dir) = &config.ledger.data_dir {
        ledger_config.data_dir = dir.into();
    }
    let ledger = Arc::new(Ledger::open(ledger_config).await.context("Failed to open ledger")?);

    info!("Ledger opened");

    // Open the projection
    let projection = Projection::connect(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to projection database")?;

    let mut indexer = Indexer::new(ledger.clone(), projection.clone(), config.sync.clone())
        .await
        .context("Failed to initialise indexer")?;

    let status = indexer.status().await?;
    info!(
        head_block = status.head_block,
        checkpoint = status.checkpoint,
        lag = status.lag,
        "Resuming sync"
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    let result = indexer.run(shutdown).await;
    drop(indexer);

    projection.close().await;
    match Arc::try_unwrap(ledger) {
        Ok(ledger) => ledger.shutdown().await?,
        Err(_) => error!("Ledger still referenced at shutdown"),
    }

    result?;
    info!("FoodSafe Indexer stopped");
    Ok(())
}
