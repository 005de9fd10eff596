//! Clipper worker binary.

use clipper_worker::{config_path, load_config, Worker, WorkerConfig, CONFIG_ENV};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let path = config_path(std::env::args().nth(1), std::env::var(CONFIG_ENV).ok());
    let config = match &path {
        Some(path) => load_config(path)?,
        None => WorkerConfig::default(),
    };

    // Initialize tracing; RUST_LOG wins over the config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.worker.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &path {
        Some(path) => tracing::info!(path = %path, "Loaded configuration"),
        None => tracing::info!("No configuration file given, using defaults"),
    }

    let worker = Worker::new(config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await;
    tracing::info!("Clipper worker stopped");

    Ok(())
}
