//! Healthwatch - runs every stored probe until interrupted.

use healthwatch::{Engine, EngineConfig, StorageBackend};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("healthwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = EngineConfig::load();
    match cfg.storage {
        StorageBackend::Sqlite => tracing::info!("Using database at {}", cfg.db_path),
        StorageBackend::Memory => tracing::info!("Using in-memory storage"),
    }

    let engine = Engine::open(&cfg)?;
    tracing::info!("Storage initialized successfully");

    engine.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    engine.shutdown().await;

    Ok(())
}
