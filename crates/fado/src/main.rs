use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use fado::config::Config;
use fado::engine::platforms_from_config;
use fado::engine::DevicePlatform;
use fado::engine::Engine;
use fado::engine::EngineSettings;
use fado::engine::PlatformRouter;
use fado::storage::JsonFileStorage;
use fado::storage::MemoryStorage;
use fado::storage::Storage;
use tokio::sync::mpsc;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Bounded channel size for platform notifications
const CHANNEL_SIZE: usize = 1024;

/// Time given to platforms to report their lights before stale brightness
/// records are dropped
const DISCOVERY_SETTLE_TIME: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(version, about = "Smooth brightness and color fades for smart lights")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "fado.toml")]
    config: PathBuf,
}

fn init_tracing(config: &Config) {
    let filter = config.logging.overrides.iter().fold(
        Targets::new().with_default(LevelFilter::from(config.logging.level)),
        |filter, (target, level)| filter.with_target(target.clone(), LevelFilter::from(*level)),
    );

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    init_tracing(&config);

    info!("fado starting");
    info!("Loaded config from: {}", cli.config.display());

    let storage: Arc<dyn Storage> = match &config.fade.storage_path {
        Some(path) => {
            info!("Brightness memory persisted to {}", path.display());
            Arc::new(JsonFileStorage::new(path))
        }
        None => {
            warn!("No fade.storage_path configured, brightness memory will not survive restarts");
            Arc::new(MemoryStorage::new())
        }
    };

    let router = Arc::new(PlatformRouter::new(platforms_from_config(&config)));
    if router.is_empty() {
        warn!("No device platforms configured");
    }

    let engine = Arc::new(
        Engine::new(router.clone(), storage, EngineSettings::from_config(&config))
            .await
            .context("Failed to load brightness memory")?,
    );

    let (tx, rx) = mpsc::channel(CHANNEL_SIZE);
    let engine_task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(rx).await }
    });

    if let Err(e) = router.setup(tx).await {
        error!("Failed to set up device platforms: {}", e);
    }

    let prune_task = tokio::spawn({
        let engine = engine.clone();
        async move {
            tokio::time::sleep(DISCOVERY_SETTLE_TIME).await;
            let dropped = engine.prune_stale_records().await;
            info!("Startup prune dropped {} stale brightness records", dropped);
        }
    });

    let api = config.api.clone().map(|api_config| {
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let engine = engine.clone();
        let task = tokio::spawn(async move {
            if let Err(e) =
                fado::api::serve(engine, api_config.listen, api_config.port, shutdown_rx).await
            {
                error!("HTTP API server failed: {:#}", e);
            }
        });
        (shutdown_tx, task)
    });

    info!("Press Ctrl+C to exit");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    prune_task.abort();
    if let Some((shutdown_tx, task)) = api {
        let _ = shutdown_tx.send(());
        if let Err(e) = task.await {
            warn!("HTTP API task failed: {}", e);
        }
    }

    engine.shutdown().await;
    if let Err(e) = router.shutdown().await {
        error!("Error shutting down device platforms: {}", e);
    }
    engine_task.abort();

    info!("fado shutdown complete");
    Ok(())
}
