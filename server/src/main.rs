//! Ratekeeper Binary
//!
//! Runs the HTTP API, the update worker, or both.

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ratekeeper_fx::build_rate_source;
use ratekeeper_ledger::{create_db_pool, Repository};
use ratekeeper_server::{app_router, LogFormat, RateService, RateUpdateWorker, ServerConfig};

#[derive(Parser)]
#[command(name = "ratekeeper", version, about = "Exchange rate update service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Serve the HTTP API
    Api,
    /// Run the update worker
    Worker,
    /// Apply database migrations and exit
    Migrate,
    /// Serve the API and run the worker in one process
    All,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    // Load configuration
    let config = ServerConfig::from_env()?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    init_tracing(&config);
    info!("Starting Ratekeeper");

    let pool = create_db_pool(&config.database_url, config.database_max_connections)
        .await
        .context("failed to open database")?;
    if cli.command == Command::Migrate {
        info!("Migrations complete");
        return Ok(());
    }

    let repository = Repository::new(pool);

    match cli.command {
        Command::Api => serve_api(&config, repository).await?,
        Command::Worker => {
            let worker = build_worker(&config, repository)?;
            let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = shutdown_tx.send(()).await;
            });
            worker.run(shutdown_rx).await;
        }
        Command::All => {
            let worker = build_worker(&config, repository.clone())?;
            let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
            let worker_task = tokio::spawn(async move { worker.run(shutdown_rx).await });

            let served = serve_api(&config, repository).await;
            let _ = shutdown_tx.send(()).await;
            worker_task.await.context("worker task failed")?;
            served?;
        }
        Command::Migrate => {}
    }

    info!("Ratekeeper shutdown complete");
    Ok(())
}

fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn build_worker(config: &ServerConfig, repository: Repository) -> anyhow::Result<RateUpdateWorker> {
    let source = build_rate_source(&config.rate_source).context("failed to build rate source")?;
    Ok(RateUpdateWorker::new(repository, source, config.worker.clone()))
}

async fn serve_api(config: &ServerConfig, repository: Repository) -> anyhow::Result<()> {
    let service = RateService::new(repository, config.supported_currencies.iter().cloned());
    let app = app_router(service, config.request_timeout);

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;
    info!(addr = %config.bind_addr(), "API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
