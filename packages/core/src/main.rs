use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tokio::signal;
use tokio::sync::{watch, RwLock};

use load_probe::api::{self, ProbesApiState};
use load_probe::cli::Cli;
use load_probe::config::Config;
use load_probe::db;
use load_probe::error::AppError;
use load_probe::logging::init_logging;
use load_probe::metrics::AppMetrics;
use load_probe::probe::ProbeInvoker;
use load_probe::repository::ProbeRepository;
use load_probe::scheduler::{run_probe_loop, CapacityLedger, LoopSettings};

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    if let Err(err) = run(Cli::parse()).await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = Config::from_env()
        .and_then(|config| config.apply_cli(&cli))
        .map_err(AppError::Config)?;
    tracing::info!("Service starting with config: {:?}", config);

    let pool = db::create_pool(&config.database_url).await?;
    let metrics = Arc::new(AppMetrics::new()?);
    let repository = Arc::new(ProbeRepository::new(pool));
    let invoker = Arc::new(ProbeInvoker::new(config.dialect).with_metrics(metrics.clone()));
    let ledger = Arc::new(RwLock::new(CapacityLedger::new()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => {
                tracing::error!("Cannot listen for Ctrl+C: {}", err);
                // Keep the sender alive so nothing reads this as a shutdown.
                std::future::pending::<()>().await;
            }
        }
    });

    let probe_loop = tokio::spawn(run_probe_loop(
        repository.clone(),
        invoker.clone(),
        ledger.clone(),
        Some(metrics.clone()),
        LoopSettings {
            default_capacity: config.default_capacity,
            idle_interval: config.idle_interval,
        },
        shutdown_requested(shutdown_rx.clone()),
    ));

    if config.admin_api_key.is_none() {
        tracing::warn!("ADMIN_API_KEY is not set; manual probe triggers are disabled");
    }

    let app = api::create_router(
        Arc::new(ProbesApiState {
            repository,
            invoker,
            ledger,
            admin_key: config.admin_api_key.clone(),
        }),
        metrics,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_requested(shutdown_rx))
        .await?;

    if let Err(err) = probe_loop.await {
        tracing::error!("Admission loop task failed: {}", err);
    }
    tracing::info!("Service stopped");
    Ok(())
}

async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|requested| *requested).await;
}
