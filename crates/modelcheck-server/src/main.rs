//! modelcheck Server
//!
//! Fetches packaged ML model artifacts, checks their declared size, unpacks
//! them and validates them against their model family.

use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use modelcheck_server::{
    create_router, AppState, ConfigOverrides, ServiceConfig, ValidationOrchestrator,
    ValidationQueue,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "modelcheck-server")]
#[command(about = "modelcheck model artifact validation service", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MODELCHECK_CONFIG", default_value = "modelcheck.yaml")]
    config: PathBuf,

    /// Listen address
    #[arg(short = 'l', long, env = "MODELCHECK_LISTEN")]
    listen: Option<String>,

    /// Listen port
    #[arg(short = 'P', long, env = "MODELCHECK_PORT")]
    port: Option<u16>,

    /// Directory for per-request scratch directories
    #[arg(short, long, env = "MODELCHECK_SCRATCH_ROOT")]
    scratch_root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, env = "MODELCHECK_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_json);

    info!("Starting modelcheck server");

    // Load configuration
    let overrides = ConfigOverrides {
        listen: cli.listen.clone(),
        port: cli.port,
        scratch_root: cli.scratch_root.clone(),
    };
    let config = ServiceConfig::load(&cli.config, &overrides)?;
    info!("Configuration loaded successfully");
    info!("Scratch root: {:?}", config.scratch_root);
    info!("Graph isolation: {:?}", config.graph.isolation);
    info!(
        "Stage timeouts: fetch {}s, extract {}s, validate {}s",
        config.timeouts.fetch_secs, config.timeouts.extract_secs, config.timeouts.validate_secs
    );

    // Initialize metrics
    let metrics_handle = init_metrics()?;

    let orchestrator = ValidationOrchestrator::from_config(&config)?;
    let scratch = orchestrator.scratch().clone();
    scratch.prepare().await?;
    scratch.purge_stale().await?;
    info!(
        "Validators registered for: {:?}",
        orchestrator.registry().families()
    );

    let shutdown = CancellationToken::new();
    let (queue, worker) =
        ValidationQueue::start(Arc::new(orchestrator), config.queue_depth, shutdown.clone());
    let state = AppState::new(queue, scratch, metrics_handle);

    let addr = config.socket_addr()?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    // Graceful shutdown handler
    let stop_worker = shutdown.clone();
    let on_signal = async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping server...");
        stop_worker.cancel();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(on_signal)
        .await?;

    shutdown.cancel();
    if let Err(e) = worker.await {
        warn!("Validation worker ended abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("modelcheck=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modelcheck=info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "modelcheck_requests_total",
        "Total number of validation requests received"
    );
    metrics::describe_counter!(
        "modelcheck_results_total",
        "Validation results by outcome and error kind"
    );
    metrics::describe_histogram!(
        "modelcheck_stage_latency_ms",
        metrics::Unit::Milliseconds,
        "Validation stage latency in milliseconds by stage"
    );
    metrics::describe_counter!(
        "modelcheck_cleanup_failures_total",
        "Scratch directories that could not be removed"
    );
    metrics::describe_gauge!(
        "modelcheck_queue_depth",
        "Validation requests waiting for the worker"
    );

    info!("Metrics exporter initialized");
    Ok(handle)
}
