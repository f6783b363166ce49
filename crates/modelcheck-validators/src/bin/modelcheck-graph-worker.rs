//! Graph worker
//!
//! Loads one SavedModel serving graph and prints a single JSON report on
//! stdout. Spawned once per validation by the server so the memory of the load
//! is released when this process exits.

use anyhow::Result;
use clap::Parser;
use modelcheck_validators::WorkerReport;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "modelcheck-graph-worker")]
#[command(about = "Load a SavedModel graph and report the outcome", long_about = None)]
struct Cli {
    /// Extracted SavedModel export directory
    model_dir: PathBuf,

    /// Meta graph tag (repeat for multi-tag graphs)
    #[arg(long = "tag", default_value = "serve")]
    tags: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    info!("Loading {:?} with tags {:?}", cli.model_dir, cli.tags);
    let report = WorkerReport::from_load(&cli.model_dir, &cli.tags);

    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

/// Initialize tracing on stderr; stdout carries the report
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("modelcheck=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modelcheck=warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
