//! Fault tolerance demo.
//!
//! Runs the coffee shop endpoints through the policy engine and prints the
//! breaker states at the end.
//!
//! ```text
//! fault-tolerance [--config policies.toml] [--seed N] [--requests N] <scenario>
//!
//!   catalog          retry: 4 retries over ~50% random failures
//!   recommendations  timeout + fallback: 250 ms deadline over 0-500 ms delays
//!   availability     circuit breaker: threshold 4 over a 2-ok/2-fail pattern
//!   all              every scenario, in that order
//! ```

mod scenarios;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use fault_tolerance::config::{load_config, parse_config};
use fault_tolerance::observability::{logging, metrics};
use fault_tolerance::PolicyRuntime;

use crate::scenarios::CoffeeShop;

const DEFAULT_POLICIES: &str = include_str!("../policies.toml");

#[derive(Parser)]
#[command(name = "fault-tolerance")]
#[command(about = "Exercise retry, timeout, circuit breaker and fallback policies", long_about = None)]
struct Cli {
    /// Policy file; the bundled policies.toml is used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for injected faults and delays.
    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Requests per scenario.
    #[arg(short, long, default_value_t = 10)]
    requests: u32,

    /// Pause between requests, in milliseconds.
    #[arg(short, long, default_value_t = 0)]
    interval_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retry over random failures
    Catalog,
    /// Timeout with fallback over random delays
    Recommendations,
    /// Circuit breaker over a fixed failure pattern
    Availability,
    /// Run every scenario
    All,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => parse_config(DEFAULT_POLICIES)?,
    };

    logging::init_logging(&config.observability)?;
    tracing::info!("fault-tolerance v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let runtime = PolicyRuntime::new(config)?;
    let shop = CoffeeShop::new(cli.seed);
    let interval = Duration::from_millis(cli.interval_ms);

    tracing::info!(
        seed = cli.seed,
        requests = cli.requests,
        interval_ms = cli.interval_ms,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Catalog => scenarios::run_catalog(&shop, &runtime, cli.requests, interval).await,
        Commands::Recommendations => {
            scenarios::run_recommendations(&shop, &runtime, cli.requests, interval).await
        }
        Commands::Availability => {
            scenarios::run_availability(&shop, &runtime, cli.requests, interval).await
        }
        Commands::All => {
            scenarios::run_catalog(&shop, &runtime, cli.requests, interval).await;
            scenarios::run_recommendations(&shop, &runtime, cli.requests, interval).await;
            scenarios::run_availability(&shop, &runtime, cli.requests, interval).await;
        }
    }

    println!("{}", serde_json::to_string_pretty(&runtime.registry().snapshot())?);

    tracing::info!("Shutdown complete");
    Ok(())
}
