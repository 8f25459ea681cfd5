//! MBACSA Bench - experiment driver.
//!
//! Runs the core-operations and/or scalability experiments described by a
//! YAML configuration and writes the results as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Both experiments, results under ./results
//! mbacsa-bench --config experiments.yaml all
//!
//! # Scalability only, with 5ms +/- 2ms simulated round trips
//! mbacsa-bench --config experiments.yaml --latency-ms 5 --jitter-ms 2 scalability
//! ```
//!
//! The binary drives the in-process [`LocalAuthority`]. Deployments measuring a
//! live authorization server plug their own `DelegationClient` into the
//! library runners.

use clap::{Parser, Subcommand};
use mbacsa_bench::{
    run_core_ops, run_scalability, Error, ExperimentConfig, JsonReportWriter, LocalAuthority,
    SimulatedLatency,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mbacsa-bench")]
#[command(about = "Delegation latency and scalability experiments", long_about = None)]
struct Cli {
    /// Experiment configuration file (YAML)
    #[arg(short, long, env = "MBACSA_BENCH_CONFIG", default_value = "experiments.yaml")]
    config: PathBuf,

    /// Directory receiving the JSON result files
    #[arg(short, long, default_value = "results")]
    out_dir: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Simulated round-trip latency per protocol call, in milliseconds
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,

    /// Upper bound of random extra latency per call, in milliseconds
    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Fixed-operation latency experiment (one delegation hop)
    CoreOps,
    /// Authorization and revocation latency per chain depth
    Scalability,
    /// Run every configured experiment
    All,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.step() {
                Some(step) => error!(kind = %e.kind(), step = %step, "Experiment failed: {}", e),
                None => error!(kind = %e.kind(), "Experiment failed: {}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<(), Error> {
    let config = ExperimentConfig::from_file(&cli.config)?;
    config.validate()?;

    let client = LocalAuthority::with_latency(SimulatedLatency::new(
        Duration::from_millis(cli.latency_ms),
        Duration::from_millis(cli.jitter_ms),
    ));
    let writer = JsonReportWriter::new(&cli.out_dir);
    let options = config.chain_options();

    let wants = |command: Commands| cli.command == command || cli.command == Commands::All;

    if wants(Commands::CoreOps) {
        match &config.core_ops {
            Some(core) => {
                let report = run_core_ops(&client, core, options).await?;
                writer.write_core_ops(&report)?;
            }
            None if cli.command == Commands::CoreOps => {
                return Err(Error::InvalidConfig(
                    "core_ops section missing from configuration".to_string(),
                ));
            }
            None => info!("No core_ops section configured, skipping"),
        }
    }

    if wants(Commands::Scalability) {
        match &config.scalability {
            Some(scale) => {
                let report = run_scalability(&client, scale, options).await?;
                writer.write_scalability(&report)?;
            }
            None if cli.command == Commands::Scalability => {
                return Err(Error::InvalidConfig(
                    "scalability section missing from configuration".to_string(),
                ));
            }
            None => info!("No scalability section configured, skipping"),
        }
    }

    info!(
        protocol_calls = client.call_count(),
        out_dir = %writer.base_dir().display(),
        "All requested experiments complete"
    );
    Ok(())
}
