//! Command-line interface for sensor-loadgen
//!
//! # Usage Examples
//!
//! ```bash
//! # Ten sensors against a SASL/SCRAM cluster for five minutes
//! KAFKA_BOOTSTRAP=kafka:9092 SASL_USER=locust-user SASL_PASSWORD=secret \
//!   sensor-loadgen --users 10 --spawn-rate 2 --run-time 5m
//!
//! # Local broker without auth, create the topic first, keep the summary
//! sensor-loadgen --brokers localhost:9092 --security-protocol PLAINTEXT \
//!   --create-topic --partitions 6 \
//!   --users 100 --pacing 50ms --run-time 60s \
//!   --metrics-output results.json
//!
//! # Exercise the pipeline without a broker
//! RUST_LOG=info sensor-loadgen --dry-run --users 50 --run-time 10s
//! ```

use clap::Parser;
use sensor_loadgen::{report, run_load, Cli};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let metrics_output = cli.load.metrics_output.clone();

    let summary = run_load(cli).await?;
    println!("{}", report::format_table(&summary));

    if let Some(path) = metrics_output {
        report::write_json(&summary, &path)?;
        info!("Metrics written to {}", path.display());
    }

    Ok(())
}
