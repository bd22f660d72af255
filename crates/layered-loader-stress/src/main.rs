use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

mod logging;
mod stresstest;
mod workloads;

use stresstest::perform_stresstest;
use workloads::WorkloadsConfig;

/// Command line interface parser.
#[derive(Parser)]
struct Cli {
    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Redis server used by workloads that enable the `redis` layer.
    #[arg(long, value_name = "URL")]
    redis: Option<String>,

    /// Whether to send all logs through `tracing`.
    #[arg(long)]
    tracing: bool,

    /// Whether to report metrics to a local statsd sink.
    #[arg(long)]
    metrics: bool,

    /// Sentry DSN that captured errors are sent to.
    #[arg(long, value_name = "DSN")]
    sentry_dsn: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // parse configs
    let workloads_file =
        std::fs::File::open(&cli.workloads).context("failed to open workloads file")?;
    let workloads: WorkloadsConfig =
        serde_yaml::from_reader(workloads_file).context("failed to parse workloads YAML")?;

    let mut logging_guard = logging::init(logging::Config {
        sentry_dsn: cli.sentry_dsn,
        tracing: cli.tracing,
        metrics: cli.metrics,
    })?;

    if let Some(udp_sink) = logging_guard.udp_sink.take() {
        tokio::spawn(udp_sink);
    }

    perform_stresstest(workloads, cli.duration, cli.redis.as_deref()).await
}
