use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use humantime::parse_duration;
use objstash_service::config::Config as ObjstashConfig;

mod logging;
mod stresstest;
mod workloads;

use stresstest::perform_stresstest;
use workloads::WorkloadsConfig;

/// Command line interface parser.
#[derive(Parser)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long = "config", short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the workload definition file.
    #[arg(long = "workloads", short = 'w', value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long = "duration", short = 'd', value_parser = parse_duration)]
    duration: Duration,

    /// Enable logging, with all output discarded.
    #[arg(long)]
    tracing: bool,

    /// Report metrics to a local sink, or the configured statsd server.
    #[arg(long)]
    metrics: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // parse configs
    let workloads_file =
        std::fs::File::open(&cli.workloads).context("failed to open workloads file")?;
    let workloads: WorkloadsConfig =
        serde_yaml::from_reader(workloads_file).context("failed to parse workloads YAML")?;

    let service_config = ObjstashConfig::get(cli.config.as_deref())?;

    let logging = logging::Config {
        backtraces: service_config.logging.enable_backtraces,
        tracing: cli.tracing,
        metrics: cli.metrics,
    };
    // SAFETY: No other threads have been spawned yet.
    let mut guard = unsafe { logging::init(logging, &service_config.metrics) }?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    if let Some(udp_sink) = guard.udp_sink.take() {
        runtime.spawn(udp_sink);
    }

    runtime.block_on(perform_stresstest(service_config, workloads, cli.duration))
}
