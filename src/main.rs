//! ring-relay - Main Entry Point
//!
//! Seeds a ring of worker stages with the first primes, lets every prime
//! travel around the ring once per unit of its counter, and prints what comes
//! out of the result sink.
//!
//! # Usage
//!
//! ```bash
//! ring-relay
//! ring-relay --stages 4 --mailbox 2 --results 1 --count 25
//! ring-relay --config relay.toml --json
//! RUST_LOG=ring_relay=trace ring-relay --log-file relay.log
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use crossbeam_channel::Receiver;
use ring_relay::{
    config::RelayConfig,
    pipeline::{Dispatcher, StageAction, StageEvent, TerminationPolicy},
    source::prime_items,
};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Bounded-mailbox worker ring fed with primes
#[derive(Parser, Debug)]
#[command(name = "ring-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of stages in the ring
    #[arg(short = 'n', long)]
    stages: Option<usize>,

    /// Capacity of every stage mailbox
    #[arg(short = 'k', long)]
    mailbox: Option<usize>,

    /// Capacity of the result sink
    #[arg(short = 'r', long)]
    results: Option<usize>,

    /// How many primes to submit
    #[arg(short = 'm', long)]
    count: Option<usize>,

    /// What happens to items whose counter reaches zero
    #[arg(long, value_enum)]
    policy: Option<Policy>,

    /// Print results and the run report as JSON lines
    #[arg(long)]
    json: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(short, long, default_value = "info,ring_relay=debug")]
    log_level: String,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Policy {
    Deliver,
    Discard,
}

impl From<Policy> for TerminationPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Deliver => TerminationPolicy::Deliver,
            Policy::Discard => TerminationPolicy::Discard,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(&cli.log_level, cli.log_file.as_deref())?;

    let config = load_config(&cli)?;
    run(&config, cli.json)
}

/// Initialize the tracing subscriber. The returned guard flushes the log file
/// on drop.
fn init_logging(level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("{} is not a file path", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Config file (if any) first, then command line overrides.
fn load_config(cli: &Cli) -> Result<RelayConfig> {
    let mut config = match &cli.config {
        Some(path) => RelayConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RelayConfig::default(),
    };

    if let Some(stages) = cli.stages {
        config.pipeline.stages = stages;
    }
    if let Some(capacity) = cli.mailbox {
        config.pipeline.mailbox_capacity = capacity;
    }
    if let Some(capacity) = cli.results {
        config.pipeline.result_capacity = capacity;
    }
    if let Some(count) = cli.count {
        config.source.count = count;
    }
    if let Some(policy) = cli.policy {
        config.pipeline.termination = policy.into();
    }
    Ok(config)
}

fn run(config: &RelayConfig, json: bool) -> Result<()> {
    let mut dispatcher = Dispatcher::start(&config.pipeline).context("Failed to start ring")?;
    let logger = dispatcher
        .events()
        .map(spawn_event_logger)
        .transpose()
        .context("Failed to spawn event logger")?;

    let mut results = Vec::new();
    let submitted = dispatcher
        .feed(prime_items(config.source.count), |batch| results.extend(batch))
        .context("Failed to seed ring")?;
    tracing::info!(
        "Submitted {} primes, {} results already out",
        submitted,
        results.len()
    );

    let mut draining = dispatcher.shutdown().context("Failed to shut down ring")?;
    let expected = match config.pipeline.termination {
        TerminationPolicy::Deliver => submitted - results.len(),
        TerminationPolicy::Discard => 0,
    };
    results.extend(draining.collect(expected)?);
    let report = draining.join().context("Ring did not stop cleanly")?;

    // All stage senders are gone now, so the logger sees end of stream.
    if let Some(handle) = logger {
        if handle.join().is_err() {
            tracing::warn!("Event logger panicked");
        }
    }

    for item in &results {
        if json {
            println!("{}", serde_json::to_string(item)?);
        } else {
            println!("{}", item);
        }
    }

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!(
            "{} stages: {} submitted, {} delivered, {} discarded",
            report.stages, report.submitted, report.delivered, report.discarded
        );
    }
    if report.events_dropped > 0 {
        tracing::warn!("{} stage events were dropped", report.events_dropped);
    }

    Ok(())
}

fn spawn_event_logger(events: Receiver<StageEvent>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("ring-events".to_string())
        .spawn(move || {
            for event in events {
                log_event(&event);
            }
        })
}

fn log_event(event: &StageEvent) {
    let Some(item) = event.item else {
        tracing::debug!("{} stopped", event.stage);
        return;
    };
    match event.action {
        StageAction::Forwarded(to) => tracing::debug!("{}: {} -> {}", event.stage, item, to),
        StageAction::Delivered => tracing::info!("{}: {} delivered", event.stage, item),
        StageAction::Discarded => tracing::info!("{}: {} discarded", event.stage, item),
        StageAction::Stopped => tracing::debug!("{} stopped", event.stage),
    }
}
