//! sysviz headless CLI.
//!
//! Runs one system-design simulation for a bounded amount of simulated time
//! and prints what happened: the explanation timeline, then the counters.
//!
//! # Quick Start
//!
//! ```bash
//! # Watch LFU evict under a scripted access pattern
//! sysviz cache --policy lfu --size 3 --keys A,B,C,A,D
//!
//! # Trip the breaker against a mostly failing upstream
//! sysviz breaker --health 20 --duration-ms 20000
//!
//! # Drive the autoscaler with a burst traffic pattern, as JSON
//! sysviz autoscale --pattern burst --format json
//!
//! # Replay an acknowledged notification against the idempotency check
//! sysviz notify --tier 3 --replay
//! ```

mod commands;
mod style;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::RunArgs;

/// sysviz - deterministic system-design simulations in the terminal.
#[derive(Parser)]
#[command(name = "sysviz")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cache eviction (LRU, LFU, TTL, FIFO).
    Cache(commands::cache::CacheArgs),

    /// Circuit breaker state machine.
    Breaker(commands::breaker::BreakerArgs),

    /// Auto-scaling controller, optionally fed by a traffic pattern.
    Autoscale(commands::autoscale::AutoscaleArgs),

    /// Fault-tolerance router with failure injection and recovery.
    Faults(commands::faults::FaultsArgs),

    /// Notification delivery pipeline (tier 1, 2 or 3).
    Notify(commands::notify::NotifyArgs),

    /// Traffic pattern generator.
    Traffic(commands::traffic::TrafficArgs),

    /// Request flow through the tier's architecture.
    Flow(commands::flow::FlowArgs),

    /// Batched load test against a tier's capacity profile.
    LoadTest(commands::load_test::LoadTestArgs),

    /// List simulators and the values their flags accept.
    List,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    style::set_no_color(cli.run.no_color);

    match cli.command {
        Commands::List => {
            commands::list::run();
            Ok(())
        }
        Commands::Cache(args) => commands::cache::run(&cli.run, args),
        Commands::Breaker(args) => commands::breaker::run(&cli.run, args),
        Commands::Autoscale(args) => commands::autoscale::run(&cli.run, args),
        Commands::Faults(args) => commands::faults::run(&cli.run, args),
        Commands::Notify(args) => commands::notify::run(&cli.run, args),
        Commands::Traffic(args) => commands::traffic::run(&cli.run, args),
        Commands::Flow(args) => commands::flow::run(&cli.run, args),
        Commands::LoadTest(args) => commands::load_test::run(&cli.run, args),
    }
}
