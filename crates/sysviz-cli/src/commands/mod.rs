//! CLI command implementations.
//!
//! Every simulator command follows the same shape: load the layered
//! configuration, apply its own flags on top, validate, then drive the
//! simulator through a [`Session`] and report.

pub mod autoscale;
pub mod breaker;
pub mod cache;
pub mod faults;
pub mod flow;
pub mod list;
pub mod notify;
pub mod traffic;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;
use sysviz_config::{ConfigLoader, SysvizConfig};
use sysviz_sim::{
    Explanation, RunSummary, SimRng, Simulation, TickDriver, ms_to_ns, ns_to_ms,
};

use crate::style::{self, colors::SemanticStyle};

/// Flags shared by every simulator command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Seed for every random draw (same seed, same run).
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// Simulated time to run for, in milliseconds.
    #[arg(long, global = true)]
    pub duration_ms: Option<u64>,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub format: OutputFormat,

    /// Project directory holding sysviz.toml, or a single TOML file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Loads configuration from `--config`, or from the current directory.
pub fn load_config(path: Option<&Path>) -> Result<SysvizConfig> {
    match path {
        Some(path) if path.is_file() => SysvizConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display())),
        Some(dir) => ConfigLoader::new().with_project_dir(dir).load(),
        None => ConfigLoader::new().load(),
    }
}

/// One validated run: configuration, seeded RNG and the tick driver.
pub struct Session {
    pub config: SysvizConfig,
    pub format: OutputFormat,
    pub rng: SimRng,
    pub driver: TickDriver,
    seed: u64,
    duration_ns: u64,
    timeline: Vec<Explanation>,
}

impl Session {
    /// Applies the shared flags and validates the result.
    pub fn new(mut config: SysvizConfig, run: &RunArgs) -> Result<Self> {
        if let Some(seed) = run.seed {
            config.run.seed = seed;
        }
        if let Some(duration_ms) = run.duration_ms {
            config.run.duration_ms = duration_ms;
        }
        config.validate().context("Invalid configuration")?;

        tracing::debug!(
            seed = config.run.seed,
            duration_ms = config.run.duration_ms,
            frame_ms = config.run.frame_ms,
            "session configured"
        );

        Ok(Self {
            format: run.format,
            rng: SimRng::new(config.run.seed),
            driver: TickDriver::with_frame_ms(config.run.frame_ms),
            seed: config.run.seed,
            duration_ns: ms_to_ns(config.run.duration_ms),
            timeline: Vec::new(),
            config,
        })
    }

    /// Runs for the configured duration, calling `hook` after every frame.
    pub fn drive<S, H>(&mut self, sim: &mut S, hook: H) -> RunSummary
    where
        S: Simulation,
        H: FnMut(&mut S, &mut SimRng),
    {
        self.drive_until(sim, hook, |_| false)
    }

    /// Runs until `done` holds or the configured duration elapses.
    pub fn drive_until<S, H, P>(&mut self, sim: &mut S, hook: H, done: P) -> RunSummary
    where
        S: Simulation,
        H: FnMut(&mut S, &mut SimRng),
        P: FnMut(&S) -> bool,
    {
        self.drive_for(sim, self.duration_ns, hook, done)
    }

    /// Runs for `duration_ns`, collecting explanations after every frame.
    pub fn drive_for<S, H, P>(
        &mut self,
        sim: &mut S,
        duration_ns: u64,
        mut hook: H,
        done: P,
    ) -> RunSummary
    where
        S: Simulation,
        H: FnMut(&mut S, &mut SimRng),
        P: FnMut(&S) -> bool,
    {
        let timeline = &mut self.timeline;
        self.driver.run_until_with(
            sim,
            &mut self.rng,
            duration_ns,
            |s, rng| {
                hook(s, rng);
                timeline.extend(s.drain_explanations());
            },
            done,
        )
    }

    /// Collects explanations recorded outside the driver (user actions).
    pub fn record<S: Simulation>(&mut self, sim: &mut S) {
        self.timeline.extend(sim.drain_explanations());
    }

    /// Merges explanations from a coupled simulator into the timeline.
    pub fn merge(&mut self, entries: Vec<Explanation>) {
        self.timeline.extend(entries);
        self.timeline.sort_by_key(|e| e.at_ns);
    }

    /// Prints the run as JSON, or as a timeline followed by `details`.
    pub fn report<S, D>(mut self, sim: &mut S, summary: RunSummary, details: D) -> Result<()>
    where
        S: Simulation,
        D: FnOnce(&S::Snapshot),
    {
        self.record(sim);
        let snapshot = sim.snapshot();

        match self.format {
            OutputFormat::Json => {
                let report = Report {
                    simulator: S::NAME,
                    seed: self.seed,
                    summary,
                    explanations: &self.timeline,
                    snapshot: &snapshot,
                };
                let json = serde_json::to_string_pretty(&report)
                    .context("Failed to serialize report")?;
                println!("{json}");
            }
            OutputFormat::Human => {
                println!(
                    "{} {} {}",
                    S::NAME.header(),
                    format!("seed {}", self.seed).code(),
                    format!(
                        "{:.3}s simulated, {} frames{}",
                        summary.final_time_ns as f64 / 1e9,
                        summary.frames,
                        if summary.stopped_early {
                            ", finished early"
                        } else {
                            ""
                        }
                    )
                    .muted()
                );
                style::print_spacer();
                style::print_timeline(&self.timeline);
                style::print_spacer();
                details(&snapshot);
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct Report<'a, T: Serialize> {
    simulator: &'static str,
    seed: u64,
    summary: RunSummary,
    explanations: &'a [Explanation],
    snapshot: &'a T,
}

/// Formats a simulated timestamp as seconds.
pub fn secs(at_ns: u64) -> String {
    format!("{:.3}s", ns_to_ms(at_ns) as f64 / 1_000.0)
}

/// Formats a fraction as a percentage.
pub fn pct(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}
