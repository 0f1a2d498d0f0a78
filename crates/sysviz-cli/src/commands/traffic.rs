//! Traffic command - a request-rate series under the chosen pattern.

use anyhow::Result;
use clap::Args;
use sysviz_sim::{Simulation, TrafficGenerator, TrafficPattern, TrafficSnapshot};

use super::{RunArgs, Session, load_config, pct};
use crate::style::{self, colors};

/// Width of the history sparkline.
const SPARK_WIDTH: usize = 60;
const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

#[derive(Args, Debug)]
pub struct TrafficArgs {
    /// Traffic shape (steady, gradual, burst, spike, regional).
    #[arg(long)]
    pub pattern: Option<TrafficPattern>,

    /// Baseline requests per second.
    #[arg(long)]
    pub baseline: Option<f64>,

    /// Capacity the status thresholds are measured against.
    #[arg(long)]
    pub capacity: Option<f64>,
}

pub fn run(run: &RunArgs, args: TrafficArgs) -> Result<()> {
    let mut config = load_config(run.config.as_deref())?;
    if let Some(pattern) = args.pattern {
        config.traffic.pattern = pattern;
    }
    if let Some(baseline) = args.baseline {
        config.traffic.baseline_rps = baseline;
    }
    if let Some(capacity) = args.capacity {
        config.traffic.max_capacity_rps = capacity;
    }

    let mut session = Session::new(config, run)?;
    let mut traffic = TrafficGenerator::new(session.config.traffic.clone());
    traffic.start();
    let summary = session.drive(&mut traffic, |_, _| {});

    session.report(&mut traffic, summary, print_details)
}

fn print_details(snapshot: &TrafficSnapshot) {
    style::print_section(&format!(
        "{} traffic, {}",
        snapshot.pattern.label(),
        colors::state(&snapshot.status.to_string())
    ));
    let rates: Vec<f64> = snapshot.history.iter().map(|p| p.rps).collect();
    println!("  {}", sparkline(&rates, snapshot.peak_rps));
    style::print_spacer();

    style::print_info_table(&[
        ("ticks", snapshot.tick.to_string()),
        ("current", format!("{:.0} req/s", snapshot.current_rps)),
        ("peak", format!("{:.0} req/s", snapshot.peak_rps)),
        ("utilization", pct(snapshot.utilization)),
    ]);
}

/// Renders the most recent rates as block characters scaled to `peak`.
fn sparkline(rates: &[f64], peak: f64) -> String {
    let start = rates.len().saturating_sub(SPARK_WIDTH);
    rates[start..]
        .iter()
        .map(|&rps| {
            let level = if peak > 0.0 {
                ((rps / peak) * (SPARK_LEVELS.len() - 1) as f64).round() as usize
            } else {
                0
            };
            SPARK_LEVELS[level.min(SPARK_LEVELS.len() - 1)]
        })
        .collect()
}
