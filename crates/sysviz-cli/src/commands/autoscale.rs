//! Autoscale command - the scaling controller under steady or patterned load.

use anyhow::Result;
use clap::Args;
use sysviz_sim::{
    Autoscaler, AutoscalerSnapshot, Simulation, TrafficGenerator, TrafficPattern,
};

use super::{RunArgs, Session, load_config};
use crate::style::{self, colors};

#[derive(Args, Debug)]
pub struct AutoscaleArgs {
    /// Fixed incoming traffic in requests per second.
    #[arg(long, conflicts_with = "pattern")]
    pub traffic: Option<f64>,

    /// Feed the controller from a traffic pattern instead.
    #[arg(long)]
    pub pattern: Option<TrafficPattern>,

    /// Minimum fleet size.
    #[arg(long)]
    pub min: Option<usize>,

    /// Maximum fleet size.
    #[arg(long)]
    pub max: Option<usize>,

    /// Scale-up CPU threshold in percent.
    #[arg(long)]
    pub scale_up: Option<f64>,

    /// Scale-down CPU threshold in percent.
    #[arg(long)]
    pub scale_down: Option<f64>,

    /// Disable automatic scaling decisions.
    #[arg(long)]
    pub manual: bool,
}

pub fn run(run: &RunArgs, args: AutoscaleArgs) -> Result<()> {
    let mut config = load_config(run.config.as_deref())?;
    let scaler_config = &mut config.autoscaler;
    if let Some(traffic) = args.traffic {
        scaler_config.traffic_rps = traffic;
    }
    if let Some(min) = args.min {
        scaler_config.min_instances = min;
    }
    if let Some(max) = args.max {
        scaler_config.max_instances = max;
    }
    if let Some(up) = args.scale_up {
        scaler_config.scale_up_threshold_pct = up;
    }
    if let Some(down) = args.scale_down {
        scaler_config.scale_down_threshold_pct = down;
    }
    if args.manual {
        scaler_config.auto_scaling_enabled = false;
    }
    if let Some(pattern) = args.pattern {
        config.traffic.pattern = pattern;
    }

    let mut session = Session::new(config, run)?;
    let mut scaler = Autoscaler::new(session.config.autoscaler.clone());
    scaler.start();

    let summary = match args.pattern {
        None => session.drive(&mut scaler, |_, _| {}),
        Some(_) => {
            let mut traffic = TrafficGenerator::new(session.config.traffic.clone());
            traffic.start();
            let frame = session.driver.frame_ns();
            let mut traffic_log = Vec::new();
            let summary = session.drive(&mut scaler, |s, rng| {
                traffic.advance(frame, rng);
                s.set_traffic_level(traffic.current_rps());
                traffic_log.extend(traffic.drain_explanations());
            });
            session.merge(traffic_log);
            summary
        }
    };

    session.report(&mut scaler, summary, print_details)
}

fn print_details(snapshot: &AutoscalerSnapshot) {
    style::print_section(&format!(
        "{} instances ({} healthy, {} starting, {} terminating)",
        snapshot.instances.len(),
        snapshot.healthy,
        snapshot.starting,
        snapshot.terminating
    ));
    let rows: Vec<Vec<String>> = snapshot
        .instances
        .iter()
        .map(|instance| {
            vec![
                instance.id.clone(),
                colors::state(&instance.status.to_string()),
                format!("{:.1}%", instance.cpu_pct),
                format!("{:.1}%", instance.memory_pct),
                format!("{:.0}", instance.requests_per_sec),
            ]
        })
        .collect();
    style::print_records(&["instance", "status", "cpu", "memory", "req/s"], &rows);

    style::print_info_table(&[
        ("traffic", format!("{:.0} req/s", snapshot.traffic_rps)),
        ("average cpu", format!("{:.1}%", snapshot.average_cpu_pct)),
        ("response time", format!("{:.0} ms", snapshot.response_time_ms)),
        ("cost", format!("${:.2}/h", snapshot.cost_per_hour)),
        ("scale ups", snapshot.counters.scale_ups.to_string()),
        ("scale downs", snapshot.counters.scale_downs.to_string()),
    ]);
}
