//! Faults command - inject a component failure and watch traffic reroute.

use anyhow::Result;
use clap::Args;
use sysviz_sim::{FailureType, FaultRouter, RouterSnapshot, Simulation, ms_to_ns};

use super::{RunArgs, Session, load_config};
use crate::style::{self, colors};

#[derive(Args, Debug)]
pub struct FaultsArgs {
    /// Failure to inject (server, database, cache, network).
    #[arg(long)]
    pub inject: Option<FailureType>,

    /// Simulated time of the injection.
    #[arg(long, default_value = "1000")]
    pub inject_at_ms: u64,

    /// Start recovery at this simulated time.
    #[arg(long)]
    pub recover_at_ms: Option<u64>,

    /// Number of application servers.
    #[arg(long)]
    pub servers: Option<usize>,
}

pub fn run(run: &RunArgs, args: FaultsArgs) -> Result<()> {
    let mut config = load_config(run.config.as_deref())?;
    if let Some(servers) = args.servers {
        config.router.server_count = servers;
    }

    let mut session = Session::new(config, run)?;
    let mut router = FaultRouter::new(session.config.router.clone());
    router.start();

    let mut inject = args.inject.map(|failure| (ms_to_ns(args.inject_at_ms), failure));
    let mut recover_at = args.recover_at_ms.map(ms_to_ns);
    let summary = session.drive(&mut router, |r, _| {
        if let Some((at, failure)) = inject {
            if r.now() >= at {
                inject = None;
                r.inject_failure(failure);
            }
        }
        // Recovery is only accepted once the failure is in place
        if inject.is_none()
            && recover_at.is_some_and(|at| r.now() >= at)
            && r.trigger_recovery()
        {
            recover_at = None;
        }
    });

    session.report(&mut router, summary, print_details)
}

fn print_details(snapshot: &RouterSnapshot) {
    let title = match (snapshot.active_failure, snapshot.recovery_progress_pct) {
        (Some(failure), Some(progress)) => format!("{failure} failure, recovering {progress}%"),
        (Some(failure), None) => format!("{failure} failure active"),
        (None, _) => "All components healthy".to_string(),
    };
    style::print_section(&title);

    let rows: Vec<Vec<String>> = snapshot
        .nodes
        .iter()
        .map(|node| {
            vec![
                node.id.clone(),
                node.label.clone(),
                colors::state(&node.health.to_string()),
            ]
        })
        .collect();
    style::print_records(&["node", "label", "health"], &rows);

    let stats = snapshot.stats;
    style::print_info_table(&[
        ("requests", stats.total.to_string()),
        ("succeeded", stats.success.to_string()),
        ("failed", stats.failed.to_string()),
        ("rerouted", stats.rerouted.to_string()),
        ("downtime", format!("{:.1}s", stats.downtime_s)),
        ("recovery time", format!("{:.1}s", stats.recovery_time_s)),
    ]);
}
