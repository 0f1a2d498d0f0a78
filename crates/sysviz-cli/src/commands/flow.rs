//! Flow command - request particles through the tier's architecture.

use anyhow::Result;
use clap::Args;
use sysviz_sim::{FlowAnimator, FlowProfile, FlowSnapshot, Simulation, Tier, ns_to_ms};

use super::{RunArgs, Session, load_config};
use crate::style::{self, colors};

#[derive(Args, Debug)]
pub struct FlowArgs {
    /// Architecture tier (1 basic, 2 advanced, 3 legendary).
    #[arg(long)]
    pub tier: Option<Tier>,

    /// Number of request particles.
    #[arg(long)]
    pub particles: Option<usize>,
}

pub fn run(run: &RunArgs, args: FlowArgs) -> Result<()> {
    let mut config = load_config(run.config.as_deref())?;
    if let Some(tier) = args.tier {
        config.flow.tier = tier;
    }
    if let Some(particles) = args.particles {
        config.flow.particles = particles;
    }

    let mut session = Session::new(config, run)?;
    let mut flow = FlowAnimator::new(session.config.flow.clone());
    flow.start();
    // The animator stops itself once every particle is complete or failed
    let summary = session.drive_until(&mut flow, |_, _| {}, |f| !f.is_running());

    session.report(&mut flow, summary, print_details)
}

fn print_details(snapshot: &FlowSnapshot) {
    let profile = FlowProfile::for_tier(snapshot.tier);
    style::print_section(&format!(
        "{} tier: cache {}, {} in parallel, {:.0}% failure",
        snapshot.tier,
        if profile.cache_enabled { "on" } else { "off" },
        profile.parallelism,
        profile.failure_probability * 100.0
    ));

    let rows: Vec<Vec<String>> = snapshot
        .particles
        .iter()
        .map(|p| {
            vec![
                p.id.to_string(),
                colors::state(&p.stage.to_string()),
                format!("{:.0},{:.0}", p.x, p.y),
                format!("{} ms", ns_to_ms(p.delay_ns)),
                if p.cache_hit { "hit" } else { "" }.to_string(),
            ]
        })
        .collect();
    style::print_records(&["particle", "stage", "position", "delay", "cache"], &rows);

    let stats = snapshot.stats;
    style::print_info_table(&[
        ("completed", stats.completed.to_string()),
        ("failed", stats.failed.to_string()),
        ("cache hits", stats.cache_hits.to_string()),
        ("store hits", stats.store_hits.to_string()),
    ]);
}
