//! Breaker command - circuit breaker against an upstream of given health.

use anyhow::Result;
use clap::Args;
use sysviz_sim::{BreakerSnapshot, CallOutcome, CircuitBreaker, Simulation, ms_to_ns};

use super::{RunArgs, Session, load_config};
use crate::style::{self, colors};

#[derive(Args, Debug)]
pub struct BreakerArgs {
    /// Upstream health in percent (probability a call succeeds).
    #[arg(long)]
    pub health: Option<f64>,

    /// Consecutive failures that open the circuit.
    #[arg(long)]
    pub threshold: Option<u32>,

    /// Time the circuit stays open before probing, in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Successful probes needed to close a half-open circuit.
    #[arg(long)]
    pub successes: Option<u32>,

    /// Change upstream health at this simulated time.
    #[arg(long)]
    pub heal_at_ms: Option<u64>,

    /// Health the upstream changes to at --heal-at-ms.
    #[arg(long, default_value = "100")]
    pub heal_to: f64,
}

pub fn run(run: &RunArgs, args: BreakerArgs) -> Result<()> {
    let mut config = load_config(run.config.as_deref())?;
    if let Some(health) = args.health {
        config.breaker.service_health_pct = health;
    }
    if let Some(threshold) = args.threshold {
        config.breaker.failure_threshold = threshold;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.breaker.recovery_timeout_ms = timeout_ms;
    }
    if let Some(successes) = args.successes {
        config.breaker.half_open_successes_required = successes;
    }

    let mut session = Session::new(config, run)?;
    let mut breaker = CircuitBreaker::new(session.config.breaker.clone());
    breaker.start();

    let mut heal_at = args.heal_at_ms.map(ms_to_ns);
    let summary = session.drive(&mut breaker, |b, _| {
        if heal_at.is_some_and(|at| b.now() >= at) {
            heal_at = None;
            b.set_service_health_pct(args.heal_to);
        }
    });

    session.report(&mut breaker, summary, print_details)
}

fn print_details(snapshot: &BreakerSnapshot) {
    let state = snapshot.state;
    style::print_section(&format!(
        "Circuit {}",
        colors::state(&state.mode.to_string())
    ));

    let recent: String = snapshot
        .recent
        .iter()
        .map(|call| match call.outcome {
            CallOutcome::Success => '✓',
            CallOutcome::Failure => '✗',
            CallOutcome::Blocked => '·',
        })
        .collect();

    let counters = snapshot.counters;
    style::print_info_table(&[
        ("successes", counters.successes.to_string()),
        ("failures", counters.failures.to_string()),
        ("blocked", counters.blocked.to_string()),
        ("consecutive failures", state.consecutive_failures.to_string()),
        ("half-open successes", state.half_open_successes.to_string()),
        (
            "half-open in",
            format!("{} ms", snapshot.time_until_half_open_ms),
        ),
        ("recent calls", recent),
    ]);
}
