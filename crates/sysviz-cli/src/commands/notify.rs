//! Notify command - one delivery run through the tier's pipeline.

use anyhow::{Result, bail};
use clap::Args;
use sysviz_sim::notify::WorkerState;
use sysviz_sim::{
    DeliveryPipeline, NotificationPipeline, NotifySnapshot, RunSummary, Simulation, Tier,
    TierDetail, ms_to_ns, ns_to_ms,
};

use super::{RunArgs, Session, load_config, secs};
use crate::style::{self, colors};

#[derive(Args, Debug)]
pub struct NotifyArgs {
    /// Delivery tier (1 sequential, 2 parallel, 3 partitioned).
    #[arg(long, default_value = "1")]
    pub tier: Tier,

    /// After the run, replay an acknowledged message (tier 3).
    #[arg(long)]
    pub replay: bool,

    /// Number of subscribers.
    #[arg(long)]
    pub subscribers: Option<usize>,
}

pub fn run(run: &RunArgs, args: NotifyArgs) -> Result<()> {
    if args.replay && args.tier != Tier::Legendary {
        bail!("--replay needs --tier 3: only the partitioned pipeline deduplicates");
    }

    let mut config = load_config(run.config.as_deref())?;
    if let Some(subscribers) = args.subscribers {
        config.notify.sequential.subscribers = subscribers;
        config.notify.parallel.subscribers = subscribers;
        config.notify.partitioned.subscribers = subscribers;
    }

    let mut session = Session::new(config, run)?;
    let mut pipeline = NotificationPipeline::for_tier(args.tier, &session.config.notify);
    pipeline.start();

    let mut summary = session.drive_until(&mut pipeline, |_, _| {}, |p| p.is_complete());

    if args.replay {
        if pipeline.replay_duplicate() {
            let check_ns = ms_to_ns(session.config.notify.partitioned.replay_check_ms)
                + session.driver.frame_ns();
            let replay = session.drive_for(&mut pipeline, check_ns, |_, _| {}, |_| false);
            summary = RunSummary {
                frames: summary.frames + replay.frames,
                final_time_ns: replay.final_time_ns,
                stopped_early: summary.stopped_early,
            };
        } else {
            tracing::warn!("replay rejected: the run did not acknowledge any message");
        }
    }

    session.report(&mut pipeline, summary, print_details)
}

fn print_details(snapshot: &NotifySnapshot) {
    let outcome = snapshot
        .outcome
        .map_or_else(|| "running".to_string(), |o| o.to_string());
    style::print_section(&format!(
        "{} tier, run {} {} in {} ms",
        snapshot.tier,
        snapshot.window.run,
        colors::state(&outcome),
        snapshot.elapsed_ms
    ));

    let rows: Vec<Vec<String>> = snapshot
        .subscribers
        .iter()
        .map(|sub| {
            vec![
                sub.name.clone(),
                sub.partition.map_or_else(String::new, |p| p.to_string()),
                colors::state(&sub.status.to_string()),
                sub.retries.to_string(),
                sub.latency_ns
                    .map_or_else(String::new, |ns| format!("{} ms", ns_to_ms(ns))),
                sub.received_at_ns.map_or_else(String::new, secs),
                if sub.possible_duplicate { "⚠" } else { "" }.to_string(),
            ]
        })
        .collect();
    style::print_records(
        &[
            "subscriber",
            "partition",
            "status",
            "retries",
            "latency",
            "received",
            "dup",
        ],
        &rows,
    );

    match &snapshot.detail {
        TierDetail::Sequential { .. } => {}
        TierDetail::Parallel { workers, .. } => {
            let rows: Vec<Vec<String>> = workers
                .iter()
                .map(|w| {
                    vec![
                        format!("worker-{}", w.id),
                        match w.state {
                            WorkerState::Idle => "idle",
                            WorkerState::Busy => "busy",
                        }
                        .to_string(),
                        w.completed.to_string(),
                    ]
                })
                .collect();
            style::print_records(&["worker", "state", "completed"], &rows);
        }
        TierDetail::Partitioned {
            partitions,
            throughput_per_sec,
            ..
        } => {
            let rows: Vec<Vec<String>> = partitions
                .iter()
                .map(|p| {
                    vec![
                        format!("partition-{}", p.id),
                        p.log_end_offset.to_string(),
                        p.consumer_offset.to_string(),
                        p.lag.to_string(),
                    ]
                })
                .collect();
            style::print_records(
                &["partition", "log end", "consumer offset", "lag"],
                &rows,
            );
            println!("throughput: {throughput_per_sec:.2} acks/s");
        }
    }

    let c = snapshot.counters;
    style::print_info_table(&[
        ("sent", c.sent.to_string()),
        ("failed", c.failed.to_string()),
        ("retried", c.retried.to_string()),
        ("acknowledged", c.acknowledged.to_string()),
        ("duplicates blocked", c.duplicates_blocked.to_string()),
        ("possible duplicates", c.possible_duplicates.to_string()),
        ("total latency", format!("{} ms", ns_to_ms(c.total_latency_ns))),
    ]);
}
