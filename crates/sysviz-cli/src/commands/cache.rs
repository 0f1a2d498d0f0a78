//! Cache command - eviction policies under scripted or random lookups.

use anyhow::Result;
use clap::Args;
use sysviz_sim::{
    CacheEngine, CacheSnapshot, EvictionPolicy, RunSummary, Simulation, ms_to_ns,
};

use super::{RunArgs, Session, load_config, pct, secs};
use crate::style;

#[derive(Args, Debug)]
pub struct CacheArgs {
    /// Eviction policy (lru, lfu, ttl, fifo).
    #[arg(long)]
    pub policy: Option<EvictionPolicy>,

    /// Maximum number of entries.
    #[arg(long)]
    pub size: Option<usize>,

    /// Time-to-live of new entries, in milliseconds.
    #[arg(long)]
    pub ttl_ms: Option<u64>,

    /// Keys to look up in order instead of random auto-fetch (A,B,C,A,D).
    #[arg(long, value_delimiter = ',')]
    pub keys: Vec<String>,

    /// Simulated time between scripted lookups.
    #[arg(long, default_value = "500")]
    pub interval_ms: u64,
}

pub fn run(run: &RunArgs, args: CacheArgs) -> Result<()> {
    let mut config = load_config(run.config.as_deref())?;
    if let Some(policy) = args.policy {
        config.cache.policy = policy;
    }
    if let Some(size) = args.size {
        config.cache.max_size = size;
    }
    if let Some(ttl_ms) = args.ttl_ms {
        config.cache.ttl_ms = ttl_ms;
    }

    let mut session = Session::new(config, run)?;
    let mut cache = CacheEngine::new(session.config.cache.clone());

    let summary = if args.keys.is_empty() {
        cache.start();
        let summary = session.drive(&mut cache, |_, _| {});
        cache.stop();
        summary
    } else {
        scripted(&mut session, &mut cache, &args.keys, args.interval_ms)
    };

    session.report(&mut cache, summary, print_details)
}

/// Looks up each key in turn, letting `interval_ms` pass between lookups so
/// TTL expiry can play out.
fn scripted(
    session: &mut Session,
    cache: &mut CacheEngine,
    keys: &[String],
    interval_ms: u64,
) -> RunSummary {
    let mut frames = 0;
    for key in keys {
        cache.get(key.trim());
        session.record(cache);
        frames += session
            .drive_for(cache, ms_to_ns(interval_ms), |_, _| {}, |_| false)
            .frames;
    }
    RunSummary {
        frames,
        final_time_ns: cache.now(),
        stopped_early: false,
    }
}

fn print_details(snapshot: &CacheSnapshot) {
    style::print_section(&format!(
        "{} cache, {}/{} entries",
        snapshot.policy.as_str().to_uppercase(),
        snapshot.entries.len(),
        snapshot.max_size
    ));
    let rows: Vec<Vec<String>> = snapshot
        .entries
        .iter()
        .map(|entry| {
            vec![
                entry.key.clone(),
                entry.value.clone(),
                entry.access_count.to_string(),
                secs(entry.last_access_ns),
                secs(entry.created_at_ns),
            ]
        })
        .collect();
    style::print_records(
        &["key", "value", "accesses", "last access", "created"],
        &rows,
    );

    let stats = snapshot.stats;
    style::print_info_table(&[
        ("hits", stats.hits.to_string()),
        ("misses", stats.misses.to_string()),
        ("evictions", stats.evictions.to_string()),
        ("hit rate", pct(snapshot.hit_rate)),
    ]);
}
