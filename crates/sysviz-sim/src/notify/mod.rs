//! Notification delivery pipeline.
//!
//! Three interchangeable strategies deliver one logical notification to a
//! fixed subscriber list:
//!
//! | Tier | Strategy                          | Teaches                        |
//! |------|-----------------------------------|--------------------------------|
//! | 1    | [`SequentialPipeline`]            | head-of-line blocking          |
//! | 2    | [`ParallelPipeline`]              | at-least-once duplicates       |
//! | 3    | [`PartitionedPipeline`]           | ordered, idempotent delivery   |
//!
//! Every strategy implements [`Simulation`] and [`DeliveryPipeline`] and
//! reports the same [`DeliveryCounters`], so dashboards can compare tiers.
//! [`NotificationPipeline`] picks a strategy by [`Tier`] at runtime.
//!
//! `start` begins a delivery run; the run completes on its own once every
//! subscriber reached a terminal status.

mod parallel;
mod partitioned;
mod sequential;

pub use parallel::{ParallelConfig, ParallelPipeline, WorkerState, WorkerView};
pub use partitioned::{
    LogMessage, MessageStatus, PartitionView, PartitionedConfig, PartitionedPipeline,
    partition_for,
};
pub use sequential::{SequentialConfig, SequentialPipeline};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::ns_to_ms;
use crate::driver::Simulation;
use crate::explain::Explanation;
use crate::rng::Rng;
use crate::tier::Tier;

// ============================================================================
// Shared model
// ============================================================================

/// Per-subscriber delivery status. Tier 1 uses the first five, tier 2 adds
/// `Queued` and `Retrying`, tier 3 adds `Acknowledged`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Idle,
    Receiving,
    Success,
    Slow,
    Failed,
    Queued,
    Retrying,
    Acknowledged,
}

impl DeliveryStatus {
    /// True once the subscriber will not change again this run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Success
                | DeliveryStatus::Slow
                | DeliveryStatus::Failed
                | DeliveryStatus::Acknowledged
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeliveryStatus::Idle => "idle",
            DeliveryStatus::Receiving => "receiving",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Slow => "slow",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::Acknowledged => "acknowledged",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscriber {
    pub id: String,
    pub name: String,
    /// Log partition (tier 3 only).
    pub partition: Option<usize>,
    pub status: DeliveryStatus,
    pub retries: u32,
    /// Latency of the final delivery attempt.
    pub latency_ns: Option<u64>,
    pub received_at_ns: Option<u64>,
    /// Delivered after a retry and flagged as a likely duplicate (tier 2).
    pub possible_duplicate: bool,
}

impl Subscriber {
    fn new(index: usize) -> Self {
        Self {
            id: (index + 1).to_string(),
            name: display_name(index),
            partition: None,
            status: DeliveryStatus::Idle,
            retries: 0,
            latency_ns: None,
            received_at_ns: None,
            possible_duplicate: false,
        }
    }

    fn clear(&mut self) {
        self.status = DeliveryStatus::Idle;
        self.retries = 0;
        self.latency_ns = None;
        self.received_at_ns = None;
        self.possible_duplicate = false;
    }
}

/// `User A`, `User B`, … then `User 27`, `User 28`, ….
fn display_name(index: usize) -> String {
    match u8::try_from(index) {
        Ok(i) if i < 26 => format!("User {}", char::from(b'A' + i)),
        _ => format!("User {}", index + 1),
    }
}

pub(crate) fn roster(count: usize) -> Vec<Subscriber> {
    (0..count).map(Subscriber::new).collect()
}

/// Aggregate counters shared by every tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryCounters {
    pub sent: u64,
    pub failed: u64,
    pub retried: u64,
    pub acknowledged: u64,
    pub duplicates_blocked: u64,
    pub possible_duplicates: u64,
    pub total_latency_ns: u64,
}

/// How a finished run went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Every subscriber was reached.
    Complete,
    /// At least one subscriber failed terminally.
    Partial,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunOutcome::Complete => "complete",
            RunOutcome::Partial => "partial",
        })
    }
}

/// Start and end of the current (or last) run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunWindow {
    /// Number of runs started so far.
    pub run: u64,
    pub started_at_ns: Option<u64>,
    pub finished_at_ns: Option<u64>,
}

impl RunWindow {
    fn begin(&mut self, now_ns: u64) {
        self.run += 1;
        self.started_at_ns = Some(now_ns);
        self.finished_at_ns = None;
    }

    fn finish(&mut self, now_ns: u64) {
        self.finished_at_ns = Some(now_ns);
    }

    pub fn is_active(&self) -> bool {
        self.started_at_ns.is_some() && self.finished_at_ns.is_none()
    }

    /// Time from start to finish (or to `now_ns` while active).
    pub fn elapsed_ns(&self, now_ns: u64) -> u64 {
        match self.started_at_ns {
            Some(start) => self.finished_at_ns.unwrap_or(now_ns).saturating_sub(start),
            None => 0,
        }
    }
}

/// Tier-specific part of a snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TierDetail {
    Sequential {
        /// Index of the subscriber being served.
        current: Option<usize>,
    },
    Parallel {
        workers: Vec<WorkerView>,
        queued: usize,
        retry_queued: usize,
    },
    Partitioned {
        partitions: Vec<PartitionView>,
        throughput_per_sec: f64,
        replay_pending: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct NotifySnapshot {
    pub now_ms: u64,
    pub tier: Tier,
    pub running: bool,
    pub window: RunWindow,
    pub elapsed_ms: u64,
    pub outcome: Option<RunOutcome>,
    pub subscribers: Vec<Subscriber>,
    pub counters: DeliveryCounters,
    pub detail: TierDetail,
}

/// Surface shared by every delivery strategy.
pub trait DeliveryPipeline: Simulation<Snapshot = NotifySnapshot> {
    fn tier(&self) -> Tier;

    fn subscribers(&self) -> &[Subscriber];

    fn counters(&self) -> DeliveryCounters;

    fn window(&self) -> RunWindow;

    /// True once the current run has finished.
    fn is_complete(&self) -> bool {
        let window = self.window();
        window.started_at_ns.is_some() && window.finished_at_ns.is_some()
    }

    /// Outcome of the last finished run.
    fn outcome(&self) -> Option<RunOutcome> {
        if !self.is_complete() {
            return None;
        }
        let failed = self
            .subscribers()
            .iter()
            .any(|s| s.status == DeliveryStatus::Failed);
        Some(if failed {
            RunOutcome::Partial
        } else {
            RunOutcome::Complete
        })
    }
}

fn snapshot_of<P: DeliveryPipeline + ?Sized>(pipeline: &P, detail: TierDetail) -> NotifySnapshot {
    let now = pipeline.now();
    let window = pipeline.window();
    NotifySnapshot {
        now_ms: ns_to_ms(now),
        tier: pipeline.tier(),
        running: pipeline.is_running(),
        window,
        elapsed_ms: ns_to_ms(window.elapsed_ns(now)),
        outcome: pipeline.outcome(),
        subscribers: pipeline.subscribers().to_vec(),
        counters: pipeline.counters(),
        detail,
    }
}

// ============================================================================
// Tier selection
// ============================================================================

/// Knobs for all three tiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub sequential: SequentialConfig,
    pub parallel: ParallelConfig,
    pub partitioned: PartitionedConfig,
}

/// A delivery strategy chosen at runtime.
#[derive(Debug, Clone)]
pub enum NotificationPipeline {
    Sequential(SequentialPipeline),
    Parallel(ParallelPipeline),
    Partitioned(PartitionedPipeline),
}

macro_rules! each_tier {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            NotificationPipeline::Sequential($p) => $body,
            NotificationPipeline::Parallel($p) => $body,
            NotificationPipeline::Partitioned($p) => $body,
        }
    };
}

impl NotificationPipeline {
    pub fn for_tier(tier: Tier, config: &NotifyConfig) -> Self {
        match tier {
            Tier::Basic => Self::Sequential(SequentialPipeline::new(config.sequential.clone())),
            Tier::Advanced => Self::Parallel(ParallelPipeline::new(config.parallel.clone())),
            Tier::Legendary => {
                Self::Partitioned(PartitionedPipeline::new(config.partitioned.clone()))
            }
        }
    }

    /// Replays an acknowledged message (tier 3 only). Returns `false` when
    /// the tier has no idempotency check or a replay is not allowed now.
    pub fn replay_duplicate(&mut self) -> bool {
        match self {
            NotificationPipeline::Partitioned(p) => p.replay_duplicate(),
            _ => false,
        }
    }
}

impl DeliveryPipeline for NotificationPipeline {
    fn tier(&self) -> Tier {
        each_tier!(self, p => p.tier())
    }

    fn subscribers(&self) -> &[Subscriber] {
        each_tier!(self, p => p.subscribers())
    }

    fn counters(&self) -> DeliveryCounters {
        each_tier!(self, p => p.counters())
    }

    fn window(&self) -> RunWindow {
        each_tier!(self, p => p.window())
    }
}

impl Simulation for NotificationPipeline {
    type Snapshot = NotifySnapshot;
    const NAME: &'static str = "notify";

    fn start(&mut self) {
        each_tier!(self, p => p.start());
    }

    fn stop(&mut self) {
        each_tier!(self, p => p.stop());
    }

    fn reset(&mut self) {
        each_tier!(self, p => p.reset());
    }

    fn is_running(&self) -> bool {
        each_tier!(self, p => p.is_running())
    }

    fn now(&self) -> u64 {
        each_tier!(self, p => p.now())
    }

    fn advance<R: Rng>(&mut self, elapsed_ns: u64, rng: &mut R) {
        each_tier!(self, p => p.advance(elapsed_ns, rng));
    }

    fn snapshot(&self) -> NotifySnapshot {
        each_tier!(self, p => p.snapshot())
    }

    fn drain_explanations(&mut self) -> Vec<Explanation> {
        each_tier!(self, p => p.drain_explanations())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ms_to_ns;
    use crate::driver::TickDriver;
    use crate::rng::SimRng;
    use test_case::test_case;

    #[test]
    fn display_names() {
        assert_eq!(display_name(0), "User A");
        assert_eq!(display_name(25), "User Z");
        assert_eq!(display_name(26), "User 27");
    }

    #[test]
    fn run_window_elapsed() {
        let mut window = RunWindow::default();
        assert_eq!(window.elapsed_ns(100), 0);
        window.begin(10);
        assert!(window.is_active());
        assert_eq!(window.elapsed_ns(25), 15);
        window.finish(40);
        assert_eq!(window.elapsed_ns(1_000), 30);
        assert_eq!(window.run, 1);
    }

    #[test_case(Tier::Basic, 5)]
    #[test_case(Tier::Advanced, 8)]
    #[test_case(Tier::Legendary, 10)]
    fn every_tier_reaches_every_subscriber(tier: Tier, subscribers: usize) {
        let mut pipeline = NotificationPipeline::for_tier(tier, &NotifyConfig::default());
        assert_eq!(pipeline.tier(), tier);
        assert_eq!(pipeline.subscribers().len(), subscribers);

        pipeline.start();
        let summary = TickDriver::default().run_until(
            &mut pipeline,
            &mut SimRng::new(42),
            ms_to_ns(60_000),
            |p| p.is_complete(),
        );
        assert!(summary.stopped_early);
        assert!(!pipeline.is_running());
        assert!(pipeline.subscribers().iter().all(|s| s.status.is_terminal()));

        let counters = pipeline.counters();
        assert_eq!(counters.sent + counters.failed, subscribers as u64);
        assert!(pipeline.outcome().is_some());
    }

    #[test]
    fn only_partitioned_tier_replays() {
        let config = NotifyConfig::default();
        assert!(!NotificationPipeline::for_tier(Tier::Basic, &config).replay_duplicate());
        assert!(!NotificationPipeline::for_tier(Tier::Advanced, &config).replay_duplicate());
    }
}
