//! Tier 3: a partitioned log with ordered delivery and idempotent consumers.
//!
//! Each notification is appended to the partition chosen by hashing the
//! subscriber id. A partition delivers only its head message and moves the
//! consumer offset forward on acknowledgement, so messages in a partition
//! are handled strictly in offset order. Every delivered message records an
//! idempotency key; a replayed key is blocked instead of delivered twice.
//!
//! The log and the processed-key set outlive a run. Counters do not.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::clock::{NS_PER_SEC, ms_to_ns, ns_to_ms};
use crate::driver::Simulation;
use crate::explain::{Explanation, ExplanationLog};
use crate::rng::Rng;
use crate::tier::Tier;
use crate::timer::TimerScope;

use super::{
    DeliveryCounters, DeliveryPipeline, DeliveryStatus, NotifySnapshot, RunWindow, Subscriber,
    TierDetail, roster, snapshot_of,
};

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Partition for a subscriber id: FNV-1a (32-bit) of the id bytes, modulo
/// the partition count.
pub fn partition_for(subscriber_id: &str, partitions: usize) -> usize {
    if partitions == 0 {
        return 0;
    }
    let hash = subscriber_id
        .bytes()
        .fold(FNV_OFFSET, |h, b| (h ^ u32::from(b)).wrapping_mul(FNV_PRIME));
    hash as usize % partitions
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionedConfig {
    pub subscribers: usize,
    pub partitions: usize,
    /// Time to append every message of a run to the log.
    pub persist_ms: u64,
    /// Earliest delivery slot is
    /// `slot_base_ms + partition * partition_offset_ms + position * slot_spacing_ms`.
    pub slot_base_ms: u64,
    pub partition_offset_ms: u64,
    pub slot_spacing_ms: u64,
    pub delivery_ms: u64,
    pub ack_ms: u64,
    /// Must stay below 1; failed deliveries are redelivered until they succeed.
    pub failure_probability: f64,
    pub redelivery_ms: u64,
    pub replay_check_ms: u64,
}

impl Default for PartitionedConfig {
    fn default() -> Self {
        Self {
            subscribers: 10,
            partitions: 3,
            persist_ms: 300,
            slot_base_ms: 500,
            partition_offset_ms: 100,
            slot_spacing_ms: 200,
            delivery_ms: 200,
            ack_ms: 150,
            failure_probability: 0.0,
            redelivery_ms: 500,
            replay_check_ms: 800,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Persisted,
    Delivered,
    Acknowledged,
}

/// One entry in a partition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogMessage {
    /// Position within the partition.
    pub offset: u64,
    /// Index into the subscriber list.
    pub subscriber: usize,
    /// Idempotency key, `sub-{id}:run-{n}`.
    pub key: String,
    pub status: MessageStatus,
    /// Earliest time the message may be delivered.
    pub slot_at_ns: u64,
    pub attempts: u32,
    pub delivery_started_ns: Option<u64>,
    pub acked_at_ns: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionView {
    pub id: usize,
    pub log_end_offset: u64,
    pub consumer_offset: u64,
    pub lag: u64,
    pub acked_offsets: Vec<u64>,
    pub messages: Vec<LogMessage>,
}

#[derive(Debug, Clone, Default)]
struct Partition {
    log: Vec<LogMessage>,
    consumer_offset: u64,
    acked_offsets: Vec<u64>,
}

impl Partition {
    fn log_end(&self) -> u64 {
        self.log.len() as u64
    }

    fn head(&self) -> Option<&LogMessage> {
        usize::try_from(self.consumer_offset)
            .ok()
            .and_then(|i| self.log.get(i))
    }

    fn head_mut(&mut self) -> Option<&mut LogMessage> {
        usize::try_from(self.consumer_offset)
            .ok()
            .and_then(|i| self.log.get_mut(i))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartitionedTimer {
    Persist,
    Deliver { partition: usize },
    Delivered { partition: usize },
    Ack { partition: usize },
    ReplayCheck,
}

#[derive(Debug, Clone)]
pub struct PartitionedPipeline {
    config: PartitionedConfig,
    subscribers: Vec<Subscriber>,
    partitions: Vec<Partition>,
    processed: HashSet<String>,
    replay: Option<String>,
    outstanding: usize,
    counters: DeliveryCounters,
    window: RunWindow,
    timers: TimerScope<PartitionedTimer>,
    log: ExplanationLog,
}

impl PartitionedPipeline {
    pub fn new(config: PartitionedConfig) -> Self {
        let partition_count = config.partitions.max(1);
        let mut subscribers = roster(config.subscribers);
        for subscriber in &mut subscribers {
            subscriber.partition = Some(partition_for(&subscriber.id, partition_count));
        }
        Self {
            subscribers,
            partitions: vec![Partition::default(); partition_count],
            config,
            processed: HashSet::new(),
            replay: None,
            outstanding: 0,
            counters: DeliveryCounters::default(),
            window: RunWindow::default(),
            timers: TimerScope::new(),
            log: ExplanationLog::new(Self::NAME),
        }
    }

    pub fn config(&self) -> &PartitionedConfig {
        &self.config
    }

    pub fn partitions(&self) -> Vec<PartitionView> {
        self.partitions
            .iter()
            .enumerate()
            .map(|(id, p)| PartitionView {
                id,
                log_end_offset: p.log_end(),
                consumer_offset: p.consumer_offset,
                lag: p.log_end().saturating_sub(p.consumer_offset),
                acked_offsets: p.acked_offsets.clone(),
                messages: p.log.clone(),
            })
            .collect()
    }

    /// Keys that have been delivered at least once, across runs.
    pub fn processed_keys(&self) -> &HashSet<String> {
        &self.processed
    }

    pub fn replay_pending(&self) -> bool {
        self.replay.is_some()
    }

    /// Acknowledgements of the current run per second of run time.
    pub fn throughput_per_sec(&self) -> f64 {
        let elapsed = self.window.elapsed_ns(self.timers.now());
        if elapsed == 0 {
            return 0.0;
        }
        self.counters.acknowledged as f64 * NS_PER_SEC as f64 / elapsed as f64
    }

    /// Re-submits the most recently acknowledged message.
    ///
    /// Allowed only between runs and after at least one acknowledgement.
    /// The consumer checks the key `replay_check_ms` later and blocks it.
    pub fn replay_duplicate(&mut self) -> bool {
        if self.window.is_active() || self.replay.is_some() || self.counters.acknowledged == 0 {
            return false;
        }
        let Some(key) = self
            .partitions
            .iter()
            .flat_map(|p| p.log.iter())
            .filter(|m| m.status == MessageStatus::Acknowledged)
            .max_by_key(|m| m.acked_at_ns)
            .map(|m| m.key.clone())
        else {
            return false;
        };
        let now = self.timers.now();
        self.log
            .notable(now, format!("Replaying {key} to test idempotency"));
        self.replay = Some(key);
        self.timers.after(
            ms_to_ns(self.config.replay_check_ms),
            PartitionedTimer::ReplayCheck,
        );
        true
    }

    fn append_run(&mut self) {
        let run = self.window.run;
        let mut positions = vec![0u64; self.partitions.len()];
        for (index, subscriber) in self.subscribers.iter_mut().enumerate() {
            subscriber.clear();
            let partition = subscriber.partition.unwrap_or(0);
            let Some(target) = self.partitions.get_mut(partition) else {
                continue;
            };
            let position = positions[partition];
            positions[partition] += 1;
            let slot_ms = self.config.slot_base_ms
                + partition as u64 * self.config.partition_offset_ms
                + position * self.config.slot_spacing_ms;
            target.log.push(LogMessage {
                offset: target.log_end(),
                subscriber: index,
                key: format!("sub-{}:run-{run}", subscriber.id),
                status: MessageStatus::Pending,
                slot_at_ns: self.timers.now() + ms_to_ns(slot_ms),
                attempts: 0,
                delivery_started_ns: None,
                acked_at_ns: None,
            });
            self.outstanding += 1;
        }
    }

    fn persist(&mut self) {
        let now = self.timers.now();
        for subscriber in &mut self.subscribers {
            subscriber.status = DeliveryStatus::Queued;
        }
        let mut persisted = 0;
        for partition in &mut self.partitions {
            for message in &mut partition.log {
                if message.status == MessageStatus::Pending {
                    message.status = MessageStatus::Persisted;
                    persisted += 1;
                }
            }
        }
        self.log.detail(
            now,
            format!("{persisted} messages persisted across {} partitions", self.partitions.len()),
        );
        for partition in 0..self.partitions.len() {
            self.schedule_head(partition);
        }
        self.maybe_finish();
    }

    /// Arms delivery of the partition head at its slot, or now if the slot
    /// already passed.
    fn schedule_head(&mut self, partition: usize) {
        let now = self.timers.now();
        let Some(head) = self.partitions.get(partition).and_then(Partition::head) else {
            return;
        };
        if head.status != MessageStatus::Persisted {
            return;
        }
        let delay = head.slot_at_ns.saturating_sub(now);
        self.timers
            .after(delay, PartitionedTimer::Deliver { partition });
    }

    fn deliver(&mut self, partition: usize) {
        let now = self.timers.now();
        let Some(head) = self.partitions.get_mut(partition).and_then(Partition::head_mut) else {
            return;
        };
        head.attempts += 1;
        head.delivery_started_ns.get_or_insert(now);
        if let Some(subscriber) = self.subscribers.get_mut(head.subscriber) {
            subscriber.status = DeliveryStatus::Receiving;
        }
        self.timers.after(
            ms_to_ns(self.config.delivery_ms),
            PartitionedTimer::Delivered { partition },
        );
    }

    fn delivered<R: Rng>(&mut self, partition: usize, rng: &mut R) {
        let now = self.timers.now();
        let failed = self.config.failure_probability > 0.0
            && rng.chance(self.config.failure_probability);
        let Some(head) = self.partitions.get_mut(partition).and_then(Partition::head_mut) else {
            return;
        };
        let Some(subscriber) = self.subscribers.get_mut(head.subscriber) else {
            return;
        };

        if failed {
            subscriber.status = DeliveryStatus::Retrying;
            subscriber.retries += 1;
            self.counters.retried += 1;
            self.log.detail(
                now,
                format!(
                    "Delivery of offset {} to {} failed, head stays at offset {}",
                    head.offset, subscriber.name, head.offset
                ),
            );
            self.timers.after(
                ms_to_ns(self.config.redelivery_ms),
                PartitionedTimer::Deliver { partition },
            );
            return;
        }

        head.status = MessageStatus::Delivered;
        subscriber.status = DeliveryStatus::Success;
        subscriber.received_at_ns = Some(now);
        self.counters.sent += 1;
        self.processed.insert(head.key.clone());
        self.log.detail(
            now,
            format!("P{partition} offset {} delivered to {}", head.offset, subscriber.name),
        );
        self.timers.after(
            ms_to_ns(self.config.ack_ms),
            PartitionedTimer::Ack { partition },
        );
    }

    fn ack(&mut self, partition: usize) {
        let now = self.timers.now();
        let Some(part) = self.partitions.get_mut(partition) else {
            return;
        };
        let Some(head) = part.head_mut() else {
            return;
        };
        head.status = MessageStatus::Acknowledged;
        head.acked_at_ns = Some(now);
        let offset = head.offset;
        let subscriber_index = head.subscriber;
        let latency = now.saturating_sub(head.delivery_started_ns.unwrap_or(now));
        part.acked_offsets.push(offset);
        part.consumer_offset += 1;

        if let Some(subscriber) = self.subscribers.get_mut(subscriber_index) {
            subscriber.status = DeliveryStatus::Acknowledged;
            subscriber.latency_ns = Some(latency);
        }
        self.counters.acknowledged += 1;
        self.counters.total_latency_ns += latency;
        self.outstanding = self.outstanding.saturating_sub(1);
        self.log
            .detail(now, format!("P{partition} committed offset {offset}"));

        self.schedule_head(partition);
        self.maybe_finish();
    }

    fn replay_check(&mut self) {
        let now = self.timers.now();
        let Some(key) = self.replay.take() else {
            return;
        };
        if self.processed.contains(&key) {
            self.counters.duplicates_blocked += 1;
            self.log
                .notable(now, format!("Duplicate {key} blocked by idempotency check"));
        } else {
            self.processed.insert(key.clone());
            self.counters.sent += 1;
            self.log.notable(now, format!("{key} was not seen before, delivered"));
        }
    }

    /// Drops messages a stopped run never committed so their heads do not
    /// block the next run.
    fn abandon_unacked(&mut self) {
        let mut dropped = 0;
        for partition in &mut self.partitions {
            let committed = usize::try_from(partition.consumer_offset).unwrap_or(usize::MAX);
            if partition.log.len() > committed {
                dropped += partition.log.len() - committed;
                partition.log.truncate(committed);
            }
        }
        self.outstanding = 0;
        if dropped > 0 {
            self.log.notable(
                self.timers.now(),
                format!(
                    "Run {} stopped early: {dropped} uncommitted messages dropped",
                    self.window.run
                ),
            );
        }
    }

    fn maybe_finish(&mut self) {
        if !self.window.is_active() || self.outstanding > 0 {
            return;
        }
        let now = self.timers.now();
        self.window.finish(now);
        self.log.notable(
            now,
            format!(
                "Partitioned run finished in {}ms: {} acknowledged in order, {} redeliveries",
                ns_to_ms(self.window.elapsed_ns(now)),
                self.counters.acknowledged,
                self.counters.retried
            ),
        );
    }
}

impl DeliveryPipeline for PartitionedPipeline {
    fn tier(&self) -> Tier {
        Tier::Legendary
    }

    fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    fn counters(&self) -> DeliveryCounters {
        self.counters
    }

    fn window(&self) -> RunWindow {
        self.window
    }
}

impl Simulation for PartitionedPipeline {
    type Snapshot = NotifySnapshot;
    const NAME: &'static str = "notify-partitioned";

    fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.timers.cancel_all();
        self.replay = None;
        self.abandon_unacked();
        self.counters = DeliveryCounters::default();
        self.window.begin(self.timers.now());
        self.append_run();
        self.timers.after(
            ms_to_ns(self.config.persist_ms),
            PartitionedTimer::Persist,
        );
        self.log.notable(
            self.timers.now(),
            format!(
                "Run {}: appending {} messages to {} partitions",
                self.window.run,
                self.subscribers.len(),
                self.partitions.len()
            ),
        );
    }

    fn stop(&mut self) {
        self.timers.cancel_all();
        self.replay = None;
    }

    fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    fn is_running(&self) -> bool {
        self.timers.pending() > 0
    }

    fn now(&self) -> u64 {
        self.timers.now()
    }

    fn advance<R: Rng>(&mut self, elapsed_ns: u64, rng: &mut R) {
        let deadline = self.timers.now().saturating_add(elapsed_ns);
        while let Some(fired) = self.timers.pop_due(deadline) {
            match fired.kind {
                PartitionedTimer::Persist => self.persist(),
                PartitionedTimer::Deliver { partition } => self.deliver(partition),
                PartitionedTimer::Delivered { partition } => self.delivered(partition, rng),
                PartitionedTimer::Ack { partition } => self.ack(partition),
                PartitionedTimer::ReplayCheck => self.replay_check(),
            }
        }
        self.timers.settle(deadline);
    }

    fn snapshot(&self) -> NotifySnapshot {
        snapshot_of(
            self,
            TierDetail::Partitioned {
                partitions: self.partitions(),
                throughput_per_sec: self.throughput_per_sec(),
                replay_pending: self.replay_pending(),
            },
        )
    }

    fn drain_explanations(&mut self) -> Vec<Explanation> {
        self.log.drain()
    }
}
