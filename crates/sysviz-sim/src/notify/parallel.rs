//! Tier 2: a worker pool with retries.
//!
//! Workers pull subscribers from a shared queue. Failed deliveries go to a
//! retry queue that workers drain first. A retried delivery may have reached
//! the subscriber the first time too, so successes after a retry are flagged
//! as possible duplicates.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::clock::{ms_f64_to_ns, ms_to_ns, ns_to_ms};
use crate::driver::Simulation;
use crate::explain::{Explanation, ExplanationLog};
use crate::rng::Rng;
use crate::tier::Tier;
use crate::timer::TimerScope;

use super::{
    DeliveryCounters, DeliveryPipeline, DeliveryStatus, NotifySnapshot, RunWindow, Subscriber,
    TierDetail, roster, snapshot_of,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    pub subscribers: usize,
    pub workers: usize,
    /// Delay between consecutive workers coming online.
    pub worker_stagger_ms: u64,
    pub failure_probability: f64,
    pub latency_min_ms: f64,
    pub latency_max_ms: f64,
    pub max_retries: u32,
    /// Chance that a success after a retry is flagged as a duplicate.
    pub duplicate_probability: f64,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            subscribers: 8,
            workers: 3,
            worker_stagger_ms: 100,
            failure_probability: 0.25,
            latency_min_ms: 200.0,
            latency_max_ms: 600.0,
            max_retries: 2,
            duplicate_probability: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    #[default]
    Idle,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerView {
    pub id: usize,
    pub state: WorkerState,
    /// Subscriber index being served.
    pub serving: Option<usize>,
    pub completed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParallelTimer {
    WorkerOnline { worker: usize },
    Attempt {
        worker: usize,
        index: usize,
        failed: bool,
        latency_ns: u64,
    },
}

#[derive(Debug, Clone)]
pub struct ParallelPipeline {
    config: ParallelConfig,
    subscribers: Vec<Subscriber>,
    workers: Vec<WorkerView>,
    queue: VecDeque<usize>,
    retry_queue: VecDeque<usize>,
    counters: DeliveryCounters,
    window: RunWindow,
    timers: TimerScope<ParallelTimer>,
    log: ExplanationLog,
}

impl ParallelPipeline {
    pub fn new(config: ParallelConfig) -> Self {
        let workers = (0..config.workers.max(1))
            .map(|id| WorkerView {
                id,
                state: WorkerState::Idle,
                serving: None,
                completed: 0,
            })
            .collect();
        Self {
            subscribers: roster(config.subscribers),
            workers,
            config,
            queue: VecDeque::new(),
            retry_queue: VecDeque::new(),
            counters: DeliveryCounters::default(),
            window: RunWindow::default(),
            timers: TimerScope::new(),
            log: ExplanationLog::new(Self::NAME),
        }
    }

    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }

    pub fn workers(&self) -> &[WorkerView] {
        &self.workers
    }

    /// Hands `worker` its next subscriber, retries first.
    fn pick<R: Rng>(&mut self, worker: usize, rng: &mut R) {
        let Some(index) = self
            .retry_queue
            .pop_front()
            .or_else(|| self.queue.pop_front())
        else {
            if let Some(view) = self.workers.get_mut(worker) {
                view.state = WorkerState::Idle;
                view.serving = None;
            }
            self.maybe_finish();
            return;
        };

        let failed = rng.chance(self.config.failure_probability);
        let latency_ns =
            ms_f64_to_ns(rng.range_f64(self.config.latency_min_ms, self.config.latency_max_ms));

        if let Some(subscriber) = self.subscribers.get_mut(index) {
            subscriber.status = if subscriber.retries > 0 {
                DeliveryStatus::Retrying
            } else {
                DeliveryStatus::Receiving
            };
        }
        if let Some(view) = self.workers.get_mut(worker) {
            view.state = WorkerState::Busy;
            view.serving = Some(index);
        }
        self.timers.after(
            latency_ns,
            ParallelTimer::Attempt {
                worker,
                index,
                failed,
                latency_ns,
            },
        );
    }

    fn attempt_done<R: Rng>(
        &mut self,
        worker: usize,
        index: usize,
        failed: bool,
        latency_ns: u64,
        rng: &mut R,
    ) {
        let now = self.timers.now();
        let max_retries = self.config.max_retries;
        let duplicate_probability = self.config.duplicate_probability;

        if let Some(subscriber) = self.subscribers.get_mut(index) {
            subscriber.latency_ns = Some(latency_ns);
            if failed && subscriber.retries < max_retries {
                subscriber.retries += 1;
                subscriber.status = DeliveryStatus::Queued;
                self.counters.retried += 1;
                self.retry_queue.push_back(index);
                self.log.detail(
                    now,
                    format!(
                        "Worker {worker} failed {}, retry {}/{max_retries} queued",
                        subscriber.name, subscriber.retries
                    ),
                );
            } else if failed {
                subscriber.status = DeliveryStatus::Failed;
                self.counters.failed += 1;
                self.counters.total_latency_ns += latency_ns;
                self.log.notable(
                    now,
                    format!("{} unreachable after {max_retries} retries", subscriber.name),
                );
            } else {
                let duplicate = subscriber.retries > 0 && rng.chance(duplicate_probability);
                subscriber.status = DeliveryStatus::Success;
                subscriber.received_at_ns = Some(now);
                subscriber.possible_duplicate = duplicate;
                self.counters.sent += 1;
                self.counters.total_latency_ns += latency_ns;
                if duplicate {
                    self.counters.possible_duplicates += 1;
                    self.log.notable(
                        now,
                        format!(
                            "{} may have received the notification twice (no idempotency key)",
                            subscriber.name
                        ),
                    );
                } else {
                    self.log
                        .detail(now, format!("Worker {worker} delivered to {}", subscriber.name));
                }
            }
        }
        if let Some(view) = self.workers.get_mut(worker) {
            view.completed += 1;
        }
        self.pick(worker, rng);
    }

    fn maybe_finish(&mut self) {
        if !self.window.is_active()
            || self.timers.pending() > 0
            || !self.queue.is_empty()
            || !self.retry_queue.is_empty()
        {
            return;
        }
        let now = self.timers.now();
        self.window.finish(now);
        self.log.notable(
            now,
            format!(
                "Parallel run finished in {}ms: {} delivered, {} failed, {} retries, {} possible duplicates",
                ns_to_ms(self.window.elapsed_ns(now)),
                self.counters.sent,
                self.counters.failed,
                self.counters.retried,
                self.counters.possible_duplicates
            ),
        );
    }
}

impl DeliveryPipeline for ParallelPipeline {
    fn tier(&self) -> Tier {
        Tier::Advanced
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

impl Simulation for ParallelPipeline {
    type Snapshot = NotifySnapshot;
    const NAME: &'static str = "notify-parallel";

    fn start(&mut self) {
        if self.is_running() {
            return;
        }
        for subscriber in &mut self.subscribers {
            subscriber.clear();
            subscriber.status = DeliveryStatus::Queued;
        }
        for worker in &mut self.workers {
            worker.state = WorkerState::Idle;
            worker.serving = None;
            worker.completed = 0;
        }
        self.counters = DeliveryCounters::default();
        self.queue = (0..self.subscribers.len()).collect();
        self.retry_queue.clear();
        self.window.begin(self.timers.now());

        let stagger_ns = ms_to_ns(self.config.worker_stagger_ms);
        for worker in 0..self.workers.len() {
            self.timers
                .after(stagger_ns * worker as u64, ParallelTimer::WorkerOnline { worker });
        }
        self.log.notable(
            self.timers.now(),
            format!(
                "{} workers delivering to {} subscribers",
                self.workers.len(),
                self.subscribers.len()
            ),
        );
    }

    fn stop(&mut self) {
        self.timers.cancel_all();
        for worker in &mut self.workers {
            worker.state = WorkerState::Idle;
            worker.serving = None;
        }
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
                ParallelTimer::WorkerOnline { worker } => self.pick(worker, rng),
                ParallelTimer::Attempt {
                    worker,
                    index,
                    failed,
                    latency_ns,
                } => self.attempt_done(worker, index, failed, latency_ns, rng),
            }
        }
        self.timers.settle(deadline);
    }

    fn snapshot(&self) -> NotifySnapshot {
        snapshot_of(
            self,
            TierDetail::Parallel {
                workers: self.workers.clone(),
                queued: self.queue.len(),
                retry_queued: self.retry_queue.len(),
            },
        )
    }

    fn drain_explanations(&mut self) -> Vec<Explanation> {
        self.log.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::Rng;
    use crate::notify::RunOutcome;
    use crate::rng::{ScriptedRng, SimRng};
    use proptest::prelude::*;

    fn run_to_end<R: Rng>(pipeline: &mut ParallelPipeline, rng: &mut R) {
        pipeline.start();
        for _ in 0..10_000 {
            pipeline.advance(ms_to_ns(16), rng);
            if pipeline.is_complete() {
                return;
            }
        }
        panic!("run did not finish");
    }

    #[test]
    fn always_failing_exhausts_retries() {
        let mut pipeline = ParallelPipeline::new(ParallelConfig::default());
        run_to_end(&mut pipeline, &mut ScriptedRng::constant(0.0));

        let counters = pipeline.counters();
        assert_eq!(counters.failed, 8);
        assert_eq!(counters.sent, 0);
        assert_eq!(counters.retried, 16);
        assert!(pipeline.subscribers().iter().all(|s| s.retries == 2));
        assert_eq!(pipeline.outcome(), Some(RunOutcome::Partial));
    }

    #[test]
    fn retry_queue_served_before_main_queue() {
        let config = ParallelConfig {
            subscribers: 2,
            workers: 1,
            ..ParallelConfig::default()
        };
        let mut pipeline = ParallelPipeline::new(config);
        // A fails once, retries and succeeds (no duplicate), then B succeeds.
        let mut rng = ScriptedRng::new(vec![0.0, 0.0, 0.9, 0.0, 0.9, 0.9, 0.0]);
        run_to_end(&mut pipeline, &mut rng);

        let subs = pipeline.subscribers();
        assert_eq!(subs[0].received_at_ns, Some(ms_to_ns(400)));
        assert_eq!(subs[1].received_at_ns, Some(ms_to_ns(600)));
        assert_eq!(subs[0].retries, 1);
        assert!(!subs[0].possible_duplicate);
        assert_eq!(pipeline.counters().retried, 1);
        assert_eq!(pipeline.workers()[0].completed, 3);
    }

    #[test]
    fn success_after_retry_can_be_flagged_duplicate() {
        let config = ParallelConfig {
            subscribers: 1,
            workers: 1,
            ..ParallelConfig::default()
        };
        let mut pipeline = ParallelPipeline::new(config);
        // Fail, then succeed with a duplicate draw below 0.3.
        let mut rng = ScriptedRng::new(vec![0.0, 0.0, 0.9, 0.0, 0.1]);
        run_to_end(&mut pipeline, &mut rng);

        assert!(pipeline.subscribers()[0].possible_duplicate);
        assert_eq!(pipeline.counters().possible_duplicates, 1);
        assert_eq!(pipeline.outcome(), Some(RunOutcome::Complete));
    }

    #[test]
    fn workers_come_online_staggered() {
        let mut pipeline = ParallelPipeline::new(ParallelConfig::default());
        pipeline.start();
        let mut rng = ScriptedRng::constant(0.9);
        pipeline.advance(ms_to_ns(50), &mut rng);
        let busy = |p: &ParallelPipeline| {
            p.workers()
                .iter()
                .filter(|w| w.state == WorkerState::Busy)
                .count()
        };
        assert_eq!(busy(&pipeline), 1);
        pipeline.advance(ms_to_ns(100), &mut rng);
        assert_eq!(busy(&pipeline), 2);
        pipeline.advance(ms_to_ns(100), &mut rng);
        assert_eq!(busy(&pipeline), 3);
    }

    proptest! {
        #[test]
        fn every_subscriber_settles(seed in any::<u64>()) {
            let mut pipeline = ParallelPipeline::new(ParallelConfig::default());
            run_to_end(&mut pipeline, &mut SimRng::new(seed));

            let counters = pipeline.counters();
            prop_assert_eq!(counters.sent + counters.failed, 8);
            prop_assert!(counters.retried <= 16);
            let retried_successes = pipeline
                .subscribers()
                .iter()
                .filter(|s| s.status == DeliveryStatus::Success && s.retries > 0)
                .count() as u64;
            prop_assert!(counters.possible_duplicates <= retried_successes);
            prop_assert!(!pipeline.is_running());
        }
    }
}
