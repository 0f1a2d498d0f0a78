//! Tier 1: one subscriber at a time.
//!
//! Each subscriber gets an independent latency and failure draw. A failure
//! is terminal for that subscriber and the next one starts only when the
//! previous delivery finished, so the run takes the sum of all latencies.

use serde::{Deserialize, Serialize};

use crate::clock::{ms_f64_to_ns, ns_to_ms, ns_to_ms_f64};
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
pub struct SequentialConfig {
    pub subscribers: usize,
    pub failure_probability: f64,
    pub slow_probability: f64,
    pub fast_latency_min_ms: f64,
    pub fast_latency_max_ms: f64,
    pub slow_latency_min_ms: f64,
    pub slow_latency_max_ms: f64,
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            subscribers: 5,
            failure_probability: 0.3,
            slow_probability: 0.4,
            fast_latency_min_ms: 100.0,
            fast_latency_max_ms: 300.0,
            slow_latency_min_ms: 800.0,
            slow_latency_max_ms: 2_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequentialTimer {
    Begin,
    Delivered {
        index: usize,
        failed: bool,
        slow: bool,
        latency_ns: u64,
    },
}

#[derive(Debug, Clone)]
pub struct SequentialPipeline {
    config: SequentialConfig,
    subscribers: Vec<Subscriber>,
    counters: DeliveryCounters,
    window: RunWindow,
    current: Option<usize>,
    timers: TimerScope<SequentialTimer>,
    log: ExplanationLog,
}

impl SequentialPipeline {
    pub fn new(config: SequentialConfig) -> Self {
        Self {
            subscribers: roster(config.subscribers),
            config,
            counters: DeliveryCounters::default(),
            window: RunWindow::default(),
            current: None,
            timers: TimerScope::new(),
            log: ExplanationLog::new(Self::NAME),
        }
    }

    pub fn config(&self) -> &SequentialConfig {
        &self.config
    }

    fn dispatch<R: Rng>(&mut self, index: usize, rng: &mut R) {
        let Some(subscriber) = self.subscribers.get_mut(index) else {
            self.finish();
            return;
        };
        subscriber.status = DeliveryStatus::Receiving;
        self.current = Some(index);

        let failed = rng.chance(self.config.failure_probability);
        let slow = rng.chance(self.config.slow_probability);
        let latency_ms = if slow {
            rng.range_f64(self.config.slow_latency_min_ms, self.config.slow_latency_max_ms)
        } else {
            rng.range_f64(self.config.fast_latency_min_ms, self.config.fast_latency_max_ms)
        };
        let latency_ns = ms_f64_to_ns(latency_ms);

        self.timers.after(
            latency_ns,
            SequentialTimer::Delivered {
                index,
                failed,
                slow,
                latency_ns,
            },
        );
    }

    fn delivered<R: Rng>(
        &mut self,
        index: usize,
        failed: bool,
        slow: bool,
        latency_ns: u64,
        rng: &mut R,
    ) {
        let now = self.timers.now();
        if let Some(subscriber) = self.subscribers.get_mut(index) {
            subscriber.latency_ns = Some(latency_ns);
            self.counters.total_latency_ns += latency_ns;
            if failed {
                subscriber.status = DeliveryStatus::Failed;
                self.counters.failed += 1;
                self.log.detail(
                    now,
                    format!(
                        "Failed to deliver to {} after {:.0}ms",
                        subscriber.name,
                        ns_to_ms_f64(latency_ns)
                    ),
                );
            } else {
                subscriber.status = if slow {
                    DeliveryStatus::Slow
                } else {
                    DeliveryStatus::Success
                };
                subscriber.received_at_ns = Some(now);
                self.counters.sent += 1;
                self.log.detail(
                    now,
                    format!(
                        "Delivered to {} in {:.0}ms{}",
                        subscriber.name,
                        ns_to_ms_f64(latency_ns),
                        if slow { " (slow)" } else { "" }
                    ),
                );
            }
        }
        self.dispatch(index + 1, rng);
    }

    fn finish(&mut self) {
        let now = self.timers.now();
        self.current = None;
        self.window.finish(now);
        self.log.notable(
            now,
            format!(
                "Sequential run finished in {}ms: {} delivered, {} failed, no retries",
                ns_to_ms(self.window.elapsed_ns(now)),
                self.counters.sent,
                self.counters.failed
            ),
        );
    }
}

impl DeliveryPipeline for SequentialPipeline {
    fn tier(&self) -> Tier {
        Tier::Basic
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

impl Simulation for SequentialPipeline {
    type Snapshot = NotifySnapshot;
    const NAME: &'static str = "notify-sequential";

    fn start(&mut self) {
        if self.is_running() {
            return;
        }
        for subscriber in &mut self.subscribers {
            subscriber.clear();
        }
        self.counters = DeliveryCounters::default();
        self.window.begin(self.timers.now());
        self.timers.after(0, SequentialTimer::Begin);
        self.log
            .notable(self.timers.now(), "Sending notification to each subscriber in turn");
    }

    fn stop(&mut self) {
        self.timers.cancel_all();
        self.current = None;
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
                SequentialTimer::Begin => self.dispatch(0, rng),
                SequentialTimer::Delivered {
                    index,
                    failed,
                    slow,
                    latency_ns,
                } => self.delivered(index, failed, slow, latency_ns, rng),
            }
        }
        self.timers.settle(deadline);
    }

    fn snapshot(&self) -> NotifySnapshot {
        snapshot_of(
            self,
            TierDetail::Sequential {
                current: self.current,
            },
        )
    }

    fn drain_explanations(&mut self) -> Vec<Explanation> {
        self.log.drain()
    }
}
