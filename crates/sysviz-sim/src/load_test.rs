//! Load test simulator.
//!
//! Pushes `users * requests_per_user` requests through a tier's capacity
//! profile in fixed batches. A run that exceeds the tier's concurrent-user
//! capacity is overloaded: its failure rate doubles and latency grows with
//! the overload factor (capped).

use serde::{Deserialize, Serialize};

use crate::clock::{NS_PER_SEC, ms_to_ns, ns_to_ms};
use crate::driver::Simulation;
use crate::explain::{Explanation, ExplanationLog};
use crate::rng::Rng;
use crate::tier::Tier;
use crate::timer::TimerScope;

/// What a tier can sustain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadProfile {
    pub max_throughput_rps: f64,
    pub base_latency_ms: f64,
    pub failure_rate: f64,
}

impl LoadProfile {
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Basic => Self {
                max_throughput_rps: 100.0,
                base_latency_ms: 250.0,
                failure_rate: 0.15,
            },
            Tier::Advanced => Self {
                max_throughput_rps: 5_000.0,
                base_latency_ms: 25.0,
                failure_rate: 0.05,
            },
            Tier::Legendary => Self {
                max_throughput_rps: 50_000.0,
                base_latency_ms: 5.0,
                failure_rate: 0.01,
            },
        }
    }

    /// Concurrent users the tier serves without degrading.
    pub fn user_capacity(&self) -> f64 {
        self.max_throughput_rps / 10.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadTestConfig {
    pub tier: Tier,
    pub users: u64,
    pub requests_per_user: u64,
    pub batches: u64,
    pub batch_interval_ms: u64,
    pub latency_jitter_ms: f64,
    /// Cap on the latency multiplier under overload.
    pub max_load_factor: f64,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            tier: Tier::Basic,
            users: 100,
            requests_per_user: 10,
            batches: 50,
            batch_interval_ms: 100,
            latency_jitter_ms: 10.0,
            max_load_factor: 3.0,
        }
    }
}

impl LoadTestConfig {
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_users(mut self, users: u64) -> Self {
        self.users = users;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LoadTestStats {
    pub total: u64,
    pub processed: u64,
    pub success: u64,
    pub failed: u64,
    pub progress_pct: f64,
    pub avg_latency_ms: f64,
    /// Processed requests per simulated second.
    pub throughput_rps: f64,
    /// Simulated time until the last batch.
    pub eta_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadTestSnapshot {
    pub now_ms: u64,
    pub running: bool,
    pub tier: Tier,
    pub users: u64,
    pub overloaded: bool,
    pub profile: LoadProfile,
    pub stats: LoadTestStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadTimer {
    Batch,
}

#[derive(Debug, Clone)]
pub struct LoadTest {
    config: LoadTestConfig,
    profile: LoadProfile,
    processed: u64,
    success: u64,
    failed: u64,
    latency_sum_ms: f64,
    started_at_ns: Option<u64>,
    finished_at_ns: Option<u64>,
    running: bool,
    timers: TimerScope<LoadTimer>,
    log: ExplanationLog,
}

impl LoadTest {
    pub fn new(config: LoadTestConfig) -> Self {
        Self {
            profile: LoadProfile::for_tier(config.tier),
            config,
            processed: 0,
            success: 0,
            failed: 0,
            latency_sum_ms: 0.0,
            started_at_ns: None,
            finished_at_ns: None,
            running: false,
            timers: TimerScope::new(),
            log: ExplanationLog::new(Self::NAME),
        }
    }

    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }

    pub fn profile(&self) -> LoadProfile {
        self.profile
    }

    pub fn total_requests(&self) -> u64 {
        self.config
            .users
            .saturating_mul(self.config.requests_per_user)
    }

    pub fn batch_size(&self) -> u64 {
        self.total_requests().div_ceil(self.config.batches.max(1))
    }

    pub fn is_overloaded(&self) -> bool {
        self.config.users as f64 > self.profile.user_capacity()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at_ns.is_some()
    }

    /// Changes the user count. Takes effect on the next start.
    pub fn set_users(&mut self, users: u64) {
        self.config.users = users;
    }

    pub fn set_tier(&mut self, tier: Tier) {
        self.config.tier = tier;
        self.profile = LoadProfile::for_tier(tier);
    }

    pub fn stats(&self) -> LoadTestStats {
        let total = self.total_requests();
        let now = self.timers.now();
        let elapsed_ns = match self.started_at_ns {
            Some(start) => self.finished_at_ns.unwrap_or(now).saturating_sub(start),
            None => 0,
        };
        let remaining_batches = total
            .saturating_sub(self.processed)
            .div_ceil(self.batch_size().max(1));

        LoadTestStats {
            total,
            processed: self.processed,
            success: self.success,
            failed: self.failed,
            progress_pct: if total == 0 {
                if self.is_finished() { 100.0 } else { 0.0 }
            } else {
                self.processed as f64 / total as f64 * 100.0
            },
            avg_latency_ms: if self.processed == 0 {
                0.0
            } else {
                self.latency_sum_ms / self.processed as f64
            },
            throughput_rps: if elapsed_ns == 0 {
                0.0
            } else {
                self.processed as f64 * NS_PER_SEC as f64 / elapsed_ns as f64
            },
            eta_ms: remaining_batches.saturating_mul(self.config.batch_interval_ms),
        }
    }

    fn batch<R: Rng>(&mut self, rng: &mut R) {
        let total = self.total_requests();
        let size = self.batch_size().min(total.saturating_sub(self.processed));

        let failure_rate = if self.is_overloaded() {
            self.profile.failure_rate * 2.0
        } else {
            self.profile.failure_rate
        };
        let success = ((size as f64) * (1.0 - failure_rate))
            .round()
            .clamp(0.0, size as f64) as u64;
        let success = success.min(size);
        let capacity = self.profile.user_capacity();
        let load_factor = if capacity > 0.0 {
            (self.config.users as f64 / capacity).min(self.config.max_load_factor)
        } else {
            self.config.max_load_factor
        };
        let latency_ms = self.profile.base_latency_ms * load_factor
            + rng.range_f64(0.0, self.config.latency_jitter_ms);

        self.processed += size;
        self.success += success;
        self.failed += size - success;
        self.latency_sum_ms += latency_ms * size as f64;
        self.log.detail(
            self.timers.now(),
            format!("Batch of {size}: {success} ok at {latency_ms:.1}ms"),
        );

        if self.processed >= total {
            self.finish();
        }
    }

    fn finish(&mut self) {
        let now = self.timers.now();
        self.finished_at_ns = Some(now);
        self.running = false;
        self.timers.cancel_all();
        let stats = self.stats();
        self.log.notable(
            now,
            format!(
                "Load test done: {} ok, {} failed, avg {:.1}ms, {:.0} req/s",
                stats.success, stats.failed, stats.avg_latency_ms, stats.throughput_rps
            ),
        );
    }
}

impl Simulation for LoadTest {
    type Snapshot = LoadTestSnapshot;
    const NAME: &'static str = "load-test";

    fn start(&mut self) {
        if self.running {
            return;
        }
        let now = self.timers.now();
        self.processed = 0;
        self.success = 0;
        self.failed = 0;
        self.latency_sum_ms = 0.0;
        self.started_at_ns = Some(now);
        self.finished_at_ns = None;
        self.running = true;

        self.log.notable(
            now,
            format!(
                "{} users against {} tier ({} requests in batches of {})",
                self.config.users,
                self.config.tier,
                self.total_requests(),
                self.batch_size()
            ),
        );
        if self.is_overloaded() {
            self.log.notable(
                now,
                format!(
                    "Overloaded: {} users exceed capacity of {:.0}, failure rate doubled",
                    self.config.users,
                    self.profile.user_capacity()
                ),
            );
        }

        if self.total_requests() == 0 {
            self.finish();
            return;
        }
        self.timers
            .every(ms_to_ns(self.config.batch_interval_ms), LoadTimer::Batch);
    }

    fn stop(&mut self) {
        self.running = false;
        self.timers.cancel_all();
    }

    fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn now(&self) -> u64 {
        self.timers.now()
    }

    fn advance<R: Rng>(&mut self, elapsed_ns: u64, rng: &mut R) {
        let deadline = self.timers.now().saturating_add(elapsed_ns);
        while let Some(fired) = self.timers.pop_due(deadline) {
            match fired.kind {
                LoadTimer::Batch => self.batch(rng),
            }
        }
        self.timers.settle(deadline);
    }

    fn snapshot(&self) -> LoadTestSnapshot {
        LoadTestSnapshot {
            now_ms: ns_to_ms(self.timers.now()),
            running: self.running,
            tier: self.config.tier,
            users: self.config.users,
            overloaded: self.is_overloaded(),
            profile: self.profile,
            stats: self.stats(),
        }
    }

    fn drain_explanations(&mut self) -> Vec<Explanation> {
        self.log.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{ScriptedRng, SimRng};
    use proptest::prelude::*;
    use test_case::test_case;

    fn run_to_end(test: &mut LoadTest) {
        test.start();
        test.advance(ms_to_ns(60_000), &mut ScriptedRng::constant(0.0));
        assert!(test.is_finished());
    }

    #[test]
    fn basic_tier_overloads_at_hundred_users() {
        let mut test = LoadTest::new(LoadTestConfig::default());
        assert!(test.is_overloaded());
        run_to_end(&mut test);

        let stats = test.stats();
        assert_eq!(stats.total, 1_000);
        assert_eq!(stats.success, 700);
        assert_eq!(stats.failed, 300);
        assert!((stats.avg_latency_ms - 750.0).abs() < 1e-9);
        assert!((stats.throughput_rps - 200.0).abs() < 1e-9);
        assert_eq!(stats.progress_pct, 100.0);
        assert_eq!(stats.eta_ms, 0);
        assert_eq!(test.now(), ms_to_ns(60_000));
    }

    #[test]
    fn legendary_tier_absorbs_hundred_users() {
        let mut test = LoadTest::new(LoadTestConfig::default().with_tier(Tier::Legendary));
        assert!(!test.is_overloaded());
        run_to_end(&mut test);

        let stats = test.stats();
        assert_eq!(stats.success, 1_000);
        assert_eq!(stats.failed, 0);
        assert!((stats.avg_latency_ms - 0.1).abs() < 1e-9);
    }

    #[test_case(100, 20, 50)]
    #[test_case(7, 2, 35)]
    #[test_case(1, 1, 10)]
    fn batching(users: u64, batch_size: u64, batches: u64) {
        let mut test = LoadTest::new(LoadTestConfig::default().with_users(users));
        assert_eq!(test.batch_size(), batch_size);
        test.start();
        test.advance(ms_to_ns(100 * batches) - 1, &mut SimRng::new(1));
        assert!(!test.is_finished());
        test.advance(1, &mut SimRng::new(1));
        assert!(test.is_finished());
        assert_eq!(test.stats().processed, users * 10);
    }

    #[test]
    fn zero_users_finishes_immediately() {
        let mut test = LoadTest::new(LoadTestConfig::default().with_users(0));
        test.start();
        assert!(test.is_finished());
        assert!(!test.is_running());
        assert_eq!(test.stats().progress_pct, 100.0);
    }

    #[test]
    fn huge_user_count_saturates_total() {
        let mut test = LoadTest::new(LoadTestConfig::default().with_users(u64::MAX));
        assert_eq!(test.total_requests(), u64::MAX);
        run_to_end(&mut test);

        let stats = test.stats();
        assert_eq!(stats.processed, u64::MAX);
        assert_eq!(stats.success + stats.failed, u64::MAX);
        assert_eq!(stats.eta_ms, 0);
    }

    #[test]
    fn progress_and_eta_midway() {
        let mut test = LoadTest::new(LoadTestConfig::default());
        test.start();
        test.advance(ms_to_ns(2_500), &mut SimRng::new(2));
        let stats = test.stats();
        assert_eq!(stats.processed, 500);
        assert_eq!(stats.progress_pct, 50.0);
        assert_eq!(stats.eta_ms, 2_500);
    }

    proptest! {
        #[test]
        fn counts_add_up(users in 0u64..5_000, tier in prop::sample::select(Tier::ALL.to_vec()), seed in any::<u64>()) {
            let mut test = LoadTest::new(LoadTestConfig::default().with_tier(tier).with_users(users));
            test.start();
            test.advance(ms_to_ns(10_000), &mut SimRng::new(seed));
            let stats = test.stats();
            prop_assert!(test.is_finished());
            prop_assert_eq!(stats.processed, users * 10);
            prop_assert_eq!(stats.success + stats.failed, stats.processed);
        }
    }
}
