//! Auto-scaling controller.
//!
//! Three independent tickers drive the fleet:
//!
//! - **evaluate** (2 s): compare average CPU of healthy instances against the
//!   scale-up and scale-down thresholds and add or retire at most one instance
//! - **lifecycle** (500 ms): promote `Starting` instances once warmed up and
//!   purge `Terminating` instances once drained
//! - **load** (200 ms): move each healthy instance's CPU and memory toward a
//!   traffic-dependent target by a fixed smoothing fraction
//!
//! Response time and cost are derived on demand and hold no state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::{ms_to_ns, ns_to_ms};
use crate::driver::Simulation;
use crate::explain::{Explanation, ExplanationLog};
use crate::rng::Rng;
use crate::timer::TimerScope;

/// Controller knobs.
///
/// Valid ranges: scale-up 50–95 %, scale-down 10–50 %, min 1–4, max 2–10,
/// traffic 10–500 req/s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscalerConfig {
    pub scale_up_threshold_pct: f64,
    pub scale_down_threshold_pct: f64,
    pub min_instances: usize,
    pub max_instances: usize,
    /// Incoming requests per second across the fleet.
    pub traffic_rps: f64,
    pub auto_scaling_enabled: bool,
    pub evaluation_interval_ms: u64,
    pub lifecycle_interval_ms: u64,
    pub load_interval_ms: u64,
    /// Time from creation until a starting instance turns healthy.
    pub warm_up_ms: u64,
    /// Time from entering `Terminating` until the instance is removed.
    pub drain_ms: u64,
    /// Fraction of the gap to target closed per load tick.
    pub smoothing: f64,
    pub cost_per_instance_hour: f64,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            scale_up_threshold_pct: 70.0,
            scale_down_threshold_pct: 30.0,
            min_instances: 1,
            max_instances: 8,
            traffic_rps: 50.0,
            auto_scaling_enabled: true,
            evaluation_interval_ms: 2_000,
            lifecycle_interval_ms: 500,
            load_interval_ms: 200,
            warm_up_ms: 3_000,
            drain_ms: 5_000,
            smoothing: 0.1,
            cost_per_instance_hour: 0.05,
        }
    }
}

impl AutoscalerConfig {
    pub fn with_bounds(mut self, min_instances: usize, max_instances: usize) -> Self {
        self.min_instances = min_instances;
        self.max_instances = max_instances;
        self
    }

    pub fn with_thresholds(mut self, scale_up_pct: f64, scale_down_pct: f64) -> Self {
        self.scale_up_threshold_pct = scale_up_pct;
        self.scale_down_threshold_pct = scale_down_pct;
        self
    }

    pub fn with_traffic_rps(mut self, traffic_rps: f64) -> Self {
        self.traffic_rps = traffic_rps;
        self
    }
}

// ============================================================================
// Instances
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Starting,
    Healthy,
    Unhealthy,
    Terminating,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::Healthy => "healthy",
            InstanceStatus::Unhealthy => "unhealthy",
            InstanceStatus::Terminating => "terminating",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerInstance {
    pub id: String,
    pub status: InstanceStatus,
    pub cpu_pct: f64,
    pub memory_pct: f64,
    pub requests_per_sec: f64,
    pub created_at_ns: u64,
    pub terminating_since_ns: Option<u64>,
}

/// Outcome of one evaluation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScalingDecision {
    ScaleUp,
    ScaleDown,
    Hold,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScalingCounters {
    pub scale_ups: u64,
    pub scale_downs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoscalerSnapshot {
    pub now_ms: u64,
    pub running: bool,
    pub instances: Vec<ServerInstance>,
    pub healthy: usize,
    pub starting: usize,
    pub terminating: usize,
    pub traffic_rps: f64,
    pub average_cpu_pct: f64,
    pub response_time_ms: f64,
    pub cost_per_hour: f64,
    pub counters: ScalingCounters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalerTimer {
    Evaluate,
    Lifecycle,
    Load,
}

// ============================================================================
// Controller
// ============================================================================

#[derive(Debug, Clone)]
pub struct Autoscaler {
    config: AutoscalerConfig,
    instances: Vec<ServerInstance>,
    next_instance: u64,
    counters: ScalingCounters,
    running: bool,
    timers: TimerScope<ScalerTimer>,
    log: ExplanationLog,
}

impl Autoscaler {
    pub fn new(config: AutoscalerConfig) -> Self {
        let mut scaler = Self {
            config,
            instances: Vec::new(),
            next_instance: 1,
            counters: ScalingCounters::default(),
            running: false,
            timers: TimerScope::new(),
            log: ExplanationLog::new(Self::NAME),
        };
        for _ in 0..scaler.config.min_instances.max(1) {
            let id = scaler.next_id();
            scaler.instances.push(ServerInstance {
                id,
                status: InstanceStatus::Healthy,
                cpu_pct: 30.0,
                memory_pct: 40.0,
                requests_per_sec: 50.0,
                created_at_ns: 0,
                terminating_since_ns: None,
            });
        }
        scaler
    }

    fn next_id(&mut self) -> String {
        let id = format!("server-{}", self.next_instance);
        self.next_instance += 1;
        id
    }

    pub fn config(&self) -> &AutoscalerConfig {
        &self.config
    }

    pub fn instances(&self) -> &[ServerInstance] {
        &self.instances
    }

    pub fn counters(&self) -> ScalingCounters {
        self.counters
    }

    pub fn count(&self, status: InstanceStatus) -> usize {
        self.instances.iter().filter(|i| i.status == status).count()
    }

    pub fn healthy_count(&self) -> usize {
        self.count(InstanceStatus::Healthy)
    }

    /// Average CPU over healthy instances, 0 when none are healthy.
    pub fn average_cpu(&self) -> f64 {
        let healthy: Vec<_> = self
            .instances
            .iter()
            .filter(|i| i.status == InstanceStatus::Healthy)
            .collect();
        if healthy.is_empty() {
            return 0.0;
        }
        healthy.iter().map(|i| i.cpu_pct).sum::<f64>() / healthy.len() as f64
    }

    /// `50 + traffic / (healthy * 100) * 200` ms; the load term is 0 with no
    /// healthy instances.
    pub fn response_time_ms(&self) -> f64 {
        let healthy = self.healthy_count();
        let load_factor = if healthy == 0 {
            0.0
        } else {
            self.config.traffic_rps / (healthy as f64 * 100.0)
        };
        50.0 + load_factor * 200.0
    }

    /// Hourly cost of every instance in the fleet, whatever its status.
    pub fn cost_per_hour(&self) -> f64 {
        self.instances.len() as f64 * self.config.cost_per_instance_hour
    }

    pub fn set_traffic_level(&mut self, traffic_rps: f64) {
        self.config.traffic_rps = traffic_rps;
    }

    pub fn set_thresholds(&mut self, scale_up_pct: f64, scale_down_pct: f64) {
        self.config.scale_up_threshold_pct = scale_up_pct;
        self.config.scale_down_threshold_pct = scale_down_pct;
    }

    pub fn set_bounds(&mut self, min_instances: usize, max_instances: usize) {
        self.config.min_instances = min_instances;
        self.config.max_instances = max_instances;
    }

    /// Turns the evaluation loop on or off. Lifecycle and load keep running.
    pub fn set_auto_scaling(&mut self, enabled: bool) {
        self.config.auto_scaling_enabled = enabled;
        self.timers.cancel_where(|t| *t == ScalerTimer::Evaluate);
        if enabled && self.running {
            self.arm_evaluation();
        }
    }

    fn arm_evaluation(&mut self) {
        self.timers.every(
            ms_to_ns(self.config.evaluation_interval_ms),
            ScalerTimer::Evaluate,
        );
    }

    /// Runs one evaluation of the control loop.
    pub fn evaluate(&mut self) -> ScalingDecision {
        let now = self.timers.now();
        let avg_cpu = self.average_cpu();
        let healthy = self.healthy_count();
        let starting = self.count(InstanceStatus::Starting);

        if avg_cpu > self.config.scale_up_threshold_pct
            && healthy + starting < self.config.max_instances
        {
            let id = self.next_id();
            self.log.notable(
                now,
                format!(
                    "Scaling UP: CPU at {avg_cpu:.0}% exceeds {:.0}% threshold, starting {id}",
                    self.config.scale_up_threshold_pct
                ),
            );
            self.instances.push(ServerInstance {
                id,
                status: InstanceStatus::Starting,
                cpu_pct: 0.0,
                memory_pct: 0.0,
                requests_per_sec: 0.0,
                created_at_ns: now,
                terminating_since_ns: None,
            });
            self.counters.scale_ups += 1;
            return ScalingDecision::ScaleUp;
        }

        if avg_cpu < self.config.scale_down_threshold_pct && healthy > self.config.min_instances {
            if let Some(victim) = self
                .instances
                .iter_mut()
                .find(|i| i.status == InstanceStatus::Healthy)
            {
                victim.status = InstanceStatus::Terminating;
                victim.terminating_since_ns = Some(now);
                let id = victim.id.clone();
                self.log.notable(
                    now,
                    format!(
                        "Scaling DOWN: CPU at {avg_cpu:.0}% below {:.0}% threshold, terminating {id}",
                        self.config.scale_down_threshold_pct
                    ),
                );
                self.counters.scale_downs += 1;
                return ScalingDecision::ScaleDown;
            }
        }

        ScalingDecision::Hold
    }

    fn advance_lifecycle(&mut self) {
        let now = self.timers.now();
        let warm_up = ms_to_ns(self.config.warm_up_ms);
        let drain = ms_to_ns(self.config.drain_ms);

        for instance in &mut self.instances {
            if instance.status == InstanceStatus::Starting
                && now.saturating_sub(instance.created_at_ns) >= warm_up
            {
                instance.status = InstanceStatus::Healthy;
                instance.cpu_pct = 20.0;
                instance.memory_pct = 30.0;
                self.log
                    .detail(now, format!("{} warmed up and is now healthy", instance.id));
            }
        }

        let log = &mut self.log;
        self.instances.retain(|instance| {
            let drained = instance.status == InstanceStatus::Terminating
                && instance
                    .terminating_since_ns
                    .is_some_and(|since| now.saturating_sub(since) >= drain);
            if drained {
                log.detail(now, format!("{} drained and removed", instance.id));
            }
            !drained
        });
    }

    fn apply_load<R: Rng>(&mut self, rng: &mut R) {
        let healthy = self.healthy_count().max(1);
        let rps = self.config.traffic_rps / healthy as f64;
        let smoothing = self.config.smoothing;

        for instance in &mut self.instances {
            if instance.status != InstanceStatus::Healthy {
                continue;
            }
            let target_cpu = (rps / 100.0 * 80.0 + rng.range_f64(0.0, 10.0)).min(95.0);
            let target_memory = (rps / 100.0 * 60.0 + rng.range_f64(0.0, 10.0)).min(90.0);
            instance.cpu_pct += (target_cpu - instance.cpu_pct) * smoothing;
            instance.memory_pct += (target_memory - instance.memory_pct) * smoothing;
            instance.requests_per_sec = rps.round();
        }
    }

    fn on_timer<R: Rng>(&mut self, timer: ScalerTimer, rng: &mut R) {
        match timer {
            ScalerTimer::Evaluate => {
                self.evaluate();
            }
            ScalerTimer::Lifecycle => self.advance_lifecycle(),
            ScalerTimer::Load => self.apply_load(rng),
        }
    }
}

impl Simulation for Autoscaler {
    type Snapshot = AutoscalerSnapshot;
    const NAME: &'static str = "autoscaler";

    fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.timers.every(
            ms_to_ns(self.config.lifecycle_interval_ms),
            ScalerTimer::Lifecycle,
        );
        self.timers
            .every(ms_to_ns(self.config.load_interval_ms), ScalerTimer::Load);
        if self.config.auto_scaling_enabled {
            self.arm_evaluation();
        }
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
            self.on_timer(fired.kind, rng);
        }
        self.timers.settle(deadline);
    }

    fn snapshot(&self) -> AutoscalerSnapshot {
        AutoscalerSnapshot {
            now_ms: ns_to_ms(self.timers.now()),
            running: self.running,
            instances: self.instances.clone(),
            healthy: self.healthy_count(),
            starting: self.count(InstanceStatus::Starting),
            terminating: self.count(InstanceStatus::Terminating),
            traffic_rps: self.config.traffic_rps,
            average_cpu_pct: self.average_cpu(),
            response_time_ms: self.response_time_ms(),
            cost_per_hour: self.cost_per_hour(),
            counters: self.counters,
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

    fn force_cpu(scaler: &mut Autoscaler, cpu: f64) {
        for instance in &mut scaler.instances {
            if instance.status == InstanceStatus::Healthy {
                instance.cpu_pct = cpu;
            }
        }
    }

    #[test]
    fn initial_fleet() {
        let scaler = Autoscaler::new(AutoscalerConfig::default());
        assert_eq!(scaler.instances().len(), 1);
        let first = &scaler.instances()[0];
        assert_eq!(first.status, InstanceStatus::Healthy);
        assert!((first.cpu_pct - 30.0).abs() < f64::EPSILON);
        assert!((scaler.cost_per_hour() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn sustained_high_cpu_scales_to_max_and_no_further() {
        let mut scaler = Autoscaler::new(AutoscalerConfig::default().with_bounds(1, 4));
        scaler.start();
        let mut rng = ScriptedRng::constant(0.5);
        for _ in 0..40 {
            scaler.advance(ms_to_ns(500), &mut rng);
            force_cpu(&mut scaler, 90.0);
            let active = scaler.healthy_count() + scaler.count(InstanceStatus::Starting);
            assert!(active <= 4);
        }
        assert_eq!(scaler.healthy_count(), 4);
        assert_eq!(scaler.counters().scale_ups, 3);
    }

    #[test]
    fn low_cpu_scales_down_to_min() {
        let mut scaler = Autoscaler::new(AutoscalerConfig::default().with_bounds(2, 8));
        assert_eq!(scaler.healthy_count(), 2);
        force_cpu(&mut scaler, 5.0);
        assert_eq!(scaler.evaluate(), ScalingDecision::Hold);

        scaler.set_bounds(1, 8);
        assert_eq!(scaler.evaluate(), ScalingDecision::ScaleDown);
        assert_eq!(scaler.instances()[0].status, InstanceStatus::Terminating);
        assert_eq!(scaler.evaluate(), ScalingDecision::Hold);
    }

    #[test]
    fn warm_up_and_drain_timing() {
        let mut scaler = Autoscaler::new(AutoscalerConfig::default());
        scaler.start();
        let mut rng = ScriptedRng::constant(0.0);
        force_cpu(&mut scaler, 99.0);
        assert_eq!(scaler.evaluate(), ScalingDecision::ScaleUp);

        scaler.advance(ms_to_ns(2_999), &mut rng);
        assert_eq!(scaler.count(InstanceStatus::Starting), 1);
        scaler.advance(ms_to_ns(1), &mut rng);
        assert_eq!(scaler.healthy_count(), 2);
        let warmed = &scaler.instances()[1];
        assert!(warmed.cpu_pct <= 20.0 + f64::EPSILON);

        // Drain is measured from termination, not creation.
        scaler.stop();
        force_cpu(&mut scaler, 1.0);
        assert_eq!(scaler.evaluate(), ScalingDecision::ScaleDown);
        scaler.start();
        scaler.advance(ms_to_ns(4_500), &mut rng);
        assert_eq!(scaler.count(InstanceStatus::Terminating), 1);
        scaler.advance(ms_to_ns(500), &mut rng);
        assert_eq!(scaler.count(InstanceStatus::Terminating), 0);
        assert_eq!(scaler.instances().len(), 1);
    }

    #[test]
    fn load_moves_cpu_by_smoothing_fraction() {
        let mut scaler = Autoscaler::new(AutoscalerConfig::default().with_traffic_rps(100.0));
        scaler.set_auto_scaling(false);
        scaler.start();
        // Target cpu = 80 + 0, start 30: one tick moves 10% of the gap.
        scaler.advance(ms_to_ns(200), &mut ScriptedRng::constant(0.0));
        let cpu = scaler.instances()[0].cpu_pct;
        assert!((cpu - 35.0).abs() < 1e-9, "cpu = {cpu}");
        assert!((scaler.instances()[0].requests_per_sec - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn derived_outputs_with_no_healthy_instances() {
        let mut scaler = Autoscaler::new(AutoscalerConfig::default());
        scaler.instances[0].status = InstanceStatus::Unhealthy;
        assert!(scaler.average_cpu().abs() < f64::EPSILON);
        assert!((scaler.response_time_ms() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn response_time_formula() {
        let scaler = Autoscaler::new(AutoscalerConfig::default().with_traffic_rps(200.0));
        assert!((scaler.response_time_ms() - 450.0).abs() < 1e-9);
    }

    #[test]
    fn disabled_auto_scaling_never_evaluates() {
        let mut scaler = Autoscaler::new(AutoscalerConfig::default().with_traffic_rps(500.0));
        scaler.set_auto_scaling(false);
        scaler.start();
        scaler.advance(ms_to_ns(30_000), &mut SimRng::new(3));
        assert_eq!(scaler.counters(), ScalingCounters::default());
        assert!(scaler.average_cpu() > 70.0);
    }

    proptest! {
        #[test]
        fn fleet_stays_within_bounds(
            seed in any::<u64>(),
            min in 1usize..4,
            extra in 1usize..6,
            traffic in prop::collection::vec(10.0f64..500.0, 1..30),
        ) {
            let max = min + extra;
            let mut scaler = Autoscaler::new(AutoscalerConfig::default().with_bounds(min, max));
            scaler.start();
            let mut rng = SimRng::new(seed);
            for rps in traffic {
                scaler.set_traffic_level(rps);
                let before = scaler.counters();
                scaler.advance(ms_to_ns(2_000), &mut rng);
                let after = scaler.counters();
                prop_assert!(scaler.healthy_count() + scaler.count(InstanceStatus::Starting) <= max);
                prop_assert!(scaler.healthy_count() >= min);
                // one evaluation per 2 s window: never both directions
                prop_assert!(
                    (after.scale_ups - before.scale_ups) + (after.scale_downs - before.scale_downs) <= 1
                );
            }
        }
    }
}
