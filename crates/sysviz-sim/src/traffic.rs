//! Traffic pattern generator.
//!
//! Each pattern is a pure function of the tick count `t`, a baseline and one
//! noise draw. The generator advances `t` once per tick, keeps a bounded
//! history and classifies the current rate against a fixed capacity.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::clock::{ms_to_ns, ns_to_ms};
use crate::driver::Simulation;
use crate::error::SimError;
use crate::explain::{Explanation, ExplanationLog};
use crate::rng::Rng;
use crate::timer::TimerScope;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficPattern {
    #[default]
    Steady,
    Gradual,
    Burst,
    Spike,
    Regional,
}

impl TrafficPattern {
    pub const ALL: [TrafficPattern; 5] = [
        TrafficPattern::Steady,
        TrafficPattern::Gradual,
        TrafficPattern::Burst,
        TrafficPattern::Spike,
        TrafficPattern::Regional,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TrafficPattern::Steady => "steady",
            TrafficPattern::Gradual => "gradual",
            TrafficPattern::Burst => "burst",
            TrafficPattern::Spike => "spike",
            TrafficPattern::Regional => "regional",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TrafficPattern::Steady => "Steady",
            TrafficPattern::Gradual => "Gradual Increase",
            TrafficPattern::Burst => "Burst Traffic",
            TrafficPattern::Spike => "Viral Spike",
            TrafficPattern::Regional => "Regional Distribution",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            TrafficPattern::Steady => "Consistent traffic with minor variations",
            TrafficPattern::Gradual => "Traffic slowly increases over time",
            TrafficPattern::Burst => "Periodic bursts of high traffic",
            TrafficPattern::Spike => "Sudden massive traffic spike (10x normal)",
            TrafficPattern::Regional => "Traffic varies by geographic region and timezone",
        }
    }

    /// Requests per second at tick `t`, floored at zero.
    ///
    /// Consumes exactly one draw from `rng`.
    pub fn value<R: Rng>(self, t: u64, baseline: f64, rng: &mut R) -> f64 {
        let t = t as f64;
        let raw = match self {
            TrafficPattern::Steady => baseline + (t * 0.1).sin() * 10.0 + rng.range_f64(0.0, 5.0),
            TrafficPattern::Gradual => baseline + t * 2.0 + rng.range_f64(0.0, 10.0),
            TrafficPattern::Burst => {
                let burst = if (t * 0.05).sin() > 0.7 { 150.0 } else { 0.0 };
                baseline + burst + rng.range_f64(0.0, 20.0)
            }
            TrafficPattern::Spike => {
                if t > 30.0 && t < 60.0 {
                    baseline * 10.0 * ((t - 30.0) * 0.1).sin() + rng.range_f64(0.0, 50.0)
                } else {
                    baseline + rng.range_f64(0.0, 10.0)
                }
            }
            TrafficPattern::Regional => {
                let phase = t * 0.08;
                let americas = phase.sin() * 30.0;
                let europe = (phase + 2.0).sin() * 25.0;
                let asia = (phase + 4.0).sin() * 35.0;
                baseline + americas + europe + asia + rng.range_f64(0.0, 15.0)
            }
        };
        raw.max(0.0)
    }
}

impl fmt::Display for TrafficPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrafficPattern {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "steady" => Ok(TrafficPattern::Steady),
            "gradual" => Ok(TrafficPattern::Gradual),
            "burst" => Ok(TrafficPattern::Burst),
            "spike" | "viral" => Ok(TrafficPattern::Spike),
            "regional" => Ok(TrafficPattern::Regional),
            _ => Err(SimError::unknown(
                "traffic pattern",
                s,
                "steady, gradual, burst, spike, regional",
            )),
        }
    }
}

/// Load relative to capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    #[default]
    Healthy,
    Stressed,
    Overloaded,
}

impl SystemStatus {
    /// Overloaded above 90 % of capacity, stressed above 60 %.
    pub fn classify(rps: f64, max_capacity_rps: f64) -> Self {
        if rps > max_capacity_rps * 0.9 {
            SystemStatus::Overloaded
        } else if rps > max_capacity_rps * 0.6 {
            SystemStatus::Stressed
        } else {
            SystemStatus::Healthy
        }
    }
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SystemStatus::Healthy => "healthy",
            SystemStatus::Stressed => "stressed",
            SystemStatus::Overloaded => "overloaded",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    pub pattern: TrafficPattern,
    pub baseline_rps: f64,
    pub max_capacity_rps: f64,
    pub tick_interval_ms: u64,
    pub history_len: usize,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            pattern: TrafficPattern::Steady,
            baseline_rps: 100.0,
            max_capacity_rps: 500.0,
            tick_interval_ms: 100,
            history_len: 100,
        }
    }
}

impl TrafficConfig {
    pub fn with_pattern(mut self, pattern: TrafficPattern) -> Self {
        self.pattern = pattern;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrafficPoint {
    pub tick: u64,
    pub at_ns: u64,
    pub rps: f64,
    pub pattern: TrafficPattern,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrafficSnapshot {
    pub now_ms: u64,
    pub running: bool,
    pub pattern: TrafficPattern,
    pub tick: u64,
    pub current_rps: f64,
    pub peak_rps: f64,
    pub status: SystemStatus,
    /// Current rate as a fraction of capacity.
    pub utilization: f64,
    pub history: Vec<TrafficPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrafficTimer {
    Tick,
}

#[derive(Debug, Clone)]
pub struct TrafficGenerator {
    config: TrafficConfig,
    tick: u64,
    current_rps: f64,
    peak_rps: f64,
    status: SystemStatus,
    history: VecDeque<TrafficPoint>,
    running: bool,
    timers: TimerScope<TrafficTimer>,
    log: ExplanationLog,
}

impl TrafficGenerator {
    pub fn new(config: TrafficConfig) -> Self {
        let baseline = config.baseline_rps.max(0.0);
        Self {
            tick: 0,
            current_rps: baseline,
            peak_rps: baseline,
            status: SystemStatus::classify(baseline, config.max_capacity_rps),
            history: VecDeque::with_capacity(config.history_len),
            running: false,
            timers: TimerScope::new(),
            log: ExplanationLog::new(Self::NAME),
            config,
        }
    }

    pub fn config(&self) -> &TrafficConfig {
        &self.config
    }

    pub fn pattern(&self) -> TrafficPattern {
        self.config.pattern
    }

    pub fn current_rps(&self) -> f64 {
        self.current_rps
    }

    pub fn peak_rps(&self) -> f64 {
        self.peak_rps
    }

    pub fn status(&self) -> SystemStatus {
        self.status
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn history(&self) -> impl Iterator<Item = &TrafficPoint> {
        self.history.iter()
    }

    /// Switches the shape. The tick count carries on.
    pub fn set_pattern(&mut self, pattern: TrafficPattern) {
        if pattern == self.config.pattern {
            return;
        }
        self.config.pattern = pattern;
        self.log.notable(
            self.timers.now(),
            format!("{}: {}", pattern.label(), pattern.description()),
        );
    }

    /// Generates one point.
    pub fn step<R: Rng>(&mut self, rng: &mut R) -> f64 {
        self.tick += 1;
        let now = self.timers.now();
        let rps = self
            .config
            .pattern
            .value(self.tick, self.config.baseline_rps, rng);

        self.current_rps = rps;
        self.peak_rps = self.peak_rps.max(rps);

        let status = SystemStatus::classify(rps, self.config.max_capacity_rps);
        if status != self.status {
            self.log.notable(
                now,
                format!(
                    "System {status} at {rps:.0} req/s ({:.0}% of {:.0} capacity)",
                    self.utilization() * 100.0,
                    self.config.max_capacity_rps
                ),
            );
            self.status = status;
        }

        if self.config.history_len > 0 {
            while self.history.len() >= self.config.history_len {
                self.history.pop_front();
            }
            self.history.push_back(TrafficPoint {
                tick: self.tick,
                at_ns: now,
                rps,
                pattern: self.config.pattern,
            });
        }
        rps
    }

    pub fn utilization(&self) -> f64 {
        if self.config.max_capacity_rps <= 0.0 {
            return 0.0;
        }
        self.current_rps / self.config.max_capacity_rps
    }
}

impl Simulation for TrafficGenerator {
    type Snapshot = TrafficSnapshot;
    const NAME: &'static str = "traffic";

    fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.timers
            .every(ms_to_ns(self.config.tick_interval_ms), TrafficTimer::Tick);
        let pattern = self.config.pattern;
        self.log.notable(
            self.timers.now(),
            format!("{}: {}", pattern.label(), pattern.description()),
        );
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
                TrafficTimer::Tick => {
                    self.step(rng);
                }
            }
        }
        self.timers.settle(deadline);
    }

    fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            now_ms: ns_to_ms(self.timers.now()),
            running: self.running,
            pattern: self.config.pattern,
            tick: self.tick,
            current_rps: self.current_rps,
            peak_rps: self.peak_rps,
            status: self.status,
            utilization: self.utilization(),
            history: self.history.iter().copied().collect(),
        }
    }

    fn drain_explanations(&mut self) -> Vec<Explanation> {
        self.log.drain()
    }
}
