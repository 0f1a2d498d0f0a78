//! Flow particle animator.
//!
//! Each particle is one request travelling user → gateway → server →
//! [cache] → store and back. Particles move a fixed number of pixels per
//! animation frame; the tier decides speed, cache usage, parallelism and the
//! chance that a request fails once it is back at the user.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::{ms_to_ns, ns_to_ms};
use crate::driver::Simulation;
use crate::explain::{Explanation, ExplanationLog};
use crate::rng::Rng;
use crate::tier::Tier;
use crate::timer::TimerScope;

// ============================================================================
// Layout
// ============================================================================

pub const USER_X: f64 = 30.0;
pub const GATEWAY_X: f64 = 80.0;
pub const SERVER_X: f64 = 140.0;
pub const CACHE_X: f64 = 200.0;
pub const STORE_X: f64 = 260.0;
pub const CENTER_Y: f64 = 140.0;

/// Vertical distance treated as "arrived".
const SNAP_PX: f64 = 2.0;

fn origin_y(index: usize) -> f64 {
    40.0 + (index % 4) as f64 * 55.0
}

// ============================================================================
// Profiles
// ============================================================================

/// How a tier moves requests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowProfile {
    pub cache_enabled: bool,
    /// Particles released together per group.
    pub parallelism: usize,
    pub failure_probability: f64,
    pub cache_hit_rate: f64,
    /// Pixels per frame.
    pub speed: f64,
    /// Wait at the store on a cache miss.
    pub store_wait_ms: u64,
}

impl FlowProfile {
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Basic => Self {
                cache_enabled: false,
                parallelism: 1,
                failure_probability: 0.20,
                cache_hit_rate: 0.0,
                speed: 4.0,
                store_wait_ms: 800,
            },
            Tier::Advanced => Self {
                cache_enabled: true,
                parallelism: 3,
                failure_probability: 0.08,
                cache_hit_rate: 0.70,
                speed: 5.0,
                store_wait_ms: 400,
            },
            Tier::Legendary => Self {
                cache_enabled: true,
                parallelism: 10,
                failure_probability: 0.02,
                cache_hit_rate: 0.85,
                speed: 6.0,
                store_wait_ms: 200,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub tier: Tier,
    pub particles: usize,
    pub frame_interval_ms: u64,
    /// Delay between consecutive particle groups.
    pub group_stagger_ms: u64,
    /// Wait at the cache on a hit.
    pub cache_hit_wait_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            tier: Tier::Basic,
            particles: 8,
            frame_interval_ms: 16,
            group_stagger_ms: 400,
            cache_hit_wait_ms: 100,
        }
    }
}

impl FlowConfig {
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }
}

// ============================================================================
// Particles
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParticleStage {
    #[default]
    Pending,
    ToGateway,
    ToServer,
    ToCache,
    ToStore,
    /// At the cache (hit) or the store (miss).
    Waiting,
    Returning,
    Complete,
    Failed,
}

impl ParticleStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, ParticleStage::Complete | ParticleStage::Failed)
    }
}

impl fmt::Display for ParticleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParticleStage::Pending => "pending",
            ParticleStage::ToGateway => "to-gateway",
            ParticleStage::ToServer => "to-server",
            ParticleStage::ToCache => "to-cache",
            ParticleStage::ToStore => "to-store",
            ParticleStage::Waiting => "waiting",
            ParticleStage::Returning => "returning",
            ParticleStage::Complete => "complete",
            ParticleStage::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Particle {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub origin_y: f64,
    pub stage: ParticleStage,
    pub speed: f64,
    /// Release time relative to the start of the animation.
    pub delay_ns: u64,
    /// Drawn when the particle is released; always false without a cache.
    pub cache_hit: bool,
    pub wait_ns: u64,
    pub waited_ns: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlowStats {
    /// Completed requests served from the cache.
    pub cache_hits: u64,
    /// Completed requests served from the store.
    pub store_hits: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowSnapshot {
    pub now_ms: u64,
    pub running: bool,
    pub tier: Tier,
    pub particles: Vec<Particle>,
    pub stats: FlowStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowTimer {
    Frame,
}

// ============================================================================
// Animator
// ============================================================================

#[derive(Debug, Clone)]
pub struct FlowAnimator {
    config: FlowConfig,
    profile: FlowProfile,
    particles: Vec<Particle>,
    started_at_ns: u64,
    running: bool,
    timers: TimerScope<FlowTimer>,
    log: ExplanationLog,
}

impl FlowAnimator {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            profile: FlowProfile::for_tier(config.tier),
            config,
            particles: Vec::new(),
            started_at_ns: 0,
            running: false,
            timers: TimerScope::new(),
            log: ExplanationLog::new(Self::NAME),
        }
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn profile(&self) -> FlowProfile {
        self.profile
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn stats(&self) -> FlowStats {
        let mut stats = FlowStats::default();
        for particle in &self.particles {
            match particle.stage {
                ParticleStage::Complete => {
                    stats.completed += 1;
                    if particle.cache_hit {
                        stats.cache_hits += 1;
                    } else {
                        stats.store_hits += 1;
                    }
                }
                ParticleStage::Failed => stats.failed += 1,
                _ => {}
            }
        }
        stats
    }

    /// Switches tier. Takes effect on the next start.
    pub fn set_tier(&mut self, tier: Tier) {
        self.config.tier = tier;
        self.profile = FlowProfile::for_tier(tier);
    }

    fn spawn(&self) -> Vec<Particle> {
        let parallelism = self.profile.parallelism.max(1);
        let stagger_ns = ms_to_ns(self.config.group_stagger_ms);
        (0..self.config.particles)
            .map(|id| {
                let origin_y = origin_y(id);
                Particle {
                    id,
                    x: USER_X,
                    y: origin_y,
                    origin_y,
                    stage: ParticleStage::Pending,
                    speed: self.profile.speed,
                    delay_ns: (id / parallelism) as u64 * stagger_ns,
                    cache_hit: false,
                    wait_ns: 0,
                    waited_ns: 0,
                }
            })
            .collect()
    }

    fn frame<R: Rng>(&mut self, rng: &mut R) {
        let now = self.timers.now();
        let elapsed = now.saturating_sub(self.started_at_ns);
        let delta = ms_to_ns(self.config.frame_interval_ms);

        for index in 0..self.particles.len() {
            let before = self.particles[index].stage;
            if before.is_terminal() || elapsed < self.particles[index].delay_ns {
                continue;
            }
            self.move_particle(index, delta, rng);
            let particle = &self.particles[index];
            if particle.stage != before && particle.stage.is_terminal() {
                self.log.detail(
                    now,
                    format!(
                        "Request {} {} via {}",
                        particle.id,
                        particle.stage,
                        if particle.cache_hit { "cache" } else { "store" }
                    ),
                );
            }
        }

        if self.particles.iter().all(|p| p.stage.is_terminal()) {
            let stats = self.stats();
            self.running = false;
            self.timers.cancel_all();
            self.log.notable(
                now,
                format!(
                    "All requests done in {}ms: {} completed ({} cache, {} store), {} failed",
                    ns_to_ms(elapsed),
                    stats.completed,
                    stats.cache_hits,
                    stats.store_hits,
                    stats.failed
                ),
            );
        }
    }

    fn move_particle<R: Rng>(&mut self, index: usize, delta_ns: u64, rng: &mut R) {
        let profile = self.profile;
        let hit_wait_ns = ms_to_ns(self.config.cache_hit_wait_ms);
        let Some(p) = self.particles.get_mut(index) else {
            return;
        };
        let speed = p.speed;

        match p.stage {
            ParticleStage::Pending => {
                p.cache_hit = profile.cache_enabled && rng.chance(profile.cache_hit_rate);
                p.wait_ns = if p.cache_hit {
                    hit_wait_ns
                } else {
                    ms_to_ns(profile.store_wait_ms)
                };
                p.stage = ParticleStage::ToGateway;
            }
            ParticleStage::ToGateway => {
                p.x = (p.x + speed).min(GATEWAY_X);
                p.y = approach(p.y, CENTER_Y, speed * 0.5);
                if p.x >= GATEWAY_X && (p.y - CENTER_Y).abs() < SNAP_PX {
                    p.y = CENTER_Y;
                    p.stage = ParticleStage::ToServer;
                }
            }
            ParticleStage::ToServer => {
                if p.x < SERVER_X {
                    p.x = (p.x + speed).min(SERVER_X);
                } else {
                    p.stage = if profile.cache_enabled {
                        ParticleStage::ToCache
                    } else {
                        ParticleStage::ToStore
                    };
                }
            }
            ParticleStage::ToCache => {
                if p.x < CACHE_X {
                    p.x = (p.x + speed).min(CACHE_X);
                } else if p.cache_hit {
                    p.stage = ParticleStage::Waiting;
                } else {
                    p.stage = ParticleStage::ToStore;
                }
            }
            ParticleStage::ToStore => {
                if p.x < STORE_X {
                    p.x = (p.x + speed).min(STORE_X);
                } else {
                    p.stage = ParticleStage::Waiting;
                }
            }
            ParticleStage::Waiting => {
                p.waited_ns += delta_ns;
                if p.waited_ns >= p.wait_ns {
                    p.stage = ParticleStage::Returning;
                }
            }
            ParticleStage::Returning => {
                p.x = (p.x - speed * 1.5).max(USER_X);
                p.y = approach(p.y, p.origin_y, speed);
                if p.x <= USER_X && (p.y - p.origin_y).abs() < SNAP_PX {
                    p.y = p.origin_y;
                    p.stage = if rng.chance(profile.failure_probability) {
                        ParticleStage::Failed
                    } else {
                        ParticleStage::Complete
                    };
                }
            }
            ParticleStage::Complete | ParticleStage::Failed => {}
        }
    }
}

/// Moves `from` toward `to` by at most `step`.
fn approach(from: f64, to: f64, step: f64) -> f64 {
    if from < to {
        (from + step).min(to)
    } else {
        (from - step).max(to)
    }
}

impl Simulation for FlowAnimator {
    type Snapshot = FlowSnapshot;
    const NAME: &'static str = "flow";

    fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.particles = self.spawn();
        self.started_at_ns = self.timers.now();
        self.timers
            .every(ms_to_ns(self.config.frame_interval_ms), FlowTimer::Frame);
        self.log.notable(
            self.timers.now(),
            format!(
                "{} tier: {} requests, {} at a time, cache {}",
                self.config.tier,
                self.particles.len(),
                self.profile.parallelism,
                if self.profile.cache_enabled { "on" } else { "off" }
            ),
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
                FlowTimer::Frame => self.frame(rng),
            }
        }
        self.timers.settle(deadline);
    }

    fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            now_ms: ns_to_ms(self.timers.now()),
            running: self.running,
            tier: self.config.tier,
            particles: self.particles.clone(),
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
    use crate::rng::Rng;
    use crate::driver::TickDriver;
    use crate::rng::{ScriptedRng, SimRng};
    use proptest::prelude::*;
    use test_case::test_case;

    fn run_to_end<R: Rng>(flow: &mut FlowAnimator, rng: &mut R) {
        flow.start();
        let summary = TickDriver::default().run_until(flow, rng, ms_to_ns(60_000), |f| {
            !f.is_running()
        });
        assert!(summary.stopped_early, "animation did not finish");
    }

    /// Stages a single particle passes through, in order.
    fn trace(tier: Tier, draw: f64) -> Vec<ParticleStage> {
        let config = FlowConfig {
            particles: 1,
            ..FlowConfig::default().with_tier(tier)
        };
        let mut flow = FlowAnimator::new(config);
        let mut rng = ScriptedRng::constant(draw);
        flow.start();
        let mut stages = vec![ParticleStage::Pending];
        while flow.is_running() {
            flow.advance(ms_to_ns(16), &mut rng);
            let stage = flow.particles()[0].stage;
            if stages.last() != Some(&stage) {
                stages.push(stage);
            }
        }
        stages
    }

    #[test]
    fn basic_tier_skips_cache() {
        use ParticleStage::*;
        assert_eq!(
            trace(Tier::Basic, 0.99),
            vec![Pending, ToGateway, ToServer, ToStore, Waiting, Returning, Complete]
        );
    }

    #[test]
    fn cache_hit_turns_around_at_cache() {
        use ParticleStage::*;
        assert_eq!(
            trace(Tier::Advanced, 0.0),
            vec![Pending, ToGateway, ToServer, ToCache, Waiting, Returning, Failed]
        );
    }

    #[test]
    fn cache_miss_continues_to_store() {
        use ParticleStage::*;
        assert_eq!(
            trace(Tier::Advanced, 0.99),
            vec![Pending, ToGateway, ToServer, ToCache, ToStore, Waiting, Returning, Complete]
        );
    }

    #[test_case(Tier::Basic, 1)]
    #[test_case(Tier::Advanced, 3)]
    #[test_case(Tier::Legendary, 8)]
    fn first_group_released_together(tier: Tier, released: usize) {
        let mut flow = FlowAnimator::new(FlowConfig::default().with_tier(tier));
        flow.start();
        flow.advance(ms_to_ns(100), &mut SimRng::new(1));
        let moving = flow
            .particles()
            .iter()
            .filter(|p| p.stage != ParticleStage::Pending)
            .count();
        assert_eq!(moving, released);
    }

    #[test]
    fn stagger_follows_groups() {
        let flow = {
            let mut flow = FlowAnimator::new(FlowConfig::default().with_tier(Tier::Advanced));
            flow.start();
            flow
        };
        let delays: Vec<_> = flow.particles().iter().map(|p| p.delay_ns).collect();
        assert_eq!(
            delays,
            [0, 0, 0, 400, 400, 400, 800, 800].map(ms_to_ns).to_vec()
        );
    }

    #[test]
    fn no_failures_all_complete() {
        let mut flow = FlowAnimator::new(FlowConfig::default().with_tier(Tier::Basic));
        run_to_end(&mut flow, &mut ScriptedRng::constant(0.99));
        let stats = flow.stats();
        assert_eq!(stats.completed, 8);
        assert_eq!(stats.store_hits, 8);
        assert_eq!(stats.cache_hits, 0);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn stop_freezes_particles() {
        let mut flow = FlowAnimator::new(FlowConfig::default());
        let mut rng = SimRng::new(4);
        flow.start();
        flow.advance(ms_to_ns(500), &mut rng);
        flow.stop();
        let before = flow.particles().to_vec();
        flow.advance(ms_to_ns(5_000), &mut rng);
        assert_eq!(flow.particles(), &before[..]);
    }

    proptest! {
        #[test]
        fn every_particle_finishes(seed in any::<u64>(), tier in prop::sample::select(Tier::ALL.to_vec())) {
            let mut flow = FlowAnimator::new(FlowConfig::default().with_tier(tier));
            run_to_end(&mut flow, &mut SimRng::new(seed));
            let stats = flow.stats();
            prop_assert_eq!(stats.completed + stats.failed, 8);
            prop_assert_eq!(stats.cache_hits + stats.store_hits, stats.completed);
            if tier == Tier::Basic {
                prop_assert_eq!(stats.cache_hits, 0);
            }
        }
    }
}
