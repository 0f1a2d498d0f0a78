//! The `Simulation` lifecycle trait and the external tick source.

use serde::Serialize;

use crate::clock::{NS_PER_MS, ms_to_ns};
use crate::explain::Explanation;
use crate::rng::Rng;

/// Default frame length: 16 ms, roughly 60 frames per second.
pub const DEFAULT_FRAME_NS: u64 = 16 * NS_PER_MS;

// ============================================================================
// Simulation trait
// ============================================================================

/// Lifecycle shared by every simulator.
///
/// A simulator is a plain owned struct. Its state changes only inside
/// [`Simulation::advance`] (timer-driven behaviour) and its own action
/// methods (user knobs such as injecting a failure).
pub trait Simulation {
    /// Serializable view of the simulator's entities and counters.
    type Snapshot: Serialize;

    /// Short name used in logs and CLI output.
    const NAME: &'static str;

    /// Arms the simulator's timers. Starting a running simulator is a no-op.
    fn start(&mut self);

    /// Cancels every pending timer. State is kept.
    fn stop(&mut self);

    /// Stops and restores the initial state (configuration is kept).
    fn reset(&mut self);

    fn is_running(&self) -> bool;

    /// Current simulated time in nanoseconds.
    fn now(&self) -> u64;

    /// Advances simulated time by `elapsed_ns`, firing every timer that falls
    /// due, with all random draws taken from `rng`.
    fn advance<R: Rng>(&mut self, elapsed_ns: u64, rng: &mut R);

    fn snapshot(&self) -> Self::Snapshot;

    /// Removes and returns explanations recorded since the last drain.
    fn drain_explanations(&mut self) -> Vec<Explanation>;
}

// ============================================================================
// Tick Driver
// ============================================================================

/// Summary of a driven run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Frames stepped.
    pub frames: u64,
    /// Simulator clock when the run ended.
    pub final_time_ns: u64,
    /// True if a stop condition ended the run before the duration elapsed.
    pub stopped_early: bool,
}

/// Single external tick source that steps one simulator in fixed frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickDriver {
    frame_ns: u64,
}

impl Default for TickDriver {
    fn default() -> Self {
        Self {
            frame_ns: DEFAULT_FRAME_NS,
        }
    }
}

impl TickDriver {
    /// Creates a driver with a custom frame length (at least 1 ns).
    pub fn new(frame_ns: u64) -> Self {
        Self {
            frame_ns: frame_ns.max(1),
        }
    }

    pub fn with_frame_ms(frame_ms: u64) -> Self {
        Self::new(ms_to_ns(frame_ms))
    }

    pub fn frame_ns(&self) -> u64 {
        self.frame_ns
    }

    /// Advances `sim` for `duration_ns` of simulated time.
    pub fn run<S, R>(&self, sim: &mut S, rng: &mut R, duration_ns: u64) -> RunSummary
    where
        S: Simulation,
        R: Rng,
    {
        self.run_until_with(sim, rng, duration_ns, |_, _| {}, |_| false)
    }

    /// Like [`TickDriver::run`], calling `hook` after every frame.
    ///
    /// The hook sees the simulator and the RNG, so it can couple an external
    /// input (for example a traffic series) into the simulator between frames.
    pub fn run_with<S, R, H>(&self, sim: &mut S, rng: &mut R, duration_ns: u64, hook: H) -> RunSummary
    where
        S: Simulation,
        R: Rng,
        H: FnMut(&mut S, &mut R),
    {
        self.run_until_with(sim, rng, duration_ns, hook, |_| false)
    }

    /// Advances until `done` returns true after a frame, or `max_duration_ns`
    /// elapses.
    pub fn run_until<S, R, P>(
        &self,
        sim: &mut S,
        rng: &mut R,
        max_duration_ns: u64,
        done: P,
    ) -> RunSummary
    where
        S: Simulation,
        R: Rng,
        P: FnMut(&S) -> bool,
    {
        self.run_until_with(sim, rng, max_duration_ns, |_, _| {}, done)
    }

    /// [`TickDriver::run_with`] and [`TickDriver::run_until`] combined: the
    /// hook runs after every frame, then `done` is checked.
    pub fn run_until_with<S, R, H, P>(
        &self,
        sim: &mut S,
        rng: &mut R,
        duration_ns: u64,
        mut hook: H,
        mut done: P,
    ) -> RunSummary
    where
        S: Simulation,
        R: Rng,
        H: FnMut(&mut S, &mut R),
        P: FnMut(&S) -> bool,
    {
        let mut remaining = duration_ns;
        let mut frames = 0;
        let mut stopped_early = false;

        while remaining > 0 {
            let step = remaining.min(self.frame_ns);
            sim.advance(step, rng);
            hook(sim, rng);
            remaining -= step;
            frames += 1;

            if done(sim) {
                stopped_early = remaining > 0;
                break;
            }
        }

        tracing::debug!(
            sim = S::NAME,
            frames,
            sim_ms = sim.now() / NS_PER_MS,
            "drive complete"
        );

        RunSummary {
            frames,
            final_time_ns: sim.now(),
            stopped_early,
        }
    }
}
