//! Random event sources.
//!
//! Every probability draw in the engine (failures, latencies, cache-hit
//! decisions, jitter) goes through the [`Rng`] trait, which simulators take as
//! an explicit parameter on each step:
//! - [`SimRng`]: seeded, reproducible stream for normal runs
//! - [`ScriptedRng`]: replays a fixed list of draws so tests can dictate
//!   exact outcomes
//!
//! Simulators are generic over `R: Rng` so draws are monomorphised on the hot
//! path.

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

/// Trait for random number generation.
pub trait Rng {
    /// Generates a random `u64`.
    fn next_u64(&mut self) -> u64;

    /// Generates a random `f64` in `[0.0, 1.0)`.
    fn next_f64(&mut self) -> f64;

    /// Returns `true` with the given probability.
    ///
    /// Probabilities at or below zero never fire; at or above one always fire.
    #[inline]
    fn chance(&mut self, probability: f64) -> bool {
        self.next_f64() < probability
    }

    /// Generates an `f64` uniformly in `[lo, hi)`.
    #[inline]
    fn range_f64(&mut self, lo: f64, hi: f64) -> f64 {
        lo + self.next_f64() * (hi - lo)
    }

    /// Generates a `usize` in `[0, max)`. Returns 0 when `max` is 0.
    #[inline]
    fn next_usize(&mut self, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        ((self.next_f64() * max as f64) as usize).min(max - 1)
    }
}

// ============================================================================
// Seeded RNG
// ============================================================================

/// Deterministic random number generator.
///
/// The same seed always yields the same sequence of draws.
#[derive(Debug, Clone)]
pub struct SimRng {
    seed: u64,
    inner: SmallRng,
}

impl SimRng {
    /// Creates a new RNG from a seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            inner: SmallRng::seed_from_u64(seed),
        }
    }

    /// Returns the seed this RNG was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Derives an independent child stream.
    ///
    /// The child is fully determined by the parent's state at the time of the
    /// fork, so forking is itself reproducible.
    pub fn fork(&mut self) -> SimRng {
        let child_seed = self.inner.next_u64();
        SimRng::new(child_seed)
    }
}

impl Rng for SimRng {
    #[inline]
    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    #[inline]
    fn next_f64(&mut self) -> f64 {
        rand::Rng::r#gen::<f64>(&mut self.inner)
    }
}

// ============================================================================
// Scripted RNG
// ============================================================================

/// Replays a fixed sequence of `f64` draws, cycling when exhausted.
///
/// Used in tests to force specific outcomes: a draw of `0.0` fires every
/// `chance(p)` with `p > 0`, a draw of `0.99` fires none below `0.99`.
#[derive(Debug, Clone)]
pub struct ScriptedRng {
    draws: Vec<f64>,
    position: usize,
}

impl ScriptedRng {
    /// Creates a scripted RNG. Draws outside `[0, 1)` are clamped into range.
    pub fn new(draws: impl Into<Vec<f64>>) -> Self {
        let draws = draws
            .into()
            .into_iter()
            .map(|d| if d.is_nan() { 0.0 } else { d.clamp(0.0, 0.999_999_999) })
            .collect();
        Self { draws, position: 0 }
    }

    /// A script that always yields the same draw.
    pub fn constant(draw: f64) -> Self {
        Self::new(vec![draw])
    }

    /// Number of draws consumed so far.
    pub fn consumed(&self) -> usize {
        self.position
    }
}

impl Rng for ScriptedRng {
    fn next_u64(&mut self) -> u64 {
        (self.next_f64() * u64::MAX as f64) as u64
    }

    fn next_f64(&mut self) -> f64 {
        if self.draws.is_empty() {
            return 0.0;
        }
        let draw = self.draws[self.position % self.draws.len()];
        self.position += 1;
        draw
    }
}
