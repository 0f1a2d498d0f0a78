//! Simulated time.
//!
//! Every simulator keeps its own discrete clock. Time advances only when the
//! simulator is stepped, so a run of any length completes as fast as the host
//! can process its events and replays identically for the same seed.
//!
//! All timestamps are nanoseconds since the simulator was created. Knobs in
//! configuration records are expressed in milliseconds and converted with the
//! helpers below.

/// Nanoseconds per millisecond.
pub const NS_PER_MS: u64 = 1_000_000;

/// Nanoseconds per second.
pub const NS_PER_SEC: u64 = 1_000_000_000;

/// Converts milliseconds to nanoseconds.
#[inline]
pub const fn ms_to_ns(ms: u64) -> u64 {
    ms * NS_PER_MS
}

/// Converts seconds to nanoseconds.
#[inline]
pub const fn sec_to_ns(sec: u64) -> u64 {
    sec * NS_PER_SEC
}

/// Converts nanoseconds to whole milliseconds (truncating).
#[inline]
pub const fn ns_to_ms(ns: u64) -> u64 {
    ns / NS_PER_MS
}

/// Converts nanoseconds to fractional milliseconds.
#[inline]
pub fn ns_to_ms_f64(ns: u64) -> f64 {
    ns as f64 / NS_PER_MS as f64
}

/// Converts nanoseconds to fractional seconds.
#[inline]
pub fn ns_to_sec(ns: u64) -> f64 {
    ns as f64 / NS_PER_SEC as f64
}

/// Converts fractional milliseconds (e.g. a sampled latency) to nanoseconds.
///
/// Negative and NaN inputs map to zero.
#[inline]
pub fn ms_f64_to_ns(ms: f64) -> u64 {
    if ms.is_finite() && ms > 0.0 {
        (ms * NS_PER_MS as f64).round() as u64
    } else {
        0
    }
}

/// Trait for time sources.
pub trait Clock {
    /// Returns the current time in nanoseconds.
    fn now(&self) -> u64;

    /// Moves time forward to `time_ns`.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `time_ns` is earlier than [`Clock::now`].
    fn advance_to(&mut self, time_ns: u64);

    /// Returns the current time in whole milliseconds.
    #[inline]
    fn now_ms(&self) -> u64 {
        ns_to_ms(self.now())
    }

    /// Moves time forward by `delta_ns`, saturating at `u64::MAX`.
    #[inline]
    fn advance_by(&mut self, delta_ns: u64) {
        let target = self.now().saturating_add(delta_ns);
        self.advance_to(target);
    }
}

/// Deterministic discrete clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimClock {
    now_ns: u64,
}

impl SimClock {
    /// Creates a clock at time zero.
    pub fn new() -> Self {
        Self { now_ns: 0 }
    }

    /// Creates a clock already positioned at `now_ns`.
    pub fn at(now_ns: u64) -> Self {
        Self { now_ns }
    }
}

impl Clock for SimClock {
    #[inline]
    fn now(&self) -> u64 {
        self.now_ns
    }

    fn advance_to(&mut self, time_ns: u64) {
        debug_assert!(
            time_ns >= self.now_ns,
            "time cannot go backwards: current={}, target={}",
            self.now_ns,
            time_ns
        );
        self.now_ns = self.now_ns.max(time_ns);
    }
}
