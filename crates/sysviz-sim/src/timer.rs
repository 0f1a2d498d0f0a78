//! Scoped timers.
//!
//! A [`TimerScope`] is the single lifecycle handle a simulator holds for all of
//! its pending work: periodic tickers (traffic generation, control loops,
//! expiry checks) and one-shot delays (simulated latency, warm-up, recovery).
//! Stopping a simulator is one call to [`TimerScope::cancel_all`]; after that
//! no stale timer can fire and mutate state.
//!
//! ## Firing model
//!
//! The scope owns the simulator's [`SimClock`]. Callers drive it with a
//! deadline:
//!
//! ```ignore
//! let deadline = scope.now() + elapsed_ns;
//! while let Some(fired) = scope.pop_due(deadline) {
//!     handle(fired.kind);
//! }
//! scope.settle(deadline);
//! ```
//!
//! `pop_due` moves the clock to each timer's exact fire time before handing it
//! out, so handlers observe `now()` equal to the scheduled instant. Handlers
//! may arm or cancel timers while the loop runs; a timer armed for a time
//! within the deadline fires in the same loop.
//!
//! Cancellation is lazy: the queue entry stays in the heap but is skipped when
//! popped because its registration is gone.

use std::collections::HashMap;

use crate::clock::{Clock, SimClock};
use crate::event::EventQueue;

/// Identifier of an armed timer within one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Returns the raw value.
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// A timer handed out by [`TimerScope::pop_due`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<K> {
    pub id: TimerId,
    pub kind: K,
    /// Scheduled fire time (equal to the scope's clock when handed out).
    pub at_ns: u64,
}

#[derive(Debug, Clone)]
struct Armed<K> {
    kind: K,
    fire_at_ns: u64,
    period_ns: Option<u64>,
}

/// Owns a simulator's clock and every timer it has armed.
#[derive(Debug, Clone)]
pub struct TimerScope<K> {
    clock: SimClock,
    queue: EventQueue<TimerId>,
    armed: HashMap<TimerId, Armed<K>>,
    next_id: u64,
}

impl<K: Clone> Default for TimerScope<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone> TimerScope<K> {
    /// Creates a scope with its clock at zero and nothing armed.
    pub fn new() -> Self {
        Self {
            clock: SimClock::new(),
            queue: EventQueue::new(),
            armed: HashMap::new(),
            next_id: 0,
        }
    }

    /// Current simulated time.
    #[inline]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Arms a one-shot timer firing `delay_ns` from now.
    pub fn after(&mut self, delay_ns: u64, kind: K) -> TimerId {
        let at = self.now().saturating_add(delay_ns);
        self.arm(at, kind, None)
    }

    /// Arms a periodic timer. The first fire is one period from now.
    ///
    /// A zero period is treated as one nanosecond so a ticker can never stall
    /// the clock.
    pub fn every(&mut self, period_ns: u64, kind: K) -> TimerId {
        let period = period_ns.max(1);
        let at = self.now().saturating_add(period);
        self.arm(at, kind, Some(period))
    }

    fn arm(&mut self, fire_at_ns: u64, kind: K, period_ns: Option<u64>) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.queue.schedule(fire_at_ns, id);
        self.armed.insert(
            id,
            Armed {
                kind,
                fire_at_ns,
                period_ns,
            },
        );
        id
    }

    /// Disarms one timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.armed.remove(&id).is_some()
    }

    /// Disarms every timer whose kind matches `predicate`. Returns how many.
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let before = self.armed.len();
        self.armed.retain(|_, armed| !predicate(&armed.kind));
        before - self.armed.len()
    }

    /// Disarms every pending timer.
    pub fn cancel_all(&mut self) {
        self.armed.clear();
        self.queue.clear();
    }

    /// Returns true if the timer is still armed.
    pub fn is_armed(&self, id: TimerId) -> bool {
        self.armed.contains_key(&id)
    }

    /// Returns true if any armed timer matches `predicate`.
    pub fn any_armed(&self, mut predicate: impl FnMut(&K) -> bool) -> bool {
        self.armed.values().any(|armed| predicate(&armed.kind))
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.armed.len()
    }

    /// Pops the next armed timer due at or before `deadline_ns`.
    ///
    /// Advances the clock to the timer's fire time. Periodic timers are
    /// re-armed (same id) one period later before being returned.
    pub fn pop_due(&mut self, deadline_ns: u64) -> Option<Fired<K>> {
        loop {
            let next = self.queue.next_time()?;
            if next > deadline_ns {
                return None;
            }
            let event = self.queue.pop()?;
            let id = event.kind;

            let Some(armed) = self.armed.get_mut(&id) else {
                continue; // cancelled
            };
            if armed.fire_at_ns != event.time_ns {
                continue; // superseded entry of a re-armed ticker
            }

            self.clock.advance_to(event.time_ns.max(self.clock.now()));
            let kind = armed.kind.clone();

            match armed.period_ns {
                Some(period) => {
                    let next_at = event.time_ns.saturating_add(period);
                    armed.fire_at_ns = next_at;
                    self.queue.schedule(next_at, id);
                }
                None => {
                    self.armed.remove(&id);
                }
            }

            return Some(Fired {
                id,
                kind,
                at_ns: event.time_ns,
            });
        }
    }

    /// Moves the clock to `deadline_ns` (never backwards).
    pub fn settle(&mut self, deadline_ns: u64) {
        if deadline_ns > self.clock.now() {
            self.clock.advance_to(deadline_ns);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Tick {
        Fast,
        Slow,
        Once,
    }

    fn drain(scope: &mut TimerScope<Tick>, deadline: u64) -> Vec<(u64, Tick)> {
        let mut out = Vec::new();
        while let Some(fired) = scope.pop_due(deadline) {
            assert_eq!(fired.at_ns, scope.now());
            out.push((fired.at_ns, fired.kind));
        }
        scope.settle(deadline);
        out
    }

    #[test]
    fn one_shot_fires_once() {
        let mut scope = TimerScope::new();
        scope.after(100, Tick::Once);
        assert_eq!(drain(&mut scope, 1_000), vec![(100, Tick::Once)]);
        assert_eq!(scope.now(), 1_000);
        assert_eq!(scope.pending(), 0);
    }

    #[test]
    fn periodic_timers_interleave_by_time() {
        let mut scope = TimerScope::new();
        scope.every(100, Tick::Fast);
        scope.every(250, Tick::Slow);

        let fired = drain(&mut scope, 500);
        assert_eq!(
            fired,
            vec![
                (100, Tick::Fast),
                (200, Tick::Fast),
                (250, Tick::Slow),
                (300, Tick::Fast),
                (400, Tick::Fast),
                // Slow re-armed for 500 before Fast did
                (500, Tick::Slow),
                (500, Tick::Fast),
            ]
        );
        assert_eq!(scope.pending(), 2);
    }

    #[test]
    fn split_advances_match_single_advance() {
        let mut whole = TimerScope::new();
        whole.every(30, Tick::Fast);
        let a = drain(&mut whole, 300);

        let mut split = TimerScope::new();
        split.every(30, Tick::Fast);
        let mut b = Vec::new();
        for deadline in (16..=300).step_by(16).chain(std::iter::once(300)) {
            b.extend(drain(&mut split, deadline));
        }
        assert_eq!(a, b);
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let mut scope = TimerScope::new();
        let fast = scope.every(10, Tick::Fast);
        scope.after(50, Tick::Once);

        assert_eq!(drain(&mut scope, 20).len(), 2);
        assert!(scope.cancel(fast));
        assert!(!scope.cancel(fast));
        assert_eq!(drain(&mut scope, 100), vec![(50, Tick::Once)]);
    }

    #[test]
    fn cancel_all_silences_everything() {
        let mut scope = TimerScope::new();
        scope.every(10, Tick::Fast);
        scope.every(20, Tick::Slow);
        scope.after(5, Tick::Once);

        scope.cancel_all();
        assert!(drain(&mut scope, 10_000).is_empty());
        assert_eq!(scope.now(), 10_000);
    }

    #[test]
    fn cancel_where_filters_by_kind() {
        let mut scope = TimerScope::new();
        scope.every(10, Tick::Fast);
        scope.every(10, Tick::Slow);
        assert_eq!(scope.cancel_where(|k| *k == Tick::Fast), 1);
        assert!(!scope.any_armed(|k| *k == Tick::Fast));
        assert!(drain(&mut scope, 30).iter().all(|(_, k)| *k == Tick::Slow));
    }

    #[test]
    fn timers_armed_during_drain_fire_in_same_pass() {
        let mut scope = TimerScope::new();
        scope.after(10, Tick::Once);
        let mut seen = Vec::new();
        while let Some(fired) = scope.pop_due(100) {
            seen.push(fired.at_ns);
            if fired.kind == Tick::Once {
                scope.after(15, Tick::Slow);
            }
        }
        assert_eq!(seen, vec![10, 25]);
    }

    #[test]
    fn zero_period_does_not_stall() {
        let mut scope = TimerScope::new();
        scope.every(0, Tick::Fast);
        assert_eq!(drain(&mut scope, 3).len(), 3);
    }
}
