//! Circuit breaker state machine.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────▶ Open
//!     ▲                                │ recovery timeout elapsed
//!     │ successes >= required          ▼
//!     └────────────────────────── HalfOpen
//!                                      │ any failure
//!                                      └──────────▶ Open (timer restarts)
//! ```
//!
//! While running, a simulated call is issued every 300 ms against an upstream
//! whose success probability is the configured service health. While open, a
//! 100 ms recovery check runs whether or not calls are flowing.
//!
//! Guards are re-evaluated after every call and every knob change, so lowering
//! the threshold below the current failure streak opens the circuit at once.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::{ms_to_ns, ns_to_ms, ns_to_sec};
use crate::driver::Simulation;
use crate::explain::{Explanation, ExplanationLog};
use crate::rng::Rng;
use crate::timer::TimerScope;

/// Breaker knobs.
///
/// Valid ranges: threshold 1–10, recovery 5–30 s, required successes 1–5,
/// health 0–100 %.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub half_open_successes_required: u32,
    /// Probability (in percent) that an attempted call succeeds.
    pub service_health_pct: f64,
    pub call_interval_ms: u64,
    pub recovery_check_interval_ms: u64,
    /// Number of recent call results kept for display.
    pub result_window: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 10_000,
            half_open_successes_required: 3,
            service_health_pct: 100.0,
            call_interval_ms: 300,
            recovery_check_interval_ms: 100,
            result_window: 20,
        }
    }
}

impl BreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.recovery_timeout_ms = timeout_ms;
        self
    }

    pub fn with_half_open_successes_required(mut self, required: u32) -> Self {
        self.half_open_successes_required = required;
        self
    }

    pub fn with_service_health_pct(mut self, health: f64) -> Self {
        self.service_health_pct = health;
        self
    }
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitMode {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitMode::Closed => "closed",
            CircuitMode::Open => "open",
            CircuitMode::HalfOpen => "half-open",
        })
    }
}

/// Breaker state. All fields reset together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BreakerState {
    pub mode: CircuitMode,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    /// When the circuit last opened; `None` unless open.
    pub opened_at_ns: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallOutcome {
    Success,
    Failure,
    /// Short-circuited while open, never attempted.
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CallResult {
    pub id: u64,
    pub outcome: CallOutcome,
    pub at_ns: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BreakerCounters {
    pub successes: u64,
    pub failures: u64,
    pub blocked: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub now_ms: u64,
    pub running: bool,
    pub state: BreakerState,
    pub counters: BreakerCounters,
    pub time_until_half_open_ms: u64,
    pub recent: Vec<CallResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerTimer {
    Call,
    RecoveryCheck,
}

// ============================================================================
// Breaker
// ============================================================================

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    counters: BreakerCounters,
    recent: VecDeque<CallResult>,
    next_call_id: u64,
    running: bool,
    timers: TimerScope<BreakerTimer>,
    log: ExplanationLog,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::default(),
            counters: BreakerCounters::default(),
            recent: VecDeque::new(),
            next_call_id: 0,
            running: false,
            timers: TimerScope::new(),
            log: ExplanationLog::new(Self::NAME),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn mode(&self) -> CircuitMode {
        self.state.mode
    }

    pub fn counters(&self) -> BreakerCounters {
        self.counters
    }

    /// Recent call results, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = &CallResult> {
        self.recent.iter()
    }

    /// Time left before an open circuit may probe again; 0 unless open.
    pub fn time_until_half_open_ns(&self) -> u64 {
        match (self.state.mode, self.state.opened_at_ns) {
            (CircuitMode::Open, Some(opened)) => {
                let elapsed = self.timers.now().saturating_sub(opened);
                ms_to_ns(self.config.recovery_timeout_ms).saturating_sub(elapsed)
            }
            _ => 0,
        }
    }

    /// Issues one simulated call against the upstream.
    pub fn call<R: Rng>(&mut self, rng: &mut R) -> CallOutcome {
        if self.state.mode == CircuitMode::Open {
            self.counters.blocked += 1;
            self.push_result(CallOutcome::Blocked);
            return CallOutcome::Blocked;
        }

        if rng.next_f64() * 100.0 < self.config.service_health_pct {
            self.record_success();
            CallOutcome::Success
        } else {
            self.record_failure();
            CallOutcome::Failure
        }
    }

    /// Records a successful attempted call. Ignored while open, since no
    /// call reaches the upstream then.
    pub fn record_success(&mut self) {
        if self.state.mode == CircuitMode::Open {
            return;
        }
        self.counters.successes += 1;
        self.state.consecutive_failures = 0;
        if self.state.mode == CircuitMode::HalfOpen {
            self.state.half_open_successes += 1;
        }
        self.push_result(CallOutcome::Success);
        self.evaluate();
    }

    /// Records a failed attempted call. Ignored while open.
    pub fn record_failure(&mut self) {
        if self.state.mode == CircuitMode::Open {
            return;
        }
        self.counters.failures += 1;
        self.state.consecutive_failures += 1;
        self.push_result(CallOutcome::Failure);

        if self.state.mode == CircuitMode::HalfOpen {
            self.open();
            self.log.notable(
                self.timers.now(),
                "Circuit REOPENED: failed during half-open probe, recovery timeout restarted",
            );
            return;
        }
        self.evaluate();
    }

    fn push_result(&mut self, outcome: CallOutcome) {
        let result = CallResult {
            id: self.next_call_id,
            outcome,
            at_ns: self.timers.now(),
        };
        self.next_call_id += 1;
        self.recent.push_back(result);
        while self.recent.len() > self.config.result_window {
            self.recent.pop_front();
        }
    }

    /// Runs every transition guard against the current state and knobs.
    fn evaluate(&mut self) {
        let now = self.timers.now();
        match self.state.mode {
            CircuitMode::Closed => {
                if self.state.consecutive_failures >= self.config.failure_threshold {
                    self.open();
                    self.log.notable(
                        now,
                        format!(
                            "Circuit OPENED: {} consecutive failures, blocking calls for {:.0}s",
                            self.state.consecutive_failures,
                            ns_to_sec(ms_to_ns(self.config.recovery_timeout_ms)),
                        ),
                    );
                }
            }
            CircuitMode::Open => {
                if self.time_until_half_open_ns() == 0 {
                    self.state.mode = CircuitMode::HalfOpen;
                    self.state.half_open_successes = 0;
                    self.state.opened_at_ns = None;
                    self.timers
                        .cancel_where(|t| *t == BreakerTimer::RecoveryCheck);
                    self.log.notable(
                        now,
                        format!(
                            "Circuit HALF-OPEN: probing upstream, {} successes needed to close",
                            self.config.half_open_successes_required
                        ),
                    );
                    // A zero requirement closes straight away.
                    self.evaluate();
                }
            }
            CircuitMode::HalfOpen => {
                if self.state.half_open_successes >= self.config.half_open_successes_required {
                    self.state.mode = CircuitMode::Closed;
                    self.state.consecutive_failures = 0;
                    self.state.half_open_successes = 0;
                    self.log
                        .notable(now, "Circuit CLOSED: upstream recovered");
                }
            }
        }
    }

    fn open(&mut self) {
        self.state.mode = CircuitMode::Open;
        self.state.half_open_successes = 0;
        self.state.opened_at_ns = Some(self.timers.now());
        self.timers
            .cancel_where(|t| *t == BreakerTimer::RecoveryCheck);
        self.timers.every(
            ms_to_ns(self.config.recovery_check_interval_ms),
            BreakerTimer::RecoveryCheck,
        );
    }

    pub fn set_failure_threshold(&mut self, threshold: u32) {
        self.config.failure_threshold = threshold;
        self.evaluate();
    }

    pub fn set_recovery_timeout_ms(&mut self, timeout_ms: u64) {
        self.config.recovery_timeout_ms = timeout_ms;
        self.evaluate();
    }

    pub fn set_half_open_successes_required(&mut self, required: u32) {
        self.config.half_open_successes_required = required;
        self.evaluate();
    }

    pub fn set_service_health_pct(&mut self, health: f64) {
        self.config.service_health_pct = health;
    }

    fn on_timer<R: Rng>(&mut self, timer: BreakerTimer, rng: &mut R) {
        match timer {
            BreakerTimer::Call => {
                self.call(rng);
            }
            BreakerTimer::RecoveryCheck => self.evaluate(),
        }
    }
}

impl Simulation for CircuitBreaker {
    type Snapshot = BreakerSnapshot;
    const NAME: &'static str = "circuit-breaker";

    fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.timers
            .every(ms_to_ns(self.config.call_interval_ms), BreakerTimer::Call);
        if self.state.mode == CircuitMode::Open
            && !self.timers.any_armed(|t| *t == BreakerTimer::RecoveryCheck)
        {
            self.timers.every(
                ms_to_ns(self.config.recovery_check_interval_ms),
                BreakerTimer::RecoveryCheck,
            );
        }
    }

    fn stop(&mut self) {
        self.running = false;
        self.timers.cancel_all();
    }

    fn reset(&mut self) {
        *self = Self::new(self.config.clone());
        self.log.notable(0, "Circuit breaker reset to closed state");
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

    fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            now_ms: ns_to_ms(self.timers.now()),
            running: self.running,
            state: self.state,
            counters: self.counters,
            time_until_half_open_ms: ns_to_ms(self.time_until_half_open_ns()),
            recent: self.recent.iter().copied().collect(),
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

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            BreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_recovery_timeout_ms(5_000)
                .with_half_open_successes_required(2),
        )
    }

    fn idle(cb: &mut CircuitBreaker, ms: u64) {
        cb.advance(ms_to_ns(ms), &mut ScriptedRng::constant(0.0));
    }

    #[test]
    fn threshold_failures_open_the_circuit() {
        let mut cb = breaker(3);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.mode(), CircuitMode::Closed);
        cb.record_failure();
        assert_eq!(cb.mode(), CircuitMode::Open);
        assert_eq!(cb.state().opened_at_ns, Some(0));
    }

    #[test]
    fn success_resets_the_streak() {
        let mut cb = breaker(3);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.state().consecutive_failures, 0);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.mode(), CircuitMode::Closed);
    }

    #[test]
    fn open_becomes_half_open_without_traffic() {
        let mut cb = breaker(3);
        for _ in 0..3 {
            cb.record_failure();
        }
        idle(&mut cb, 4_900);
        assert_eq!(cb.mode(), CircuitMode::Open);
        assert_eq!(cb.time_until_half_open_ns(), ms_to_ns(100));
        idle(&mut cb, 100);
        assert_eq!(cb.mode(), CircuitMode::HalfOpen);
        assert_eq!(cb.time_until_half_open_ns(), 0);
    }

    #[test]
    fn half_open_single_failure_reopens() {
        let mut cb = breaker(1);
        cb.record_failure();
        idle(&mut cb, 5_000);
        cb.record_success();
        assert_eq!(cb.state().half_open_successes, 1);
        cb.record_failure();
        assert_eq!(cb.mode(), CircuitMode::Open);
        assert_eq!(cb.state().opened_at_ns, Some(ms_to_ns(5_000)));
        assert_eq!(cb.state().half_open_successes, 0);
    }

    #[test]
    fn required_successes_close_the_circuit() {
        let mut cb = breaker(1);
        cb.record_failure();
        idle(&mut cb, 5_000);
        cb.record_success();
        assert_eq!(cb.mode(), CircuitMode::HalfOpen);
        cb.record_success();
        assert_eq!(cb.mode(), CircuitMode::Closed);
        assert_eq!(cb.state().consecutive_failures, 0);
    }

    #[test]
    fn calls_are_blocked_while_open() {
        let mut cb = breaker(1).tap_health(0.0);
        cb.start();
        // 300 ms: fails and opens; 600..=3000 ms: blocked
        cb.advance(ms_to_ns(3_000), &mut SimRng::new(9));
        let counters = cb.counters();
        assert_eq!(counters.failures, 1);
        assert_eq!(counters.blocked, 9);
        assert!(cb.recent().all(|r| r.outcome != CallOutcome::Success));
    }

    #[test]
    fn recorded_outcomes_leave_open_circuit_untouched() {
        let mut cb = breaker(1);
        cb.record_failure();
        assert_eq!(cb.mode(), CircuitMode::Open);
        let counters = cb.counters();
        let state = cb.state();
        let recent: Vec<_> = cb.recent().copied().collect();

        cb.record_success();
        cb.record_failure();

        assert_eq!(cb.counters(), counters);
        assert_eq!(cb.state(), state);
        assert_eq!(cb.recent().copied().collect::<Vec<_>>(), recent);
    }

    #[test]
    fn lowering_threshold_reevaluates() {
        let mut cb = breaker(5);
        cb.record_failure();
        cb.record_failure();
        cb.set_failure_threshold(2);
        assert_eq!(cb.mode(), CircuitMode::Open);
    }

    #[test]
    fn lowering_required_successes_closes_half_open() {
        let mut cb = breaker(1);
        cb.record_failure();
        idle(&mut cb, 5_000);
        cb.record_success();
        cb.set_half_open_successes_required(1);
        assert_eq!(cb.mode(), CircuitMode::Closed);
    }

    #[test]
    fn result_window_is_bounded() {
        let mut cb = breaker(100);
        for _ in 0..50 {
            cb.record_success();
        }
        assert_eq!(cb.recent().count(), 20);
        assert_eq!(cb.recent().next().map(|r| r.id), Some(30));
    }

    #[test]
    fn stop_and_reset() {
        let mut cb = breaker(1).tap_health(0.0);
        cb.start();
        cb.advance(ms_to_ns(1_000), &mut SimRng::new(1));
        cb.stop();
        let before = cb.counters();
        cb.advance(ms_to_ns(1_000), &mut SimRng::new(1));
        assert_eq!(cb.counters(), before);

        cb.reset();
        assert_eq!(cb.state(), BreakerState::default());
        assert_eq!(cb.counters(), BreakerCounters::default());
        assert!(!cb.is_running());
    }

    impl CircuitBreaker {
        fn tap_health(mut self, health: f64) -> Self {
            self.set_service_health_pct(health);
            self
        }
    }

    proptest! {
        #[test]
        fn opens_after_exactly_threshold_failures(threshold in 1u32..10) {
            let mut cb = breaker(threshold);
            for i in 1..=threshold {
                prop_assert_eq!(cb.mode(), CircuitMode::Closed);
                cb.record_failure();
                prop_assert_eq!(cb.state().consecutive_failures, i);
            }
            prop_assert_eq!(cb.mode(), CircuitMode::Open);
        }

        #[test]
        fn closed_streak_matches_trailing_failures(outcomes in prop::collection::vec(any::<bool>(), 0..40)) {
            let mut cb = breaker(1_000);
            let mut streak = 0;
            for ok in outcomes {
                if ok { cb.record_success(); streak = 0; } else { cb.record_failure(); streak += 1; }
                prop_assert_eq!(cb.state().consecutive_failures, streak);
            }
        }

        #[test]
        fn half_open_failure_always_reopens(prior in 0u32..2) {
            let mut cb = breaker(1);
            cb.record_failure();
            idle(&mut cb, 5_000);
            for _ in 0..prior {
                cb.record_success();
            }
            cb.record_failure();
            prop_assert_eq!(cb.mode(), CircuitMode::Open);
        }
    }
}
