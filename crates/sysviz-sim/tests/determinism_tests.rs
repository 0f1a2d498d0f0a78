//! Same seed, same run.
//!
//! These tests verify that every simulator is a pure function of its
//! configuration, the seed and the frame sequence, and that `reset` really
//! returns to the initial state.

use serde::Serialize;
use sysviz_sim::{
    Autoscaler, AutoscalerConfig, BreakerConfig, CacheConfig, CacheEngine, CircuitBreaker,
    FaultRouter, FlowAnimator, FlowConfig, LoadTest, LoadTestConfig, NotificationPipeline,
    NotifyConfig, RouterConfig, SimRng, Simulation, TickDriver, Tier, TrafficConfig,
    TrafficGenerator, ms_to_ns,
};

fn run_json<S>(mut make: impl FnMut() -> S, seed: u64, duration_ms: u64) -> String
where
    S: Simulation,
{
    let mut sim = make();
    sim.start();
    TickDriver::default().run(&mut sim, &mut SimRng::new(seed), ms_to_ns(duration_ms));
    to_json(&sim.snapshot())
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).expect("snapshot serializes")
}

#[test]
fn test_every_simulator_is_reproducible() {
    let seed = 0xC0FFEE;
    let cases: Vec<(&str, Box<dyn Fn() -> String>)> = vec![
        (
            "cache",
            Box::new(move || run_json(|| CacheEngine::new(CacheConfig::default()), seed, 8_000)),
        ),
        (
            "breaker",
            Box::new(move || {
                run_json(
                    || CircuitBreaker::new(BreakerConfig::default().with_service_health_pct(40.0)),
                    seed,
                    20_000,
                )
            }),
        ),
        (
            "autoscaler",
            Box::new(move || {
                run_json(
                    || Autoscaler::new(AutoscalerConfig::default().with_traffic_rps(300.0)),
                    seed,
                    30_000,
                )
            }),
        ),
        (
            "router",
            Box::new(move || run_json(|| FaultRouter::new(RouterConfig::default()), seed, 5_000)),
        ),
        (
            "notify",
            Box::new(move || {
                run_json(
                    || NotificationPipeline::for_tier(Tier::Advanced, &NotifyConfig::default()),
                    seed,
                    10_000,
                )
            }),
        ),
        (
            "traffic",
            Box::new(move || {
                run_json(|| TrafficGenerator::new(TrafficConfig::default()), seed, 10_000)
            }),
        ),
        (
            "flow",
            Box::new(move || {
                run_json(
                    || FlowAnimator::new(FlowConfig::default().with_tier(Tier::Advanced)),
                    seed,
                    10_000,
                )
            }),
        ),
        (
            "load-test",
            Box::new(move || run_json(|| LoadTest::new(LoadTestConfig::default()), seed, 6_000)),
        ),
    ];

    for (name, run) in cases {
        assert_eq!(run(), run(), "{name} diverged between identical runs");
    }
}

#[test]
fn test_different_seeds_diverge() {
    let make = || CircuitBreaker::new(BreakerConfig::default().with_service_health_pct(50.0));
    assert_ne!(run_json(make, 1, 10_000), run_json(make, 2, 10_000));
}

#[test]
fn test_reset_restores_initial_snapshot() {
    let mut scaler = Autoscaler::new(AutoscalerConfig::default());
    let initial = to_json(&scaler.snapshot());

    scaler.start();
    TickDriver::default().run(&mut scaler, &mut SimRng::new(8), ms_to_ns(15_000));
    assert_ne!(to_json(&scaler.snapshot()), initial);

    scaler.reset();
    assert!(!scaler.is_running());
    assert_eq!(to_json(&scaler.snapshot()), initial);
}

#[test]
fn test_stop_cancels_pending_work() {
    let mut router = FaultRouter::new(RouterConfig::default());
    let mut rng = SimRng::new(4);
    router.start();
    TickDriver::default().run(&mut router, &mut rng, ms_to_ns(2_000));
    router.stop();

    let frozen = router.stats();
    TickDriver::default().run(&mut router, &mut rng, ms_to_ns(10_000));
    assert_eq!(router.stats(), frozen);
}
