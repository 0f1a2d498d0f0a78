//! # sysviz-sim: Deterministic System-Design Simulations
//!
//! This crate models the behaviours a system-design course visualises:
//! cache eviction, circuit breaking, auto-scaling, failure rerouting,
//! notification fan-out, traffic shapes and request flow. Every simulator is
//! an owned state struct advanced by an external tick source with an
//! injected random source, so runs are reproducible from a seed.

// Simulation code intentionally uses patterns that trigger pedantic lints
#![allow(clippy::cast_precision_loss)] // Rates and percentages are f64
#![allow(clippy::cast_possible_truncation)] // ms/px values are small and non-negative
#![allow(clippy::cast_sign_loss)] // Rounded counts are clamped at zero first
#![allow(clippy::module_name_repetitions)] // CacheConfig in cache, etc.
#![allow(clippy::must_use_candidate)] // Accessors everywhere
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::struct_excessive_bools)] // Config structs have feature flags
#![allow(clippy::doc_markdown)]
#![cfg_attr(test, allow(clippy::float_cmp))] // Test assertions use exact float comparisons
#![cfg_attr(test, allow(clippy::similar_names))]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Tick Driver                              │
//! │      advances one Simulation in fixed frames (default 16 ms)     │
//! │                                                                   │
//! │  ┌─────────────┐   ┌──────────────┐   ┌─────────────────────┐   │
//! │  │ SimClock    │   │ TimerScope   │   │ SimRng / Scripted   │   │
//! │  │ (discrete)  │   │ (EventQueue) │   │ (deterministic)     │   │
//! │  └─────────────┘   └──────────────┘   └─────────────────────┘   │
//! │                                                                   │
//! │  ┌─────────────────────────────────────────────────────────────┐ │
//! │  │                       Simulators                             │ │
//! │  │  CacheEngine  CircuitBreaker  Autoscaler  FaultRouter        │ │
//! │  │  NotificationPipeline  TrafficGenerator  FlowAnimator        │ │
//! │  │  LoadTest                                                    │ │
//! │  └─────────────────────────────────────────────────────────────┘ │
//! │                                                                   │
//! │  ┌─────────────────────────────────────────────────────────────┐ │
//! │  │           Snapshots  +  ExplanationLog  (→ tracing)          │ │
//! │  └─────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use sysviz_sim::{
//!     BreakerConfig, CircuitBreaker, CircuitMode, SimRng, Simulation, TickDriver, ms_to_ns,
//! };
//!
//! let config = BreakerConfig::default()
//!     .with_failure_threshold(3)
//!     .with_service_health_pct(0.0);
//! let mut breaker = CircuitBreaker::new(config);
//! breaker.start();
//!
//! TickDriver::default().run(&mut breaker, &mut SimRng::new(42), ms_to_ns(1_000));
//! assert_eq!(breaker.state().mode, CircuitMode::Open);
//! ```
//!
//! ## Key Concepts
//!
//! - **`TimerScope`**: The single cancellation handle of a simulator. `stop`
//!   disarms every pending timer at once, so nothing fires after a reset.
//! - **`Simulation`**: `start`/`stop`/`reset`/`advance`/`snapshot`, shared by
//!   every simulator and driven by `TickDriver`.
//! - **`Rng`**: Every probability draw goes through an injected source;
//!   `ScriptedRng` dictates exact outcomes in tests.
//! - **`ExplanationLog`**: Human-readable transition sentences, also emitted
//!   as `tracing` events carrying the simulated time.

mod clock;
mod driver;
mod error;
mod event;
mod explain;
mod rng;
mod tier;
mod timer;

pub mod autoscaler;
pub mod cache;
pub mod circuit_breaker;
pub mod flow;
pub mod load_test;
pub mod notify;
pub mod router;
pub mod traffic;

pub use clock::{
    Clock, NS_PER_MS, NS_PER_SEC, SimClock, ms_f64_to_ns, ms_to_ns, ns_to_ms, ns_to_ms_f64,
    ns_to_sec, sec_to_ns,
};
pub use driver::{DEFAULT_FRAME_NS, RunSummary, Simulation, TickDriver};
pub use error::SimError;
pub use event::{Event, EventId, EventQueue};
pub use explain::{DEFAULT_EXPLANATION_CAPACITY, Explanation, ExplanationLog};
pub use rng::{Rng, ScriptedRng, SimRng};
pub use tier::Tier;
pub use timer::{Fired, TimerId, TimerScope};

pub use autoscaler::{
    Autoscaler, AutoscalerConfig, AutoscalerSnapshot, InstanceStatus, ScalingCounters,
    ScalingDecision, ServerInstance,
};
pub use cache::{
    CacheConfig, CacheEngine, CacheEntry, CacheOp, CacheSnapshot, CacheStats, EvictionPolicy,
    LastOperation, Lookup,
};
pub use circuit_breaker::{
    BreakerConfig, BreakerCounters, BreakerSnapshot, BreakerState, CallOutcome, CallResult,
    CircuitBreaker, CircuitMode,
};
pub use flow::{
    FlowAnimator, FlowConfig, FlowProfile, FlowSnapshot, FlowStats, Particle, ParticleStage,
};
pub use load_test::{LoadProfile, LoadTest, LoadTestConfig, LoadTestSnapshot, LoadTestStats};
pub use notify::{
    DeliveryCounters, DeliveryPipeline, DeliveryStatus, NotificationPipeline, NotifyConfig,
    NotifySnapshot, RunOutcome, RunWindow, Subscriber, TierDetail,
};
pub use router::{
    ComponentNode, FailureType, FaultRouter, NodeHealth, NodeKind, RequestStatus, RequestToken,
    RouterConfig, RouterSnapshot, RouterStats,
};
pub use traffic::{
    SystemStatus, TrafficConfig, TrafficGenerator, TrafficPattern, TrafficPoint, TrafficSnapshot,
};
