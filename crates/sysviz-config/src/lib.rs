//! Configuration management for sysviz
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence)
//! 2. Environment variables (SYSVIZ_* prefix, `__` between nested keys)
//! 3. sysviz.local.toml (gitignored, local overrides)
//! 4. sysviz.toml (git-tracked, project config)
//! 5. ~/.config/sysviz/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)
//!
//! The simulators never clamp their knobs. [`SysvizConfig::validate`] is the
//! place that rejects values outside the documented ranges before a run.

#![cfg_attr(test, allow(clippy::float_cmp))]

use serde::{Deserialize, Serialize};
use std::path::Path;
use sysviz_sim::{
    AutoscalerConfig, BreakerConfig, CacheConfig, FlowConfig, LoadTestConfig, NotifyConfig,
    RouterConfig, TrafficConfig,
};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main sysviz configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SysvizConfig {
    pub run: RunConfig,
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub autoscaler: AutoscalerConfig,
    pub router: RouterConfig,
    pub notify: NotifyConfig,
    pub traffic: TrafficConfig,
    pub flow: FlowConfig,
    pub load_test: LoadTestConfig,
}

/// How a headless run is driven.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub seed: u64,
    /// Simulated time to run for.
    pub duration_ms: u64,
    /// Length of one driver frame.
    pub frame_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            duration_ms: 30_000,
            frame_ms: 16,
        }
    }
}

impl SysvizConfig {
    /// Read a single TOML file, ignoring every other source.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every knob against its documented range.
    ///
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("run.frame_ms", self.run.frame_ms)?;

        let cache = &self.cache;
        within("cache.max_size", cache.max_size as f64, 1.0, 10.0)?;
        within("cache.ttl_ms", cache.ttl_ms as f64, 1_000.0, 60_000.0)?;
        positive("cache.auto_fetch_interval_ms", cache.auto_fetch_interval_ms)?;
        positive("cache.ttl_check_interval_ms", cache.ttl_check_interval_ms)?;
        positive("cache.auto_fetch_key_space", cache.auto_fetch_key_space as u64)?;

        let breaker = &self.breaker;
        within(
            "breaker.failure_threshold",
            f64::from(breaker.failure_threshold),
            1.0,
            10.0,
        )?;
        within(
            "breaker.recovery_timeout_ms",
            breaker.recovery_timeout_ms as f64,
            5_000.0,
            30_000.0,
        )?;
        within(
            "breaker.half_open_successes_required",
            f64::from(breaker.half_open_successes_required),
            1.0,
            5.0,
        )?;
        within(
            "breaker.service_health_pct",
            breaker.service_health_pct,
            0.0,
            100.0,
        )?;
        positive("breaker.call_interval_ms", breaker.call_interval_ms)?;
        positive(
            "breaker.recovery_check_interval_ms",
            breaker.recovery_check_interval_ms,
        )?;

        self.validate_autoscaler()?;

        let router = &self.router;
        within(
            "router.server_count",
            router.server_count as f64,
            2.0,
            f64::INFINITY,
        )?;
        within(
            "router.recovery_step_pct",
            f64::from(router.recovery_step_pct),
            1.0,
            100.0,
        )?;
        positive("router.request_interval_ms", router.request_interval_ms)?;
        positive("router.advance_interval_ms", router.advance_interval_ms)?;
        positive(
            "router.recovery_step_interval_ms",
            router.recovery_step_interval_ms,
        )?;

        self.validate_notify()?;

        let traffic = &self.traffic;
        within(
            "traffic.baseline_rps",
            traffic.baseline_rps,
            0.0,
            f64::INFINITY,
        )?;
        if traffic.max_capacity_rps <= 0.0 {
            return Err(ConfigError::invalid(
                "traffic.max_capacity_rps",
                "must be greater than 0",
            ));
        }
        positive("traffic.tick_interval_ms", traffic.tick_interval_ms)?;
        positive("traffic.history_len", traffic.history_len as u64)?;

        positive("flow.frame_interval_ms", self.flow.frame_interval_ms)?;

        let load = &self.load_test;
        positive("load_test.batches", load.batches)?;
        positive("load_test.batch_interval_ms", load.batch_interval_ms)?;
        within(
            "load_test.max_load_factor",
            load.max_load_factor,
            1.0,
            f64::INFINITY,
        )?;

        Ok(())
    }

    fn validate_autoscaler(&self) -> Result<(), ConfigError> {
        let scaler = &self.autoscaler;
        within(
            "autoscaler.scale_up_threshold_pct",
            scaler.scale_up_threshold_pct,
            50.0,
            95.0,
        )?;
        within(
            "autoscaler.scale_down_threshold_pct",
            scaler.scale_down_threshold_pct,
            10.0,
            50.0,
        )?;
        if scaler.scale_down_threshold_pct >= scaler.scale_up_threshold_pct {
            return Err(ConfigError::invalid(
                "autoscaler.scale_down_threshold_pct",
                "must be below scale_up_threshold_pct",
            ));
        }
        within(
            "autoscaler.min_instances",
            scaler.min_instances as f64,
            1.0,
            4.0,
        )?;
        within(
            "autoscaler.max_instances",
            scaler.max_instances as f64,
            2.0,
            10.0,
        )?;
        if scaler.min_instances >= scaler.max_instances {
            return Err(ConfigError::invalid(
                "autoscaler.min_instances",
                format!(
                    "must be below max_instances ({} >= {})",
                    scaler.min_instances, scaler.max_instances
                ),
            ));
        }
        within(
            "autoscaler.traffic_rps",
            scaler.traffic_rps,
            0.0,
            f64::INFINITY,
        )?;
        within("autoscaler.smoothing", scaler.smoothing, 0.0, 1.0)?;
        positive(
            "autoscaler.evaluation_interval_ms",
            scaler.evaluation_interval_ms,
        )?;
        positive(
            "autoscaler.lifecycle_interval_ms",
            scaler.lifecycle_interval_ms,
        )?;
        positive("autoscaler.load_interval_ms", scaler.load_interval_ms)?;
        Ok(())
    }

    fn validate_notify(&self) -> Result<(), ConfigError> {
        let sequential = &self.notify.sequential;
        probability(
            "notify.sequential.failure_probability",
            sequential.failure_probability,
        )?;
        probability(
            "notify.sequential.slow_probability",
            sequential.slow_probability,
        )?;
        ordered(
            "notify.sequential.fast_latency_min_ms",
            sequential.fast_latency_min_ms,
            sequential.fast_latency_max_ms,
        )?;
        ordered(
            "notify.sequential.slow_latency_min_ms",
            sequential.slow_latency_min_ms,
            sequential.slow_latency_max_ms,
        )?;

        let parallel = &self.notify.parallel;
        positive("notify.parallel.workers", parallel.workers as u64)?;
        probability(
            "notify.parallel.failure_probability",
            parallel.failure_probability,
        )?;
        probability(
            "notify.parallel.duplicate_probability",
            parallel.duplicate_probability,
        )?;
        ordered(
            "notify.parallel.latency_min_ms",
            parallel.latency_min_ms,
            parallel.latency_max_ms,
        )?;

        let partitioned = &self.notify.partitioned;
        positive("notify.partitioned.partitions", partitioned.partitions as u64)?;
        // Failed deliveries are retried until they succeed
        if !(0.0..1.0).contains(&partitioned.failure_probability) {
            return Err(ConfigError::invalid(
                "notify.partitioned.failure_probability",
                format!(
                    "must be in [0, 1), got {}",
                    partitioned.failure_probability
                ),
            ));
        }
        positive("notify.partitioned.redelivery_ms", partitioned.redelivery_ms)?;
        Ok(())
    }
}

fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be greater than 0"));
    }
    Ok(())
}

fn within(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_nan() || value < min || value > max {
        let reason = if max.is_infinite() {
            format!("must be at least {min}, got {value}")
        } else {
            format!("must be between {min} and {max}, got {value}")
        };
        return Err(ConfigError::invalid(field, reason));
    }
    Ok(())
}

fn probability(field: &'static str, value: f64) -> Result<(), ConfigError> {
    within(field, value, 0.0, 1.0)
}

fn ordered(field: &'static str, min: f64, max: f64) -> Result<(), ConfigError> {
    if min < 0.0 || min > max {
        return Err(ConfigError::invalid(
            field,
            format!("latency range {min}..{max} is empty or negative"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use sysviz_sim::{EvictionPolicy, Tier};
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = SysvizConfig::default();
        assert_eq!(config.run.seed, 42);
        assert_eq!(config.run.frame_ms, 16);
        assert_eq!(config.cache.max_size, 5);
        assert_eq!(config.cache.policy, EvictionPolicy::Lru);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.autoscaler.max_instances, 8);
        assert_eq!(config.notify.partitioned.partitions, 3);
    }

    #[test]
    fn test_defaults_are_valid() {
        SysvizConfig::default()
            .validate()
            .expect("defaults must validate");
    }

    #[test]
    fn test_min_instances_must_stay_below_max() {
        let mut config = SysvizConfig::default();
        config.autoscaler.min_instances = 4;
        config.autoscaler.max_instances = 4;

        match config.validate() {
            Err(ConfigError::Validation { field, .. }) => {
                assert_eq!(field, "autoscaler.min_instances");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_probabilities_are_bounded() {
        let mut config = SysvizConfig::default();
        config.notify.parallel.failure_probability = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation {
                field: "notify.parallel.failure_probability",
                ..
            })
        ));
    }

    #[test]
    fn test_partitioned_failure_must_stay_below_one() {
        let mut config = SysvizConfig::default();
        config.notify.partitioned.failure_probability = 1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation {
                field: "notify.partitioned.failure_probability",
                ..
            })
        ));

        config.notify.partitioned.failure_probability = 0.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_frame_is_rejected() {
        let mut config = SysvizConfig::default();
        config.run.frame_ms = 0;
        let err = config.validate().expect_err("zero frame");
        assert_eq!(
            err.to_string(),
            "Invalid value for run.frame_ms: must be greater than 0"
        );
    }

    #[test]
    fn test_breaker_health_range() {
        let mut config = SysvizConfig::default();
        config.breaker.service_health_pct = 120.0;
        let err = config.validate().expect_err("health above 100");
        assert!(err.to_string().contains("breaker.service_health_pct"));
    }

    #[test]
    fn test_from_file_reads_partial_sections() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("scenario.toml");
        fs::write(
            &path,
            r#"
[run]
seed = 7

[cache]
policy = "lfu"
max_size = 3

[flow]
tier = "legendary"
"#,
        )
        .expect("Failed to write config");

        let config = SysvizConfig::from_file(&path).expect("Failed to read config");
        assert_eq!(config.run.seed, 7);
        assert_eq!(config.run.duration_ms, 30_000);
        assert_eq!(config.cache.policy, EvictionPolicy::Lfu);
        assert_eq!(config.cache.max_size, 3);
        assert_eq!(config.cache.ttl_ms, CacheConfig::default().ttl_ms);
        assert_eq!(config.flow.tier, Tier::Legendary);
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("broken.toml");
        fs::write(&path, "[cache\nmax_size = ").expect("Failed to write config");

        assert!(matches!(
            SysvizConfig::from_file(&path),
            Err(ConfigError::ParseError { .. })
        ));
        assert!(matches!(
            SysvizConfig::from_file(temp_dir.path().join("missing.toml")),
            Err(ConfigError::ReadError { .. })
        ));
    }
}
