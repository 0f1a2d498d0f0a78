//! List command - simulators and the values their flags accept.

use sysviz_sim::{EvictionPolicy, FailureType, FlowProfile, LoadProfile, Tier, TrafficPattern};

use crate::style::{self, colors::SemanticStyle};

const SIMULATORS: [(&str, &str); 8] = [
    ("cache", "Eviction policies under scripted or random lookups"),
    ("breaker", "Circuit breaker against an upstream of given health"),
    ("autoscale", "Scaling controller under steady or patterned load"),
    ("faults", "Component failure, rerouting and staged recovery"),
    ("notify", "Sequential, worker-pool and partitioned delivery"),
    ("traffic", "Request-rate series for a traffic pattern"),
    ("flow", "Request particles through a tier's architecture"),
    ("load-test", "Batched requests against a tier's capacity"),
];

pub fn run() {
    style::print_section("Simulators:");
    for (name, about) in SIMULATORS {
        println!("  {} {}", format!("{name:<10}").code(), about.muted());
    }
    style::print_spacer();

    style::print_section("Eviction policies (--policy):");
    for policy in EvictionPolicy::ALL {
        println!(
            "  {} {}",
            format!("{:<10}", policy.as_str().to_ascii_lowercase()).code(),
            policy.description().muted()
        );
    }
    style::print_spacer();

    style::print_section("Traffic patterns (--pattern):");
    for pattern in TrafficPattern::ALL {
        println!(
            "  {} {}",
            format!("{:<10}", pattern.as_str()).code(),
            pattern.description().muted()
        );
    }
    style::print_spacer();

    style::print_section("Failure types (--inject):");
    let failures: Vec<String> = FailureType::ALL.iter().map(|f| f.code()).collect();
    println!("  {}", failures.join(", "));
    style::print_spacer();

    style::print_section("Tiers (--tier):");
    for tier in Tier::ALL {
        let flow = FlowProfile::for_tier(tier);
        let load = LoadProfile::for_tier(tier);
        println!(
            "  {} {} {}",
            tier.number(),
            format!("{:<10}", tier.as_str()).code(),
            format!(
                "cache {}, {:.0} req/s capacity, {:.0}% failure",
                if flow.cache_enabled { "on" } else { "off" },
                load.max_throughput_rps,
                load.failure_rate * 100.0
            )
            .muted()
        );
    }
}
