//! Fault-tolerance router.
//!
//! A fixed topology (load balancer, N servers, one cache, primary and replica
//! databases) carries a stream of simulated requests. Each request walks the
//! canonical path `lb → server-1 → cache → db-primary`, one hop per advance
//! tick. When a hop lands on a node that is not serving, the request is
//! rerouted in place to another serving node of the same kind, or fails if
//! there is none.
//!
//! One failure can be active at a time. Recovery is a linear ramp of fixed
//! steps; when it reaches 100 % every node is restored and the downtime and
//! recovery-time statistics are frozen.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::clock::{ms_to_ns, ns_to_ms, ns_to_sec};
use crate::driver::Simulation;
use crate::error::SimError;
use crate::explain::{Explanation, ExplanationLog};
use crate::rng::Rng;
use crate::timer::TimerScope;

pub const LOAD_BALANCER_ID: &str = "lb";
pub const CACHE_ID: &str = "cache";
pub const PRIMARY_DB_ID: &str = "db-primary";
pub const REPLICA_DB_ID: &str = "db-replica";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub server_count: usize,
    pub request_interval_ms: u64,
    pub advance_interval_ms: u64,
    pub recovery_step_pct: u8,
    pub recovery_step_interval_ms: u64,
    /// Terminal requests retained for display alongside in-flight ones.
    pub terminal_history: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            server_count: 3,
            request_interval_ms: 500,
            advance_interval_ms: 200,
            recovery_step_pct: 5,
            recovery_step_interval_ms: 100,
            terminal_history: 10,
        }
    }
}

// ============================================================================
// Topology
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    LoadBalancer,
    Server,
    Cache,
    Database,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    Healthy,
    Unhealthy,
    Recovering,
    /// Standby promoted to stand in for a failed primary.
    Rerouting,
}

impl NodeHealth {
    /// True if requests may be routed through a node in this state.
    pub fn is_serving(self) -> bool {
        matches!(self, NodeHealth::Healthy | NodeHealth::Rerouting)
    }
}

impl fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeHealth::Healthy => "healthy",
            NodeHealth::Unhealthy => "unhealthy",
            NodeHealth::Recovering => "recovering",
            NodeHealth::Rerouting => "rerouting",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    pub health: NodeHealth,
    pub is_primary: bool,
}

impl ComponentNode {
    fn new(id: impl Into<String>, kind: NodeKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            health: NodeHealth::Healthy,
            is_primary: false,
        }
    }
}

fn topology(server_count: usize) -> Vec<ComponentNode> {
    let mut nodes = vec![ComponentNode::new(
        LOAD_BALANCER_ID,
        NodeKind::LoadBalancer,
        "Load Balancer",
    )];
    for n in 1..=server_count.max(1) {
        nodes.push(ComponentNode::new(
            format!("server-{n}"),
            NodeKind::Server,
            format!("Server {n}"),
        ));
    }
    nodes.push(ComponentNode::new(CACHE_ID, NodeKind::Cache, "Cache"));
    nodes.push(ComponentNode {
        is_primary: true,
        ..ComponentNode::new(PRIMARY_DB_ID, NodeKind::Database, "Primary DB")
    });
    nodes.push(ComponentNode::new(
        REPLICA_DB_ID,
        NodeKind::Database,
        "Replica DB",
    ));
    nodes
}

/// Component class a failure is injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureType {
    Server,
    Database,
    Cache,
    Network,
}

impl FailureType {
    pub const ALL: [FailureType; 4] = [
        FailureType::Server,
        FailureType::Database,
        FailureType::Cache,
        FailureType::Network,
    ];
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureType::Server => "server",
            FailureType::Database => "database",
            FailureType::Cache => "cache",
            FailureType::Network => "network",
        })
    }
}

impl FromStr for FailureType {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(FailureType::Server),
            "database" | "db" => Ok(FailureType::Database),
            "cache" => Ok(FailureType::Cache),
            "network" => Ok(FailureType::Network),
            _ => Err(SimError::unknown(
                "failure type",
                s,
                "server, database, cache, network",
            )),
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    /// In flight on a rewritten path.
    Rerouted,
    Success,
    Failed,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Success | RequestStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestToken {
    pub id: u64,
    pub path: Vec<String>,
    pub step: usize,
    pub status: RequestStatus,
    /// Set once any hop was rerouted; survives into the terminal status.
    pub rerouted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RouterStats {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub rerouted: u64,
    pub downtime_s: f64,
    pub recovery_time_s: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterSnapshot {
    pub now_ms: u64,
    pub running: bool,
    pub nodes: Vec<ComponentNode>,
    pub requests: Vec<RequestToken>,
    pub active_failure: Option<FailureType>,
    pub recovery_progress_pct: Option<u8>,
    pub stats: RouterStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouterTimer {
    Request,
    Advance,
    RecoveryStep,
}

// ============================================================================
// Router
// ============================================================================

#[derive(Debug, Clone)]
pub struct FaultRouter {
    config: RouterConfig,
    nodes: Vec<ComponentNode>,
    requests: Vec<RequestToken>,
    next_request: u64,
    active_failure: Option<FailureType>,
    failure_started_ns: u64,
    recovery_progress: Option<u8>,
    stats: RouterStats,
    running: bool,
    timers: TimerScope<RouterTimer>,
    log: ExplanationLog,
}

impl FaultRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            nodes: topology(config.server_count),
            config,
            requests: Vec::new(),
            next_request: 0,
            active_failure: None,
            failure_started_ns: 0,
            recovery_progress: None,
            stats: RouterStats::default(),
            running: false,
            timers: TimerScope::new(),
            log: ExplanationLog::new(Self::NAME),
        }
    }

    pub fn nodes(&self) -> &[ComponentNode] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&ComponentNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn node_mut(&mut self, id: &str) -> Option<&mut ComponentNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn requests(&self) -> &[RequestToken] {
        &self.requests
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    pub fn active_failure(&self) -> Option<FailureType> {
        self.active_failure
    }

    pub fn recovery_progress(&self) -> Option<u8> {
        self.recovery_progress
    }

    fn last_server_id(&self) -> String {
        format!("server-{}", self.config.server_count.max(1))
    }

    /// Injects a failure. Ignored (returns `false`) while one is active.
    pub fn inject_failure(&mut self, failure: FailureType) -> bool {
        if self.active_failure.is_some() {
            return false;
        }
        let now = self.timers.now();
        self.active_failure = Some(failure);
        self.failure_started_ns = now;
        self.stats.downtime_s = 0.0;

        let text = match failure {
            FailureType::Server => {
                self.set_health("server-2", NodeHealth::Unhealthy);
                "Server failure detected: load balancer rerouting traffic to healthy instances"
            }
            FailureType::Database => {
                self.set_health(PRIMARY_DB_ID, NodeHealth::Unhealthy);
                if let Some(replica) = self.node_mut(REPLICA_DB_ID) {
                    replica.health = NodeHealth::Rerouting;
                    replica.label = "Replica → Primary".to_string();
                }
                "Primary database failure: promoting replica to primary"
            }
            FailureType::Cache => {
                for node in &mut self.nodes {
                    if node.kind == NodeKind::Cache {
                        node.health = NodeHealth::Unhealthy;
                    }
                }
                "Cache failure: requests lose the cache tier"
            }
            FailureType::Network => {
                let isolated = self.last_server_id();
                self.set_health(&isolated, NodeHealth::Unhealthy);
                "Network partition detected: isolated nodes removed from the pool"
            }
        };
        self.log.notable(now, text);
        true
    }

    fn set_health(&mut self, id: &str, health: NodeHealth) {
        if let Some(node) = self.node_mut(id) {
            node.health = health;
        }
    }

    /// Starts the recovery ramp. Returns `false` if there is nothing to
    /// recover or a recovery is already under way.
    pub fn trigger_recovery(&mut self) -> bool {
        if self.active_failure.is_none() || self.recovery_progress.is_some() {
            return false;
        }
        self.recovery_progress = Some(0);
        for node in &mut self.nodes {
            if node.health == NodeHealth::Unhealthy {
                node.health = NodeHealth::Recovering;
            }
        }
        self.arm_recovery();
        self.log.notable(
            self.timers.now(),
            "Recovery initiated: auto-healing is replacing failed instances",
        );
        true
    }

    fn arm_recovery(&mut self) {
        self.timers.every(
            ms_to_ns(self.config.recovery_step_interval_ms),
            RouterTimer::RecoveryStep,
        );
    }

    fn recovery_step(&mut self) {
        let Some(progress) = self.recovery_progress else {
            self.timers.cancel_where(|t| *t == RouterTimer::RecoveryStep);
            return;
        };
        let progress = progress
            .saturating_add(self.config.recovery_step_pct.max(1))
            .min(100);
        self.recovery_progress = Some(progress);
        if progress < 100 {
            return;
        }

        let now = self.timers.now();
        self.timers.cancel_where(|t| *t == RouterTimer::RecoveryStep);
        self.nodes = topology(self.config.server_count);
        self.active_failure = None;
        self.recovery_progress = None;

        let elapsed = now.saturating_sub(self.failure_started_ns);
        self.stats.recovery_time_s = ns_to_sec(elapsed);
        self.stats.downtime_s = ns_to_sec(elapsed);
        self.log.notable(
            now,
            format!(
                "Recovery complete: all systems healthy, recovery time {:.1}s",
                self.stats.recovery_time_s
            ),
        );
    }

    /// Creates one request on the canonical path.
    pub fn spawn_request(&mut self) -> u64 {
        let id = self.next_request;
        self.next_request += 1;
        let path = vec![
            LOAD_BALANCER_ID.to_string(),
            "server-1".to_string(),
            CACHE_ID.to_string(),
            PRIMARY_DB_ID.to_string(),
        ];
        self.requests.push(RequestToken {
            id,
            path,
            step: 0,
            status: RequestStatus::Pending,
            rerouted: false,
        });
        self.stats.total += 1;
        id
    }

    /// Moves every in-flight request one hop.
    pub fn advance_requests(&mut self) {
        let now = self.timers.now();
        let mut requests = std::mem::take(&mut self.requests);

        for request in &mut requests {
            if request.status.is_terminal() {
                continue;
            }
            self.step_request(request, now);
        }

        self.requests = requests;
        self.prune_terminal();

        if self.active_failure.is_some() {
            self.stats.downtime_s = ns_to_sec(now.saturating_sub(self.failure_started_ns));
        }
    }

    fn step_request(&mut self, request: &mut RequestToken, now: u64) {
        let Some(current_id) = request.path.get(request.step).cloned() else {
            request.status = RequestStatus::Success;
            self.stats.success += 1;
            return;
        };
        let Some(current) = self.node(&current_id) else {
            request.status = RequestStatus::Failed;
            self.stats.failed += 1;
            return;
        };

        if !current.health.is_serving() {
            let kind = current.kind;
            let alternative = self
                .nodes
                .iter()
                .find(|n| n.kind == kind && n.health.is_serving() && n.id != current_id)
                .map(|n| n.id.clone());

            match alternative {
                Some(alt) => {
                    self.stats.rerouted += 1;
                    self.log.detail(
                        now,
                        format!("req-{} rerouted from {current_id} to {alt}", request.id),
                    );
                    request.path[request.step] = alt;
                    request.status = RequestStatus::Rerouted;
                    request.rerouted = true;
                }
                None => {
                    self.stats.failed += 1;
                    self.log.detail(
                        now,
                        format!("req-{} failed at {current_id}: no healthy alternative", request.id),
                    );
                    request.status = RequestStatus::Failed;
                }
            }
            return;
        }

        request.step += 1;
        if request.step >= request.path.len() {
            request.status = RequestStatus::Success;
            self.stats.success += 1;
        }
    }

    fn prune_terminal(&mut self) {
        let terminal = self
            .requests
            .iter()
            .filter(|r| r.status.is_terminal())
            .count();
        let mut to_drop = terminal.saturating_sub(self.config.terminal_history);
        self.requests.retain(|r| {
            if to_drop > 0 && r.status.is_terminal() {
                to_drop -= 1;
                false
            } else {
                true
            }
        });
    }

    fn on_timer(&mut self, timer: RouterTimer) {
        match timer {
            RouterTimer::Request => {
                self.spawn_request();
            }
            RouterTimer::Advance => self.advance_requests(),
            RouterTimer::RecoveryStep => self.recovery_step(),
        }
    }
}

impl Simulation for FaultRouter {
    type Snapshot = RouterSnapshot;
    const NAME: &'static str = "fault-router";

    fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.timers.every(
            ms_to_ns(self.config.request_interval_ms),
            RouterTimer::Request,
        );
        self.timers.every(
            ms_to_ns(self.config.advance_interval_ms),
            RouterTimer::Advance,
        );
        if self.recovery_progress.is_some()
            && !self.timers.any_armed(|t| *t == RouterTimer::RecoveryStep)
        {
            self.arm_recovery();
        }
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

    fn advance<R: Rng>(&mut self, elapsed_ns: u64, _rng: &mut R) {
        let deadline = self.timers.now().saturating_add(elapsed_ns);
        while let Some(fired) = self.timers.pop_due(deadline) {
            self.on_timer(fired.kind);
        }
        self.timers.settle(deadline);
    }

    fn snapshot(&self) -> RouterSnapshot {
        RouterSnapshot {
            now_ms: ns_to_ms(self.timers.now()),
            running: self.running,
            nodes: self.nodes.clone(),
            requests: self.requests.clone(),
            active_failure: self.active_failure,
            recovery_progress_pct: self.recovery_progress,
            stats: self.stats,
        }
    }

    fn drain_explanations(&mut self) -> Vec<Explanation> {
        self.log.drain()
    }
}
