//! Cache eviction engine.
//!
//! A bounded key→entry store with a selectable eviction policy. Misses are
//! filled from a synthetic "database" and, when the store is full, exactly one
//! victim is chosen by the active policy before the new entry goes in.
//!
//! | Policy | Victim                                             |
//! |--------|----------------------------------------------------|
//! | LRU    | smallest last access (ties: earlier access order)  |
//! | LFU    | smallest access count                              |
//! | FIFO   | smallest creation time                             |
//! | TTL    | like FIFO, plus periodic expiry of stale entries   |
//!
//! Ties go to the first entry in insertion order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::clock::{ms_to_ns, ns_to_ms};
use crate::driver::Simulation;
use crate::error::SimError;
use crate::explain::{Explanation, ExplanationLog};
use crate::rng::Rng;
use crate::timer::TimerScope;

// ============================================================================
// Configuration
// ============================================================================

/// Eviction policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    #[default]
    Lru,
    Lfu,
    Ttl,
    Fifo,
}

impl EvictionPolicy {
    pub const ALL: [EvictionPolicy; 4] = [
        EvictionPolicy::Lru,
        EvictionPolicy::Lfu,
        EvictionPolicy::Ttl,
        EvictionPolicy::Fifo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "LRU",
            EvictionPolicy::Lfu => "LFU",
            EvictionPolicy::Ttl => "TTL",
            EvictionPolicy::Fifo => "FIFO",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            EvictionPolicy::Lru => {
                "Least Recently Used: evicts the entry that has gone unread the longest"
            }
            EvictionPolicy::Lfu => "Least Frequently Used: evicts the entry read the fewest times",
            EvictionPolicy::Ttl => {
                "Time-To-Live: entries expire a fixed time after creation regardless of reads"
            }
            EvictionPolicy::Fifo => "First In First Out: evicts entries in insertion order",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "ttl" => Ok(EvictionPolicy::Ttl),
            "fifo" => Ok(EvictionPolicy::Fifo),
            _ => Err(SimError::unknown("eviction policy", s, "lru, lfu, ttl, fifo")),
        }
    }
}

/// Cache knobs. Valid ranges: `max_size` 1–10, `ttl_ms` 1 000–60 000.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub policy: EvictionPolicy,
    pub max_size: usize,
    /// Time-to-live stamped onto newly created entries.
    pub ttl_ms: u64,
    /// Interval of the random lookups issued while running.
    pub auto_fetch_interval_ms: u64,
    /// Interval of the expiry sweep while running under TTL.
    pub ttl_check_interval_ms: u64,
    /// Lookups draw from `key-1` … `key-{auto_fetch_key_space}`.
    pub auto_fetch_key_space: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: EvictionPolicy::Lru,
            max_size: 5,
            ttl_ms: 10_000,
            auto_fetch_interval_ms: 1_000,
            ttl_check_interval_ms: 1_000,
            auto_fetch_key_space: 10,
        }
    }
}

impl CacheConfig {
    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }
}

// ============================================================================
// Entries and counters
// ============================================================================

/// A cached entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub access_count: u64,
    pub last_access_ns: u64,
    /// Global access sequence, orders accesses within one instant.
    pub access_seq: u64,
    pub created_at_ns: u64,
    pub ttl_ns: u64,
}

impl CacheEntry {
    fn recency(&self) -> (u64, u64) {
        (self.last_access_ns, self.access_seq)
    }

    /// True if the entry has outlived its TTL at `now_ns`.
    pub fn is_expired(&self, now_ns: u64) -> bool {
        now_ns.saturating_sub(self.created_at_ns) > self.ttl_ns
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOp {
    Hit,
    Miss,
    Evict,
}

/// Most recent operation, for highlighting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastOperation {
    pub op: CacheOp,
    /// Key involved (comma-separated list for a TTL sweep).
    pub key: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Capacity evictions plus TTL expiries.
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups served from cache; 0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Result of [`CacheEngine::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hit { value: String },
    Miss { value: String, evicted: Option<String> },
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit { .. })
    }

    pub fn value(&self) -> &str {
        match self {
            Lookup::Hit { value } | Lookup::Miss { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub now_ms: u64,
    pub running: bool,
    pub policy: EvictionPolicy,
    pub max_size: usize,
    pub entries: Vec<CacheEntry>,
    pub stats: CacheStats,
    pub hit_rate: f64,
    pub last_operation: Option<LastOperation>,
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheTimer {
    AutoFetch,
    TtlCheck,
}

/// Bounded cache under a selectable eviction policy.
#[derive(Debug, Clone)]
pub struct CacheEngine {
    config: CacheConfig,
    /// Entries in insertion order.
    entries: Vec<CacheEntry>,
    stats: CacheStats,
    last_operation: Option<LastOperation>,
    access_seq: u64,
    /// Next key for [`CacheEngine::fetch_next`].
    next_key: u64,
    running: bool,
    timers: TimerScope<CacheTimer>,
    log: ExplanationLog,
}

impl CacheEngine {
    pub fn new(config: CacheConfig) -> Self {
        let mut log = ExplanationLog::new(Self::NAME);
        log.detail(
            0,
            format!("{}: {}", config.policy, config.policy.description()),
        );
        Self {
            config,
            entries: Vec::new(),
            stats: CacheStats::default(),
            last_operation: None,
            access_seq: 0,
            next_key: 1,
            running: false,
            timers: TimerScope::new(),
            log,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn last_operation(&self) -> Option<&LastOperation> {
        self.last_operation.as_ref()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }

    fn next_seq(&mut self) -> u64 {
        self.access_seq += 1;
        self.access_seq
    }

    /// Looks up `key`. A miss fetches `data-<key>-<now_ms>` and inserts it.
    pub fn get(&mut self, key: &str) -> Lookup {
        let now = self.timers.now();

        if let Some(idx) = self.position(key) {
            let seq = self.next_seq();
            let entry = &mut self.entries[idx];
            entry.access_count += 1;
            entry.last_access_ns = now;
            entry.access_seq = seq;
            let value = entry.value.clone();

            self.stats.hits += 1;
            self.last_operation = Some(LastOperation {
                op: CacheOp::Hit,
                key: key.to_string(),
            });
            self.log
                .detail(now, format!("Cache HIT for \"{key}\": served from cache"));
            return Lookup::Hit { value };
        }

        let value = format!("data-{key}-{}", ns_to_ms(now));
        let evicted = self.miss(key, value.clone());
        Lookup::Miss { value, evicted }
    }

    /// Writes `value` under `key`.
    ///
    /// An existing entry is overwritten and touched without counting a hit or
    /// a miss. An absent key takes the miss path with the caller's value.
    /// Returns the evicted key, if any.
    pub fn put(&mut self, key: &str, value: impl Into<String>) -> Option<String> {
        let value = value.into();
        let now = self.timers.now();

        if let Some(idx) = self.position(key) {
            let seq = self.next_seq();
            let entry = &mut self.entries[idx];
            entry.value = value;
            entry.last_access_ns = now;
            entry.access_seq = seq;
            return None;
        }

        self.miss(key, value)
    }

    /// Fetches the next key in the `key-1`, `key-2`, … sequence.
    pub fn fetch_next(&mut self) -> Lookup {
        let key = format!("key-{}", self.next_key);
        self.next_key += 1;
        self.get(&key)
    }

    fn miss(&mut self, key: &str, value: String) -> Option<String> {
        let now = self.timers.now();
        let policy = self.config.policy;

        self.stats.misses += 1;
        self.last_operation = Some(LastOperation {
            op: CacheOp::Miss,
            key: key.to_string(),
        });

        let mut evicted = None;
        if self.config.max_size == 0 {
            self.log.detail(
                now,
                format!("Cache MISS for \"{key}\": cache disabled, reading through"),
            );
        } else if self.entries.len() >= self.config.max_size {
            if let Some(idx) = self.candidate_index() {
                let victim = self.entries.remove(idx);
                self.stats.evictions += 1;
                self.log.detail(
                    now,
                    format!(
                        "Cache MISS for \"{key}\": evicting \"{}\" using {policy} policy",
                        victim.key
                    ),
                );
                evicted = Some(victim.key);
            }
        } else {
            self.log.detail(
                now,
                format!("Cache MISS for \"{key}\": fetching from database"),
            );
        }

        // Capacity zero means pass-through.
        if self.config.max_size > 0 {
            let seq = self.next_seq();
            self.entries.push(CacheEntry {
                key: key.to_string(),
                value,
                access_count: 1,
                last_access_ns: now,
                access_seq: seq,
                created_at_ns: now,
                ttl_ns: ms_to_ns(self.config.ttl_ms),
            });
        }
        evicted
    }

    fn candidate_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            let Some(b) = best else {
                best = Some(idx);
                continue;
            };
            let current = &self.entries[b];
            let better = match self.config.policy {
                EvictionPolicy::Lru => entry.recency() < current.recency(),
                EvictionPolicy::Lfu => entry.access_count < current.access_count,
                EvictionPolicy::Fifo | EvictionPolicy::Ttl => {
                    entry.created_at_ns < current.created_at_ns
                }
            };
            if better {
                best = Some(idx);
            }
        }
        best
    }

    /// The entry the active policy would evict next.
    pub fn eviction_candidate(&self) -> Option<&CacheEntry> {
        self.candidate_index().map(|idx| &self.entries[idx])
    }

    /// Removes every entry older than its TTL. Returns the expired keys.
    pub fn expire_due(&mut self) -> Vec<String> {
        let now = self.timers.now();
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.is_expired(now));
        self.entries = kept;

        let keys: Vec<String> = expired.into_iter().map(|e| e.key).collect();
        if !keys.is_empty() {
            let joined = keys.join(", ");
            self.stats.evictions += keys.len() as u64;
            self.log
                .notable(now, format!("TTL expired: {joined} removed from cache"));
            self.last_operation = Some(LastOperation {
                op: CacheOp::Evict,
                key: joined,
            });
        }
        keys
    }

    /// Empties the store and zeroes the counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.stats = CacheStats::default();
        self.last_operation = None;
        self.log.notable(self.timers.now(), "Cache cleared");
    }

    /// Switches policy. The store and counters are cleared.
    pub fn set_policy(&mut self, policy: EvictionPolicy) {
        self.config.policy = policy;
        self.entries.clear();
        self.stats = CacheStats::default();
        self.last_operation = None;

        self.timers.cancel_where(|t| *t == CacheTimer::TtlCheck);
        if self.running && policy == EvictionPolicy::Ttl {
            self.timers.every(
                ms_to_ns(self.config.ttl_check_interval_ms),
                CacheTimer::TtlCheck,
            );
        }
        self.log
            .notable(self.timers.now(), format!("{policy}: {}", policy.description()));
    }

    /// Changes capacity. Shrinking evicts down to the new bound immediately.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.config.max_size = max_size;
        let now = self.timers.now();
        while self.entries.len() > max_size {
            let Some(idx) = self.candidate_index() else {
                break;
            };
            let victim = self.entries.remove(idx);
            self.stats.evictions += 1;
            self.log.detail(
                now,
                format!("Capacity lowered to {max_size}: evicting \"{}\"", victim.key),
            );
        }
    }

    /// Changes the TTL stamped onto entries created from now on.
    pub fn set_ttl_ms(&mut self, ttl_ms: u64) {
        self.config.ttl_ms = ttl_ms;
    }

    fn on_timer<R: Rng>(&mut self, timer: CacheTimer, rng: &mut R) {
        match timer {
            CacheTimer::AutoFetch => {
                let n = rng.next_usize(self.config.auto_fetch_key_space.max(1)) + 1;
                self.get(&format!("key-{n}"));
            }
            CacheTimer::TtlCheck => {
                self.expire_due();
            }
        }
    }
}

impl Simulation for CacheEngine {
    type Snapshot = CacheSnapshot;
    const NAME: &'static str = "cache";

    fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.timers.every(
            ms_to_ns(self.config.auto_fetch_interval_ms),
            CacheTimer::AutoFetch,
        );
        if self.config.policy == EvictionPolicy::Ttl {
            self.timers.every(
                ms_to_ns(self.config.ttl_check_interval_ms),
                CacheTimer::TtlCheck,
            );
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

    fn advance<R: Rng>(&mut self, elapsed_ns: u64, rng: &mut R) {
        let deadline = self.timers.now().saturating_add(elapsed_ns);
        while let Some(fired) = self.timers.pop_due(deadline) {
            self.on_timer(fired.kind, rng);
        }
        self.timers.settle(deadline);
    }

    fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            now_ms: ns_to_ms(self.timers.now()),
            running: self.running,
            policy: self.config.policy,
            max_size: self.config.max_size,
            entries: self.entries.clone(),
            stats: self.stats,
            hit_rate: self.stats.hit_rate(),
            last_operation: self.last_operation.clone(),
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
    use test_case::test_case;

    fn cache(policy: EvictionPolicy, max_size: usize) -> CacheEngine {
        CacheEngine::new(
            CacheConfig::default()
                .with_policy(policy)
                .with_max_size(max_size),
        )
    }

    fn keys(cache: &CacheEngine) -> Vec<&str> {
        cache.entries().iter().map(|e| e.key.as_str()).collect()
    }

    fn tick(cache: &mut CacheEngine, ms: u64) {
        cache.advance(ms_to_ns(ms), &mut ScriptedRng::constant(0.0));
    }

    #[test]
    fn lru_same_instant_evicts_least_recent() {
        let mut c = cache(EvictionPolicy::Lru, 3);
        for key in ["A", "B", "C", "A"] {
            c.get(key);
        }
        let result = c.get("D");
        assert_eq!(
            result,
            Lookup::Miss {
                value: "data-D-0".into(),
                evicted: Some("B".into())
            }
        );
        assert_eq!(keys(&c), vec!["A", "C", "D"]);
        assert_eq!(c.stats().hits, 1);
        assert_eq!(c.stats().misses, 4);
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn lfu_evicts_fewest_reads_first_on_tie() {
        let mut c = cache(EvictionPolicy::Lfu, 3);
        for key in ["A", "B", "C", "A", "C"] {
            c.get(key);
        }
        c.get("D");
        assert_eq!(keys(&c), vec!["A", "C", "D"]);

        // D is the only entry read once
        assert_eq!(c.eviction_candidate().map(|e| e.key.as_str()), Some("D"));
    }

    #[test_case(EvictionPolicy::Fifo ; "fifo")]
    #[test_case(EvictionPolicy::Ttl ; "ttl")]
    fn creation_order_policies_ignore_reads(policy: EvictionPolicy) {
        let mut c = cache(policy, 2);
        c.get("A");
        tick(&mut c, 10);
        c.get("B");
        tick(&mut c, 10);
        c.get("A");
        c.get("A");
        c.get("C");
        assert_eq!(keys(&c), vec!["B", "C"]);
    }

    #[test]
    fn put_on_present_key_is_neither_hit_nor_miss() {
        let mut c = cache(EvictionPolicy::Lru, 2);
        c.put("A", "one");
        c.put("B", "two");
        tick(&mut c, 5);
        assert_eq!(c.put("A", "uno"), None);
        assert_eq!(c.stats().hits, 0);
        assert_eq!(c.stats().misses, 2);

        // A was touched, so B is the LRU victim
        assert_eq!(c.put("C", "three"), Some("B".into()));
        assert_eq!(c.get("A").value(), "uno");
    }

    #[test]
    fn ttl_sweep_removes_stale_entries() {
        let mut c = CacheEngine::new(
            CacheConfig::default()
                .with_policy(EvictionPolicy::Ttl)
                .with_ttl_ms(3_000),
        );
        c.start();
        c.stop(); // no auto-fetch noise
        c.get("old");
        tick(&mut c, 2_000);
        c.get("young");
        tick(&mut c, 1_500);

        assert_eq!(c.expire_due(), vec!["old".to_string()]);
        assert_eq!(keys(&c), vec!["young"]);
        assert_eq!(c.stats().evictions, 1);
        assert_eq!(c.last_operation().map(|o| o.op), Some(CacheOp::Evict));
    }

    #[test]
    fn running_ttl_cache_expires_on_timer() {
        let mut c = CacheEngine::new(
            CacheConfig {
                auto_fetch_interval_ms: 1_000_000,
                ..CacheConfig::default()
                    .with_policy(EvictionPolicy::Ttl)
                    .with_ttl_ms(2_000)
            },
        );
        c.start();
        c.get("k");
        tick(&mut c, 2_500);
        assert!(c.contains("k"));
        tick(&mut c, 1_000);
        assert!(!c.contains("k"));
    }

    #[test]
    fn auto_fetch_draws_keys_in_range() {
        let mut c = cache(EvictionPolicy::Lru, 10);
        c.start();
        c.advance(ms_to_ns(5_000), &mut ScriptedRng::new(vec![0.0, 0.95]));
        assert_eq!(c.stats().hits + c.stats().misses, 5);
        assert!(c.contains("key-1"));
        assert!(c.contains("key-10"));
    }

    #[test]
    fn stop_silences_auto_fetch() {
        let mut c = cache(EvictionPolicy::Lru, 5);
        c.start();
        let mut rng = SimRng::new(4);
        c.advance(ms_to_ns(3_000), &mut rng);
        c.stop();
        let before = c.stats();
        c.advance(ms_to_ns(10_000), &mut rng);
        assert_eq!(c.stats(), before);
    }

    #[test]
    fn set_policy_clears_state() {
        let mut c = cache(EvictionPolicy::Lru, 3);
        c.get("A");
        c.set_policy(EvictionPolicy::Lfu);
        assert!(c.is_empty());
        assert_eq!(c.stats(), CacheStats::default());
        let last = c.drain_explanations().pop().map(|e| e.text);
        assert!(last.is_some_and(|t| t.starts_with("LFU")));
    }

    #[test]
    fn shrinking_capacity_evicts_immediately() {
        let mut c = cache(EvictionPolicy::Fifo, 5);
        for key in ["A", "B", "C", "D"] {
            c.get(key);
        }
        c.set_max_size(2);
        assert_eq!(keys(&c), vec!["C", "D"]);
        assert_eq!(c.stats().evictions, 2);
    }

    #[test]
    fn zero_capacity_passes_through() {
        let mut c = cache(EvictionPolicy::Lru, 0);
        assert!(!c.get("A").is_hit());
        assert!(!c.get("A").is_hit());
        assert!(c.is_empty());

        let notes = c.drain_explanations();
        assert_eq!(notes.len(), 2);
        assert!(notes.iter().all(|n| n.text.contains("cache disabled")));
    }

    #[test]
    fn hit_rate_is_zero_without_lookups() {
        assert!(CacheStats::default().hit_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn fetch_next_walks_key_sequence() {
        let mut c = cache(EvictionPolicy::Lru, 5);
        c.fetch_next();
        c.fetch_next();
        assert_eq!(keys(&c), vec!["key-1", "key-2"]);
    }

    #[test_case("LRU", EvictionPolicy::Lru)]
    #[test_case("lfu", EvictionPolicy::Lfu)]
    #[test_case("Fifo", EvictionPolicy::Fifo)]
    #[test_case("ttl", EvictionPolicy::Ttl)]
    fn policy_parses(input: &str, expected: EvictionPolicy) {
        assert_eq!(input.parse::<EvictionPolicy>(), Ok(expected));
    }

    proptest! {
        #[test]
        fn store_never_exceeds_capacity(
            max_size in 1usize..8,
            policy in prop::sample::select(EvictionPolicy::ALL.to_vec()),
            ops in prop::collection::vec((0u8..12, 0u64..50), 1..200),
        ) {
            let mut c = cache(policy, max_size);
            for (key, gap_ms) in ops {
                tick(&mut c, gap_ms);
                c.get(&format!("k{key}"));
                prop_assert!(c.len() <= max_size);
            }
        }

        #[test]
        fn lru_victim_has_globally_smallest_recency(
            ops in prop::collection::vec((0u8..8, 0u64..3), 1..200),
        ) {
            let mut c = cache(EvictionPolicy::Lru, 4);
            for (key, gap_ms) in ops {
                tick(&mut c, gap_ms);
                let key = format!("k{key}");
                let expected_victim = if !c.contains(&key) && c.len() >= 4 {
                    c.entries()
                        .iter()
                        .min_by_key(|e| (e.last_access_ns, e.access_seq))
                        .map(|e| e.key.clone())
                } else {
                    None
                };
                if let Lookup::Miss { evicted, .. } = c.get(&key) {
                    prop_assert_eq!(evicted, expected_victim);
                }
            }
        }

        #[test]
        fn ttl_entries_gone_after_expiry_check(
            ttl_ms in 1_000u64..5_000,
            gaps in prop::collection::vec(0u64..2_000, 1..30),
        ) {
            let mut c = CacheEngine::new(
                CacheConfig::default()
                    .with_policy(EvictionPolicy::Ttl)
                    .with_max_size(100)
                    .with_ttl_ms(ttl_ms),
            );
            for (i, gap) in gaps.into_iter().enumerate() {
                tick(&mut c, gap);
                c.get(&format!("k{i}"));
            }
            tick(&mut c, 500);
            c.expire_due();
            let now = c.now();
            prop_assert!(c.entries().iter().all(|e| now - e.created_at_ns <= e.ttl_ns));
        }
    }
}
