use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RuleError, RuleResult};
use crate::parser::{HtmlNode, HtmlParser};

/// Capacity, eviction and expiry settings shared by every in-memory store.
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionPolicy {
    pub capacity: usize,
    /// Occupancy ratio at which a batch eviction runs
    pub threshold: f64,
    /// Fraction of capacity removed per batch eviction
    pub evict_fraction: f64,
    pub access_weight: f64,
    pub age_weight: f64,
    pub ttl: Option<Duration>,
    /// Entries idle for a whole `sweep_interval` and scoring below this are
    /// dropped by [`ScoredCache::sweep`]
    pub min_score: Option<f64>,
    pub sweep_interval: Duration,
}

impl EvictionPolicy {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            threshold: 0.9,
            evict_fraction: 0.25,
            access_weight: 1.0,
            age_weight: 0.01,
            ttl: None,
            min_score: None,
            sweep_interval: Duration::from_secs(60),
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_min_score(mut self, min_score: Option<f64>) -> Self {
        self.min_score = min_score;
        self
    }

    fn high_water_mark(&self) -> usize {
        let capacity = self.capacity.max(1);
        ((capacity as f64 * self.threshold).ceil() as usize).clamp(1, capacity)
    }

    fn batch_size(&self) -> usize {
        ((self.capacity as f64 * self.evict_fraction).ceil() as usize).max(1)
    }

    fn is_expired(&self, created_at: Instant, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(created_at) >= ttl)
    }

    fn is_low_value<V>(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        self.min_score.is_some_and(|floor| {
            now.saturating_duration_since(entry.last_access) >= self.sweep_interval
                && entry.score(self, now) < floor
        })
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub last_access: Instant,
    pub access_count: u64,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            last_access: now,
            access_count: 0,
        }
    }

    /// Frequently used, recently created entries score highest.
    fn score(&self, policy: &EvictionPolicy, now: Instant) -> f64 {
        let age = now.saturating_duration_since(self.created_at).as_secs_f64();
        self.access_count as f64 * policy.access_weight - age * policy.age_weight
    }
}

/// Counters reported by every cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Bounded map with score-based batch eviction and optional TTL.
///
/// Expired entries are treated as misses and dropped when touched, and a
/// full sweep runs on the first access after each `sweep_interval`.
#[derive(Debug)]
pub struct ScoredCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    policy: EvictionPolicy,
    last_sweep: Instant,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<K, V> ScoredCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            entries: HashMap::new(),
            policy,
            last_sweep: Instant::now(),
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    /// Replace the policy and shrink immediately if the new capacity requires it.
    pub fn set_policy(&mut self, policy: EvictionPolicy) {
        self.policy = policy;
        while self.entries.len() >= self.policy.high_water_mark() && !self.entries.is_empty() {
            self.evict_lowest(None);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .is_some_and(|entry| !self.policy.is_expired(entry.created_at, now))
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        self.maybe_sweep();
        let now = Instant::now();

        let expired = match self.entries.get_mut(key) {
            None => {
                self.misses += 1;
                return None;
            }
            Some(entry) if self.policy.is_expired(entry.created_at, now) => true,
            Some(entry) => {
                entry.last_access = now;
                entry.access_count += 1;
                self.hits += 1;
                return Some(entry.value.clone());
            }
        };

        if expired {
            self.entries.remove(key);
            self.expirations += 1;
        }
        self.misses += 1;
        None
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.maybe_sweep();
        if !self.entries.contains_key(&key)
            && self.entries.len() + 1 >= self.policy.high_water_mark()
        {
            self.evict_lowest(Some(&key));
        }
        self.entries.insert(key, CacheEntry::new(value));
    }

    /// Update an existing live entry in place, or insert `default()`.
    pub fn upsert(&mut self, key: K, update: impl FnOnce(&mut V), default: impl FnOnce() -> V) {
        let now = Instant::now();
        if let Some(entry) = self.entries.get_mut(&key)
            && !self.policy.is_expired(entry.created_at, now)
        {
            update(&mut entry.value);
            entry.last_access = now;
            entry.access_count += 1;
            return;
        }
        self.insert(key, default());
    }

    pub fn try_get_or_insert_with<E>(
        &mut self,
        key: K,
        create: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = create()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values().map(|entry| &entry.value)
    }

    /// Remove expired entries and idle entries scoring below the policy's
    /// floor. Returns the number removed.
    pub fn sweep(&mut self) -> usize {
        let now = Instant::now();
        let policy = &self.policy;
        let (mut expired, mut low_value) = (0u64, 0u64);
        self.entries.retain(|_, entry| {
            if policy.is_expired(entry.created_at, now) {
                expired += 1;
                false
            } else if policy.is_low_value(entry, now) {
                low_value += 1;
                false
            } else {
                true
            }
        });
        self.expirations += expired;
        self.evictions += low_value;
        self.last_sweep = now;

        let removed = (expired + low_value) as usize;
        if removed > 0 {
            debug!(expired, low_value, remaining = self.entries.len(), "swept cache entries");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.policy.capacity,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
        }
    }

    pub fn reset_stats(&mut self) {
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
        self.expirations = 0;
    }

    fn maybe_sweep(&mut self) {
        let sweeps = self.policy.ttl.is_some() || self.policy.min_score.is_some();
        if sweeps && self.last_sweep.elapsed() >= self.policy.sweep_interval {
            self.sweep();
        }
    }

    fn evict_lowest(&mut self, keep: Option<&K>) {
        let now = Instant::now();
        let mut scored: Vec<(f64, K)> = self
            .entries
            .iter()
            .filter(|(key, _)| Some(*key) != keep)
            .map(|(key, entry)| (entry.score(&self.policy, now), key.clone()))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        let batch = self.policy.batch_size();
        let mut evicted = 0;
        for (_, key) in scored.into_iter().take(batch) {
            self.entries.remove(&key);
            evicted += 1;
        }
        self.evictions += evicted;
        debug!(evicted, remaining = self.entries.len(), "evicted lowest-scored cache entries");
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Regex compilation options that are part of the pattern cache key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PatternFlags {
    pub case_insensitive: bool,
    pub multi_line: bool,
    pub dot_matches_new_line: bool,
}

impl PatternFlags {
    pub const NONE: Self = Self {
        case_insensitive: false,
        multi_line: false,
        dot_matches_new_line: false,
    };

    pub const CASE_INSENSITIVE: Self = Self {
        case_insensitive: true,
        ..Self::NONE
    };

    /// Case-insensitive, with `.` matching newlines
    pub const SPANNING: Self = Self {
        case_insensitive: true,
        dot_matches_new_line: true,
        ..Self::NONE
    };
}

/// Compiled regexes shared by every rule, keyed by source and flags.
pub struct PatternCache {
    inner: Mutex<ScoredCache<(String, PatternFlags), Arc<Regex>>>,
}

impl PatternCache {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            inner: Mutex::new(ScoredCache::new(policy)),
        }
    }

    pub fn get_or_compile(&self, pattern: &str, flags: PatternFlags) -> RuleResult<Arc<Regex>> {
        let mut cache = lock(&self.inner);
        cache.try_get_or_insert_with((pattern.to_string(), flags), || {
            RegexBuilder::new(pattern)
                .case_insensitive(flags.case_insensitive)
                .multi_line(flags.multi_line)
                .dot_matches_new_line(flags.dot_matches_new_line)
                .build()
                .map(Arc::new)
                .map_err(|source| RuleError::Pattern {
                    pattern: pattern.to_string(),
                    source,
                })
        })
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_empty()
    }

    pub fn sweep(&self) -> usize {
        lock(&self.inner).sweep()
    }

    pub fn clear(&self) {
        lock(&self.inner).clear();
    }

    pub fn stats(&self) -> CacheStats {
        lock(&self.inner).stats()
    }

    pub fn reset_stats(&self) {
        lock(&self.inner).reset_stats();
    }

    pub fn set_policy(&self, policy: EvictionPolicy) {
        lock(&self.inner).set_policy(policy);
    }
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new(EvictionPolicy::with_capacity(500).with_min_score(Some(0.0)))
    }
}

/// Identity of a parsed document: content hash plus byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AstKey {
    pub hash: u64,
    pub len: usize,
}

impl AstKey {
    pub fn of(html: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        html.hash(&mut hasher);
        Self {
            hash: hasher.finish(),
            len: html.len(),
        }
    }
}

/// Parsed trees keyed by document identity.
pub struct AstCache {
    inner: Mutex<ScoredCache<AstKey, Arc<Vec<HtmlNode>>>>,
}

impl AstCache {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            inner: Mutex::new(ScoredCache::new(policy)),
        }
    }

    /// Return the cached tree for `html`, parsing it on a miss.
    ///
    /// Parsing happens outside the lock, so two threads racing on the same
    /// new document may both parse it; the trees are identical.
    pub fn get_or_parse(&self, html: &str, parser: &HtmlParser) -> Arc<Vec<HtmlNode>> {
        let key = AstKey::of(html);
        if let Some(tree) = lock(&self.inner).get(&key) {
            return tree;
        }

        let tree = Arc::new(parser.parse(html).nodes);
        lock(&self.inner).insert(key, Arc::clone(&tree));
        tree
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_empty()
    }

    pub fn sweep(&self) -> usize {
        lock(&self.inner).sweep()
    }

    pub fn clear(&self) {
        lock(&self.inner).clear();
    }

    pub fn stats(&self) -> CacheStats {
        lock(&self.inner).stats()
    }

    pub fn reset_stats(&self) {
        lock(&self.inner).reset_stats();
    }

    pub fn set_policy(&self, policy: EvictionPolicy) {
        lock(&self.inner).set_policy(policy);
    }
}

impl Default for AstCache {
    fn default() -> Self {
        Self::new(
            EvictionPolicy::with_capacity(100)
                .with_ttl(Some(Duration::from_secs(300)))
                .with_min_score(Some(0.0)),
        )
    }
}
