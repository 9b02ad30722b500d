//! Tiered memory cache
//!
//! Tier-1 is a bounded in-process map in front of the durable store. Entries
//! carry a score blending importance with observed access frequency; capacity
//! eviction is fully deterministic given the entries, scores, and timestamps.
//! Tier-2 (the persistent RAMR layer) lives in [`ramr`].

pub mod ramr;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::memory::{content_matches, Memory, SearchFilters};

/// Bound on per-memory access history.
pub const ACCESS_PATTERN_CAP: usize = 100;

/// What touched a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Store,
    Search,
}

/// A single access observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub kind: AccessKind,
    pub at: DateTime<Utc>,
}

/// A cached memory with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub memory: Memory,
    pub inserted_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub score: f64,
    pub ttl_ms: u64,
}

impl CacheEntry {
    fn age_exceeds_ttl(&self, now: DateTime<Utc>) -> bool {
        let age_ms = (now - self.inserted_at).num_milliseconds();
        age_ms >= 0 && age_ms as u64 > self.ttl_ms
    }
}

/// Cache counters for status output.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    patterns: HashMap<String, VecDeque<AccessEvent>>,
}

/// Bounded tier-1 cache.
///
/// All methods take `&self`; the internal mutex keeps the §3 invariants under
/// concurrent handler executions. Hit/miss counters are maintained here, by
/// the cache itself - a search action is counted as a hit only when it
/// actually returned cached entries.
pub struct MemoryCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                patterns: HashMap::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        // A poisoned cache lock means a panic mid-update; the entries map is
        // still structurally sound, so keep serving.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// `0.6·importance + 0.3·min(frequency/10, 1) + 0.1·trending`
    ///
    /// The trending bit is carried for a future feature and is never set, so
    /// it currently contributes nothing.
    fn compute_score(importance: f64, frequency: usize, trending: bool) -> f64 {
        let trending_bit = if trending { 1.0 } else { 0.0 };
        0.6 * importance + 0.3 * ((frequency as f64) / 10.0).min(1.0) + 0.1 * trending_bit
    }

    /// Insert (or replace) an entry. The size bound holds when this returns.
    pub fn insert(&self, memory: Memory) {
        let now = Utc::now();
        let mut inner = self.lock();
        let frequency = inner
            .patterns
            .get(&memory.id)
            .map(VecDeque::len)
            .unwrap_or(0);
        let score = Self::compute_score(memory.metadata.importance(), frequency, false);
        let entry = CacheEntry {
            inserted_at: now,
            last_access: now,
            score,
            ttl_ms: self.config.default_ttl_ms,
            memory,
        };
        inner.entries.insert(entry.memory.id.clone(), entry);

        while inner.entries.len() > self.config.max_size {
            if !Self::evict_one(&mut inner, self.config.importance_threshold) {
                break;
            }
        }
    }

    /// Evict exactly one entry. Candidates sort by score ascending, then
    /// last_access ascending, then id; protected entries (score at or above
    /// the importance threshold) go only when nothing unprotected remains.
    fn evict_one(inner: &mut CacheInner, importance_threshold: f64) -> bool {
        let victim = {
            let mut candidates: Vec<&CacheEntry> = inner.entries.values().collect();
            candidates.sort_by(|a, b| {
                a.score
                    .total_cmp(&b.score)
                    .then(a.last_access.cmp(&b.last_access))
                    .then(a.memory.id.cmp(&b.memory.id))
            });
            candidates
                .iter()
                .find(|e| e.score < importance_threshold)
                .or_else(|| candidates.first())
                .map(|e| e.memory.id.clone())
        };
        match victim {
            Some(id) => {
                inner.entries.remove(&id);
                true
            }
            None => false,
        }
    }

    /// Look up by id, counting a hit or miss and refreshing the entry.
    pub fn get(&self, id: &str) -> Option<Memory> {
        let now = Utc::now();
        let mut inner = self.lock();
        let frequency = inner.patterns.get(id).map(VecDeque::len).unwrap_or(0);
        match inner.entries.get_mut(id) {
            Some(entry) => {
                entry.last_access = now;
                entry.score =
                    Self::compute_score(entry.memory.metadata.importance(), frequency, false);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.memory.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Presence check without touching counters or recency.
    pub fn contains(&self, id: &str) -> bool {
        self.lock().entries.contains_key(id)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.lock().entries.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn utilization(&self) -> f64 {
        if self.config.max_size == 0 {
            return 0.0;
        }
        self.len() as f64 / self.config.max_size as f64
    }

    /// Substring search over cached entries, most recently touched first.
    ///
    /// Counts one hit when anything matched, one miss otherwise; matched
    /// entries are refreshed.
    pub fn search(&self, query: &str, filters: &SearchFilters, limit: usize) -> Vec<Memory> {
        if limit == 0 {
            return Vec::new();
        }
        let now = Utc::now();
        let mut inner = self.lock();

        let mut matched: Vec<(DateTime<Utc>, String)> = inner
            .entries
            .values()
            .filter(|e| content_matches(&e.memory.content, query) && filters.matches(&e.memory))
            .map(|e| (e.last_access, e.memory.id.clone()))
            .collect();
        matched.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        matched.truncate(limit);

        if matched.is_empty() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }
        self.hits.fetch_add(1, Ordering::Relaxed);

        let mut results = Vec::with_capacity(matched.len());
        for (_, id) in matched {
            let frequency = inner.patterns.get(&id).map(VecDeque::len).unwrap_or(0);
            if let Some(entry) = inner.entries.get_mut(&id) {
                entry.last_access = now;
                entry.score =
                    Self::compute_score(entry.memory.metadata.importance(), frequency, false);
                results.push(entry.memory.clone());
            }
        }
        results
    }

    /// Append an access observation, trimming to the per-id bound.
    pub fn record_access(&self, id: &str, kind: AccessKind) {
        let mut inner = self.lock();
        let pattern = inner.patterns.entry(id.to_string()).or_default();
        pattern.push_back(AccessEvent {
            kind,
            at: Utc::now(),
        });
        while pattern.len() > ACCESS_PATTERN_CAP {
            pattern.pop_front();
        }
    }

    pub fn access_frequency(&self, id: &str) -> usize {
        self.lock().patterns.get(id).map(VecDeque::len).unwrap_or(0)
    }

    /// Drop entries past their TTL whose importance is below the protection
    /// threshold. Returns the number evicted.
    pub fn optimize(&self) -> usize {
        let now = Utc::now();
        let threshold = self.config.importance_threshold;
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .entries
            .values()
            .filter(|e| e.age_exceeds_ttl(now) && e.memory.metadata.importance() < threshold)
            .map(|e| e.memory.id.clone())
            .collect();
        for id in &expired {
            inner.entries.remove(id);
        }
        expired.len()
    }

    /// Evict the lowest-priority fraction of entries (maintenance pressure
    /// relief). Protection does not apply here.
    pub fn evict_fraction(&self, fraction: f64) -> usize {
        let mut inner = self.lock();
        let count = ((inner.entries.len() as f64) * fraction).ceil() as usize;
        if count == 0 {
            return 0;
        }
        let mut candidates: Vec<(f64, DateTime<Utc>, String)> = inner
            .entries
            .values()
            .map(|e| (e.score, e.last_access, e.memory.id.clone()))
            .collect();
        candidates.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });
        let victims: Vec<String> = candidates.into_iter().take(count).map(|c| c.2).collect();
        for id in &victims {
            inner.entries.remove(id);
        }
        victims.len()
    }

    /// Mark old, low-attention entries as archive candidates. Returns the
    /// number newly marked.
    pub fn mark_archive_candidates(
        &self,
        older_than_days: i64,
        retention_threshold: f64,
    ) -> usize {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let mut inner = self.lock();
        let mut marked = 0;
        for entry in inner.entries.values_mut() {
            if entry.inserted_at > cutoff {
                continue;
            }
            let attention = entry
                .memory
                .metadata
                .selective_attention
                .as_ref()
                .map(|sa| sa.attention_score)
                .unwrap_or_else(|| entry.memory.metadata.importance());
            if attention >= retention_threshold {
                continue;
            }
            if let Some(sa) = entry.memory.metadata.selective_attention.as_mut() {
                if !sa.archive_candidate {
                    sa.archive_candidate = true;
                    marked += 1;
                }
            }
        }
        marked
    }

    /// Category frequencies across cached entries.
    pub fn category_counts(&self) -> HashMap<String, usize> {
        let inner = self.lock();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for entry in inner.entries.values() {
            for category in &entry.memory.metadata.categories {
                *counts.entry(category.clone()).or_default() += 1;
            }
        }
        counts
    }

    /// Total relationship edges across cached entries.
    pub fn relationship_total(&self) -> usize {
        self.lock()
            .entries
            .values()
            .map(|e| e.memory.metadata.relationships.len())
            .sum()
    }

    /// Cloned snapshot of all entries (status and context rendering).
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        self.lock().entries.values().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            size: self.len(),
            max_size: self.config.max_size,
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}
