//! Tag-aware in-process cache store.

use crate::config::CacheConfig;
use crate::index::TagIndex;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dispatch_core::cache::{CachePriority, CacheStats, EntryOptions, EvictionReason, TagInfo};
use dispatch_core::ports::CacheService;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Callback invoked after an entry leaves the cache, outside any lock.
pub type EvictionListener = Arc<dyn Fn(&str, EvictionReason) + Send + Sync>;

/// Fixed per-entry bookkeeping added to the payload size in estimates.
const ENTRY_OVERHEAD_BYTES: usize = 96;

#[derive(Debug)]
struct CacheEntry {
    value: Arc<[u8]>,
    priority: CachePriority,
    expires_at: Instant,
    sliding: Option<Duration>,
    last_access: Instant,
    sequence: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        if now >= self.expires_at {
            return true;
        }
        self.sliding
            .is_some_and(|window| now >= self.last_access + window)
    }

    fn size(&self, key: &str) -> usize {
        key.len() + self.value.len() + ENTRY_OVERHEAD_BYTES
    }
}

struct Candidate {
    key: String,
    priority: CachePriority,
    last_access: Instant,
    sequence: u64,
}

enum Lookup {
    Hit(Arc<[u8]>),
    Expired,
    Miss,
}

/// In-process cache with tag invalidation, expiration and a size bound.
///
/// Entries live in a sharded map. Lock order is the invalidation gate, then
/// entry shard, then the key side of the [`TagIndex`], then its tag side; no
/// index guard is ever held while the entry map is accessed.
///
/// The gate orders conditional writes against invalidations: a
/// [`set_if_fresh`](Self::set_if_fresh) either sees the bumped tag
/// generations and skips, or finishes before the invalidation looks up the
/// tag's keys.
pub struct TagCache {
    entries: DashMap<String, CacheEntry>,
    index: TagIndex,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    sequence: AtomicU64,
    clears: AtomicU64,
    gate: RwLock<()>,
    compacting: AtomicBool,
    listener: Option<EvictionListener>,
}

impl TagCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            index: TagIndex::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            clears: AtomicU64::new(0),
            gate: RwLock::new(()),
            compacting: AtomicBool::new(false),
            listener: None,
        }
    }

    /// Register a callback for every removal.
    pub fn with_eviction_listener(mut self, listener: EvictionListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn index(&self) -> &TagIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the value for `key`, refreshing its sliding window.
    pub fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        let now = Instant::now();
        let lookup = match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.last_access = now;
                Lookup::Hit(entry.value.clone())
            }
            Some(_) => Lookup::Expired,
            None => Lookup::Miss,
        };

        match lookup {
            Lookup::Hit(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key, "Cache hit");
                Some(value)
            }
            Lookup::Expired => {
                self.remove_where(key, EvictionReason::Expired, |e| e.is_expired(now));
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key, "Cache miss (expired)");
                None
            }
            Lookup::Miss => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key, "Cache miss");
                None
            }
        }
    }

    /// Inserts or replaces `key`. Tags of a replaced entry are dropped first.
    pub fn set(&self, key: &str, value: impl Into<Arc<[u8]>>, tags: &[String], options: EntryOptions) {
        let replaced = self.insert(key, value.into(), tags, options);
        self.after_insert(key, replaced);
    }

    /// Stamp of the invalidation state of `tags`, see
    /// [`set_if_fresh`](Self::set_if_fresh).
    pub fn tag_stamp(&self, tags: &[String]) -> u64 {
        self.clears.load(Ordering::Acquire) + self.index.generation_sum(tags)
    }

    /// Like [`set`](Self::set), but only if none of `tags` was invalidated
    /// (and the cache was not cleared) since `stamp` was taken.
    pub fn set_if_fresh(
        &self,
        key: &str,
        value: impl Into<Arc<[u8]>>,
        tags: &[String],
        options: EntryOptions,
        stamp: u64,
    ) -> bool {
        let replaced = {
            let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
            if self.tag_stamp(tags) != stamp {
                debug!(key, "Cache write skipped, tags invalidated during load");
                return false;
            }
            self.insert(key, value.into(), tags, options)
        };
        self.after_insert(key, replaced);
        true
    }

    fn insert(&self, key: &str, value: Arc<[u8]>, tags: &[String], options: EntryOptions) -> bool {
        let now = Instant::now();
        let (absolute, sliding) = self.resolve_expiration(&options);
        let entry = CacheEntry {
            value,
            priority: options.priority,
            expires_at: now + absolute,
            sliding,
            last_access: now,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        let tags = dedup(tags);

        let replaced = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                self.index.dissociate(key);
                occupied.insert(entry);
                self.index.associate(key, &tags);
                true
            }
            Entry::Vacant(vacant) => {
                let _guard = vacant.insert(entry);
                self.index.associate(key, &tags);
                false
            }
        };
        debug!(key, tags = tags.len(), "Cache set");
        replaced
    }

    fn after_insert(&self, key: &str, replaced: bool) {
        if replaced {
            self.notify(key, EvictionReason::Replaced);
        }
        if self.entries.len() > self.config.max_entries {
            self.compact();
        }
    }

    /// Removes `key`. Removing a missing key is a no-op.
    pub fn remove(&self, key: &str) -> bool {
        self.remove_where(key, EvictionReason::Removed, |_| true)
    }

    /// Removes every entry recorded under any of `tags`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_tags(&self, tags: &[String]) -> usize {
        let tags = dedup(tags);
        {
            let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
            for tag in &tags {
                self.index.bump_generation(tag);
            }
        }

        let mut removed = 0;
        for tag in &tags {
            let keys = self.index.keys_for_tag(tag);
            for key in &keys {
                if self.remove_where(key, EvictionReason::TagInvalidated, |_| true) {
                    removed += 1;
                }
            }
            trace!(tag = %tag, keys = keys.len(), "Tag invalidated");
        }
        if removed > 0 {
            debug!(tags = ?tags, removed, "Invalidated cache tags");
        }
        removed
    }

    pub fn invalidate_tag(&self, tag: &str) -> usize {
        self.invalidate_tags(&[tag.to_string()])
    }

    /// Drops every entry and, with them, every index association.
    pub fn invalidate_all(&self) -> usize {
        {
            let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
            self.clears.fetch_add(1, Ordering::AcqRel);
        }
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let removed = keys
            .iter()
            .filter(|key| self.remove_where(key, EvictionReason::Cleared, |_| true))
            .count();
        info!(removed, "Cache cleared");
        removed
    }

    /// Removes every key containing `pattern`, ignoring case.
    pub fn remove_by_pattern(&self, pattern: &str) -> usize {
        let needle = pattern.to_lowercase();
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().to_lowercase().contains(&needle))
            .map(|e| e.key().clone())
            .collect();
        let removed = keys
            .iter()
            .filter(|key| self.remove_where(key, EvictionReason::Removed, |_| true))
            .count();
        debug!(pattern, removed, "Removed cache keys by pattern");
        removed
    }

    /// Removes every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(String, u64)> = self
            .entries
            .iter()
            .filter(|e| e.is_expired(now))
            .map(|e| (e.key().clone(), e.sequence))
            .collect();

        expired
            .into_iter()
            .filter(|(key, sequence)| {
                self.remove_where(key, EvictionReason::Expired, |e| {
                    e.sequence == *sequence && e.is_expired(now)
                })
            })
            .count()
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let (total_keys, memory) = self
            .entries
            .iter()
            .filter(|e| !e.is_expired(now))
            .fold((0usize, 0u64), |(count, bytes), e| {
                (count + 1, bytes + e.size(e.key()) as u64)
            });

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let (hit_rate, miss_rate) = if lookups == 0 {
            (0.0, 0.0)
        } else {
            (hits as f64 / lookups as f64, misses as f64 / lookups as f64)
        };

        CacheStats {
            total_keys,
            estimated_memory_bytes: memory,
            estimated_memory: format_bytes(memory),
            hits,
            misses,
            hit_rate,
            miss_rate,
            evictions: self.evictions.load(Ordering::Relaxed),
            tags: self
                .index
                .tag_counts()
                .into_iter()
                .map(|(tag, key_count)| TagInfo { tag, key_count })
                .collect(),
        }
    }

    /// Spawns a task that purges expired entries every `interval`.
    ///
    /// The task stops once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(strong) = cache.upgrade() else {
                    debug!("Cache dropped, stopping expiration sweeper");
                    break;
                };
                let purged = strong.purge_expired();
                if purged > 0 {
                    debug!(purged, "Swept expired cache entries");
                }
            }
        })
    }

    /// Every entry gets an absolute expiration; the sliding window is only
    /// defaulted when neither expiration was given.
    fn resolve_expiration(&self, options: &EntryOptions) -> (Duration, Option<Duration>) {
        let absolute = options
            .absolute_expiration
            .unwrap_or(self.config.default_absolute_expiration);
        let sliding = match (options.absolute_expiration, options.sliding_expiration) {
            (None, None) => Some(self.config.default_sliding_expiration),
            (_, sliding) => sliding,
        };
        (absolute, sliding)
    }

    /// Single removal path: drops the entry and its index associations
    /// while holding the entry lock, then notifies the listener.
    fn remove_where(
        &self,
        key: &str,
        reason: EvictionReason,
        predicate: impl FnOnce(&CacheEntry) -> bool,
    ) -> bool {
        let removed = match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                if predicate(occupied.get()) {
                    self.index.dissociate(key);
                    occupied.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        };

        if removed {
            if reason != EvictionReason::Removed {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            self.notify(key, reason);
        }
        removed
    }

    fn compact(&self) {
        if self.compacting.swap(true, Ordering::AcqRel) {
            return;
        }
        let _reset = ResetOnDrop(&self.compacting);

        let expired = self.purge_expired();
        let len = self.entries.len();
        if len <= self.config.max_entries {
            debug!(expired, "Cache compaction removed expired entries");
            return;
        }

        let fraction = (len as f64 * self.config.compaction_percentage).ceil() as usize;
        let target = fraction.max(len - self.config.max_entries);

        let mut candidates: Vec<Candidate> = self
            .entries
            .iter()
            .map(|e| Candidate {
                key: e.key().clone(),
                priority: e.priority,
                last_access: e.last_access,
                sequence: e.sequence,
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.last_access.cmp(&b.last_access))
        });

        let evicted = candidates
            .into_iter()
            .take(target)
            .filter(|c| {
                self.remove_where(&c.key, EvictionReason::Capacity, |e| {
                    e.sequence == c.sequence
                })
            })
            .count();

        info!(expired, evicted, remaining = self.entries.len(), "Cache compacted");
    }

    fn notify(&self, key: &str, reason: EvictionReason) {
        if let Some(listener) = &self.listener {
            listener(key, reason);
        }
    }
}

impl Default for TagCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

struct ResetOnDrop<'a>(&'a AtomicBool);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn dedup(tags: &[String]) -> Vec<String> {
    tags.iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Human-readable byte count, e.g. `"1.50 KB"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", UNITS[unit])
}

#[async_trait]
impl CacheService for TagCache {
    async fn get_bytes(&self, key: &str) -> Option<Arc<[u8]>> {
        self.get(key)
    }

    async fn set_bytes(&self, key: &str, value: Vec<u8>, tags: &[String], options: EntryOptions) {
        self.set(key, value, tags, options);
    }

    async fn tag_stamp(&self, tags: &[String]) -> u64 {
        TagCache::tag_stamp(self, tags)
    }

    async fn set_bytes_if_fresh(
        &self,
        key: &str,
        value: Vec<u8>,
        tags: &[String],
        options: EntryOptions,
        stamp: u64,
    ) -> bool {
        self.set_if_fresh(key, value, tags, options, stamp)
    }

    async fn remove(&self, key: &str) {
        TagCache::remove(self, key);
    }

    async fn remove_by_pattern(&self, pattern: &str) -> usize {
        TagCache::remove_by_pattern(self, pattern)
    }

    async fn invalidate_tags(&self, tags: &[String]) {
        TagCache::invalidate_tags(self, tags);
    }

    async fn invalidate_all(&self) {
        TagCache::invalidate_all(self);
    }

    async fn stats(&self) -> CacheStats {
        TagCache::stats(self)
    }
}
