//! In-memory cost-bounded LRU pixel cache.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::DynamicImage;
use lru::LruCache;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::domain::entities::ImageId;

/// Default maximum number of cached images.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Default cost ceiling in KB (50 MB).
pub const DEFAULT_MAX_COST: u64 = 50 * 1024;

/// Usage above this share of the ceiling triggers a pressure trim.
const PRESSURE_THRESHOLD_PERCENT: u64 = 90;

/// A pressure trim evicts down to this share of the ceiling.
const PRESSURE_TARGET_PERCENT: u64 = 80;

fn percent_of(value: u64, percent: u64) -> u64 {
    value / 100 * percent + value % 100 * percent / 100
}

struct CacheEntry {
    image: Arc<DynamicImage>,
    cost: u64,
}

struct CacheInner {
    entries: LruCache<ImageId, CacheEntry>,
    total_cost: u64,
    max_cost: u64,
}

impl CacheInner {
    /// Pops least recently used entries until `total_cost <= limit`.
    fn evict_to(&mut self, limit: u64) -> usize {
        let mut evicted = 0;
        while self.total_cost > limit {
            let Some((id, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.total_cost -= entry.cost;
            evicted += 1;
            trace!(id = %id, cost = entry.cost, "Evicted image from memory cache");
        }
        evicted
    }

    fn remove(&mut self, id: &ImageId) -> bool {
        match self.entries.pop(id) {
            Some(entry) => {
                self.total_cost -= entry.cost;
                true
            }
            None => false,
        }
    }
}

/// Bounded map from image id to decoded pixels.
///
/// The sum of entry costs never exceeds the configured ceiling once a
/// mutation returns. Entries are handed out as shared `Arc`s, so callers
/// can never alias the cached pixels mutably.
pub struct PixelCache {
    inner: RwLock<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PixelCache {
    /// Creates a new cache holding at most `capacity` entries and
    /// `max_cost` KB of pixels.
    #[must_use]
    pub fn new(capacity: usize, max_cost: u64) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: RwLock::new(CacheInner {
                entries: LruCache::new(cap),
                total_cost: 0,
                max_cost,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a new cache with the default capacity and ceiling.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_COST)
    }

    /// Looks up an image and marks it most recently used.
    ///
    /// The lookup shares the read lock with other readers. Promotion needs
    /// the write lock and is skipped when another thread holds the cache, so
    /// under contention a hit may leave the LRU order untouched.
    pub fn get(&self, id: &ImageId) -> Option<Arc<DynamicImage>> {
        let found = self.peek(id);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(id = %id, "Memory cache hit");
            if let Some(mut inner) = self.inner.try_write() {
                inner.entries.promote(id);
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(id = %id, "Memory cache miss");
        }
        found
    }

    /// Peeks at an image without promoting it in the LRU.
    /// Use this in read-only contexts to avoid write locks.
    pub fn peek(&self, id: &ImageId) -> Option<Arc<DynamicImage>> {
        let inner = self.inner.read();
        inner.entries.peek(id).map(|entry| entry.image.clone())
    }

    /// Returns true if `id` is cached, without promoting it.
    pub fn contains(&self, id: &ImageId) -> bool {
        self.inner.read().entries.contains(id)
    }

    /// Inserts or replaces an entry, then evicts until the ceiling holds.
    ///
    /// Returns false when `cost` alone exceeds the ceiling; nothing is cached
    /// in that case and any previous entry for `id` is dropped.
    pub fn put(&self, id: ImageId, image: Arc<DynamicImage>, cost: u64) -> bool {
        let mut inner = self.inner.write();

        if cost > inner.max_cost {
            inner.remove(&id);
            debug!(id = %id, cost, max_cost = inner.max_cost, "Image too large for memory cache");
            return false;
        }

        debug!(id = %id, cost, "Storing image in memory cache");
        inner.total_cost += cost;
        if let Some((replaced, old)) = inner.entries.push(id, CacheEntry { image, cost }) {
            inner.total_cost -= old.cost;
            trace!(id = %replaced, "Displaced memory cache entry");
        }

        let max_cost = inner.max_cost;
        inner.evict_to(max_cost);
        true
    }

    /// Changes the ceiling, evicting immediately if usage is above it.
    pub fn set_max_cost(&self, max_cost: u64) {
        let mut inner = self.inner.write();
        inner.max_cost = max_cost;
        let evicted = inner.evict_to(max_cost);
        debug!(max_cost, evicted, "Memory cache ceiling changed");
    }

    /// Cost ceiling in KB.
    #[must_use]
    pub fn max_cost(&self) -> u64 {
        self.inner.read().max_cost
    }

    /// Sum of the cost of every cached entry, in KB.
    #[must_use]
    pub fn total_cost(&self) -> u64 {
        self.inner.read().total_cost
    }

    /// Number of cached images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry and resets the cost to zero.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.total_cost = 0;
        debug!("Cleared memory image cache");
    }

    /// Maintenance pass: when usage is above 90% of the ceiling, trims down to
    /// 80% and leaves the ceiling unchanged. Returns the number of evictions.
    pub fn remove_if_exceeds_pressure(&self) -> usize {
        let mut inner = self.inner.write();
        let threshold = percent_of(inner.max_cost, PRESSURE_THRESHOLD_PERCENT);
        if inner.total_cost <= threshold {
            return 0;
        }

        let target = percent_of(inner.max_cost, PRESSURE_TARGET_PERCENT);
        let evicted = inner.evict_to(target);
        debug!(
            evicted,
            total_cost = inner.total_cost,
            max_cost = inner.max_cost,
            "Relieved memory cache pressure"
        );
        evicted
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let inner = self.inner.read();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: inner.entries.len(),
            total_cost: inner.total_cost,
            max_cost: inner.max_cost,
        }
    }
}

impl Default for PixelCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for PixelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelCache")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Current cost in KB.
    pub total_cost: u64,
    /// Cost ceiling in KB.
    pub max_cost: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {}/{} KB, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.total_cost, self.max_cost, self.hit_rate, self.hits, self.misses
        )
    }
}
