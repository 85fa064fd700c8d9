//! Bounded LRU memory cache.
//!
//! Entries carry a weight (one unit each unless a weigher is supplied) and the
//! total weight never exceeds the capacity: inserting past it evicts the least
//! recently used entries. Reads and writes both refresh recency.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Default cache capacity, in weight units.
pub const DEFAULT_CAPACITY: usize = 5 * 1024 * 1024;

/// Computes the weight of one entry.
pub type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> usize + Send + Sync>;

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of lookups answered from the cache.
    pub hits: u64,
    /// Number of lookups that found nothing (disabled lookups are not counted).
    pub misses: u64,
    /// Number of entries dropped to stay within capacity.
    pub evictions: u64,
}

struct Entry<V> {
    value: V,
    weight: usize,
    tick: u64,
}

struct LruInner<K, V> {
    map: HashMap<K, Entry<V>>,
    /// Access tick -> key; the first entry is the least recently used.
    order: BTreeMap<u64, K>,
    next_tick: u64,
    weight: usize,
}

impl<K: Hash + Eq + Clone, V> LruInner<K, V> {
    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn touch(&mut self, key: &K) -> Option<&V> {
        let tick = self.bump();
        let entry = self.map.get_mut(key)?;
        let previous = std::mem::replace(&mut entry.tick, tick);
        if let Some(k) = self.order.remove(&previous) {
            self.order.insert(tick, k);
        }
        Some(&entry.value)
    }

    fn take(&mut self, key: &K) -> Option<Entry<V>> {
        let entry = self.map.remove(key)?;
        self.order.remove(&entry.tick);
        self.weight = self.weight.saturating_sub(entry.weight);
        Some(entry)
    }

    fn trim(&mut self, capacity: usize) -> u64 {
        let mut evicted = 0;
        while self.weight > capacity {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            if let Some(entry) = self.map.remove(&key) {
                self.weight = self.weight.saturating_sub(entry.weight);
                evicted += 1;
            }
        }
        evicted
    }
}

/// Thread-safe, weight-bounded LRU cache.
///
/// The cache starts disabled. While disabled, lookups miss without touching
/// recency and writes or removals are ignored; existing entries survive and
/// become visible again once the cache is re-enabled.
///
/// # Example
///
/// ```
/// use store_guard::cache::BoundedCache;
///
/// let cache = BoundedCache::new(2);
/// cache.enable();
/// cache.put("a", 1);
/// cache.put("b", 2);
/// assert_eq!(cache.get(&"a"), Some(1));
/// cache.put("c", 3);
/// assert_eq!(cache.get(&"b"), None);
/// ```
pub struct BoundedCache<K, V> {
    capacity: usize,
    weigher: Weigher<K, V>,
    enabled: AtomicBool,
    inner: Mutex<LruInner<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self::with_weigher(capacity, |_, _| 1)
    }

    /// Create a cache whose entries weigh what `weigher` reports.
    ///
    /// An entry heavier than the whole capacity is never stored: it replaces
    /// any previous value under its key and then counts as evicted.
    pub fn with_weigher<F>(capacity: usize, weigher: F) -> Self
    where
        F: Fn(&K, &V) -> usize + Send + Sync + 'static,
    {
        BoundedCache {
            capacity,
            weigher: Arc::new(weigher),
            enabled: AtomicBool::new(false),
            inner: Mutex::new(LruInner {
                map: HashMap::new(),
                order: BTreeMap::new(),
                next_tick: 0,
                weight: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Look up a value, marking it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }

        let mut inner = self.inner.lock();
        match inner.touch(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace a value, then evict down to capacity.
    pub fn put(&self, key: K, value: V) {
        if !self.is_enabled() {
            return;
        }

        let weight = (self.weigher)(&key, &value);
        let mut inner = self.inner.lock();
        inner.take(&key);

        if weight > self.capacity {
            // Could never fit; dropped as if evicted right away.
            self.evictions.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let tick = inner.bump();
        inner.order.insert(tick, key.clone());
        inner.map.insert(key, Entry { value, weight, tick });
        inner.weight = inner.weight.saturating_add(weight);

        let evicted = inner.trim(self.capacity);
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    /// Remove one entry, returning its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }
        self.inner.lock().take(key).map(|entry| entry.value)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        if !self.is_enabled() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
        inner.weight = 0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored entries, enabled or not.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    /// Current total weight of stored entries.
    pub fn weight(&self) -> usize {
        self.inner.lock().weight
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> Default for BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<K, V> fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BoundedCache")
            .field("capacity", &self.capacity)
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .field("entries", &inner.map.len())
            .field("weight", &inner.weight)
            .finish()
    }
}
