//! Bounded caches for decoded frames and per-frame overlay sets.
//!
//! Both caches evict the least recently used entry first. Reads through
//! [`LruCache::get`] refresh recency; [`LruCache::peek`] does not.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use crate::overlay::OverlayRef;
use crate::sample::DecodedPayload;

/// A fixed-capacity map with least-recently-used eviction.
#[derive(Debug, Clone)]
pub struct LruCache<K, V> {
    capacity: usize,
    /// Entries with their last access tick
    entries: HashMap<K, (V, u64)>,
    /// Access tick -> key, oldest first
    recency: BTreeMap<u64, K>,
    tick: u64,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
        }
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if a key is cached, without touching recency.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Get an entry and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let tick = self.next_tick();
        let (_, last) = self.entries.get_mut(key)?;
        self.recency.remove(&*last);
        *last = tick;
        self.recency.insert(tick, key.clone());
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Get an entry without changing its recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Insert or replace an entry, making it most recently used.
    ///
    /// Returns the entry evicted to make room, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        let tick = self.next_tick();
        if let Some((_, last)) = self.entries.insert(key.clone(), (value, tick)) {
            self.recency.remove(&last);
            self.recency.insert(tick, key);
            return None;
        }
        self.recency.insert(tick, key);

        if self.entries.len() <= self.capacity {
            return None;
        }
        let (_, oldest) = self.recency.pop_first()?;
        self.entries.remove(&oldest).map(|(value, _)| (oldest, value))
    }

    /// Remove an entry.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, last) = self.entries.remove(key)?;
        self.recency.remove(&last);
        Some(value)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    /// Keys from least to most recently used.
    pub fn keys_by_recency(&self) -> impl Iterator<Item = &K> {
        self.recency.values()
    }
}

/// Cache key of a decoded frame: `"{sample_id}-{frame_number}"`.
pub fn frame_key(sample_id: &str, frame_number: u32) -> String {
    format!("{sample_id}-{frame_number}")
}

/// Process-wide cache of decoded frame payloads.
#[derive(Debug, Clone)]
pub struct FrameCache {
    inner: LruCache<String, Arc<DecodedPayload>>,
}

impl FrameCache {
    /// Create a cache holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: LruCache::new(capacity),
        }
    }

    /// Cached payload of a frame, refreshing its recency.
    pub fn get(&mut self, sample_id: &str, frame_number: u32) -> Option<Arc<DecodedPayload>> {
        self.inner.get(&frame_key(sample_id, frame_number)).cloned()
    }

    /// Check if a frame is cached.
    pub fn contains(&self, sample_id: &str, frame_number: u32) -> bool {
        self.inner.contains(&frame_key(sample_id, frame_number))
    }

    /// Cache a frame payload.
    pub fn insert(&mut self, sample_id: &str, frame_number: u32, payload: Arc<DecodedPayload>) {
        if let Some((evicted, _)) = self.inner.insert(frame_key(sample_id, frame_number), payload) {
            log::trace!("Frame cache evicted {}", evicted);
        }
    }

    /// Number of cached frames.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every cached frame.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

/// Result of a prefetch arena lookup.
#[derive(Debug, Clone)]
pub enum Prefetched {
    /// The frame's overlays are resident
    Resident(Arc<[OverlayRef]>),
    /// Not available yet; not an error
    Miss,
}

/// Per-looker arena mapping frame numbers to overlay sets.
#[derive(Debug, Clone)]
pub struct PrefetchArena {
    inner: LruCache<u32, Arc<[OverlayRef]>>,
}

impl PrefetchArena {
    /// Create an arena holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: LruCache::new(capacity),
        }
    }

    /// Overlay set of a frame, if resident.
    pub fn lookup(&mut self, frame_number: u32) -> Prefetched {
        match self.inner.get(&frame_number) {
            Some(overlays) => Prefetched::Resident(Arc::clone(overlays)),
            None => Prefetched::Miss,
        }
    }

    /// Check if a frame is resident.
    pub fn contains(&self, frame_number: u32) -> bool {
        self.inner.contains(&frame_number)
    }

    /// Store a frame's overlay set.
    pub fn insert(&mut self, frame_number: u32, overlays: impl Into<Arc<[OverlayRef]>>) {
        self.inner.insert(frame_number, overlays.into());
    }

    /// Number of resident frames.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every resident frame.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}
