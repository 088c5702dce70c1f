//! Bounded LRU cache of materialized delta bases.
//!
//! Entries are keyed by graph node and bounded both by count and by total
//! bytes. Buffers larger than the byte bound are never cached. The cache
//! keeps counters so callers can observe residency.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Default entry bound.
pub const DEFAULT_MAX_ENTRIES: usize = 256;
/// Default byte bound (96 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 96 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_entries: usize,
    pub max_bytes: u64,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// Residency and traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    /// Entries dropped because the last dependent consumed them.
    pub releases: u64,
    pub peak_entries: usize,
    pub peak_bytes: u64,
}

struct Slot {
    data: Arc<[u8]>,
    tick: u64,
}

pub struct ObjectCache {
    limits: CacheLimits,
    slots: HashMap<usize, Slot>,
    /// Recency order: tick -> key. The smallest tick is evicted first.
    order: BTreeMap<u64, usize>,
    tick: u64,
    bytes: u64,
    stats: CacheStats,
}

impl ObjectCache {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            limits,
            slots: HashMap::new(),
            order: BTreeMap::new(),
            tick: 0,
            bytes: 0,
            stats: CacheStats::default(),
        }
    }

    pub fn get(&mut self, key: usize) -> Option<Arc<[u8]>> {
        let tick = self.next_tick();
        match self.slots.get_mut(&key) {
            Some(slot) => {
                self.order.remove(&slot.tick);
                slot.tick = tick;
                self.order.insert(tick, key);
                self.stats.hits += 1;
                Some(slot.data.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Insert a buffer, evicting least recently used entries as needed.
    /// Returns false when the buffer cannot be cached at all.
    pub fn insert(&mut self, key: usize, data: Arc<[u8]>) -> bool {
        let size = data.len() as u64;
        if self.limits.max_entries == 0 || size > self.limits.max_bytes {
            return false;
        }
        self.remove_slot(&key);

        while self.slots.len() >= self.limits.max_entries
            || self.bytes + size > self.limits.max_bytes
        {
            let Some((_, victim)) = self.order.pop_first() else {
                break;
            };
            if let Some(slot) = self.slots.remove(&victim) {
                self.bytes -= slot.data.len() as u64;
                self.stats.evictions += 1;
                tracing::trace!(node = victim, "evicted cached base");
            }
        }

        let tick = self.next_tick();
        self.order.insert(tick, key);
        self.slots.insert(key, Slot { data, tick });
        self.bytes += size;

        self.stats.insertions += 1;
        self.stats.peak_entries = self.stats.peak_entries.max(self.slots.len());
        self.stats.peak_bytes = self.stats.peak_bytes.max(self.bytes);
        true
    }

    /// Drop an entry whose dependents are all resolved.
    pub fn release(&mut self, key: usize) {
        if self.remove_slot(&key) {
            self.stats.releases += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn resident_bytes(&self) -> u64 {
        self.bytes
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn remove_slot(&mut self, key: &usize) -> bool {
        match self.slots.remove(key) {
            Some(slot) => {
                self.order.remove(&slot.tick);
                self.bytes -= slot.data.len() as u64;
                true
            }
            None => false,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}
