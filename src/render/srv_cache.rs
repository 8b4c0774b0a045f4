//! Shader-resource-view pool for the zero-copy render path (§4.4.4).
//!
//! An unordered pool, not a map: the decoder's GPU surface pool is small
//! (<=20 surfaces typical) so a sequential scan beats a hash map's
//! bookkeeping at this size. Generic over the cached view type so the
//! hit/miss/invalidation behavior is unit-testable without a live GPU
//! device; `GpuRenderer` instantiates it with a pair of real `wgpu`
//! `TextureView`s.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceKey {
    pub surface_handle: u64,
    pub array_slice: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SrvCacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl SrvCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct SrvCache<V> {
    entries: Vec<(SurfaceKey, V)>,
    stats: SrvCacheStats,
}

impl<V> SrvCache<V> {
    pub fn new() -> Self {
        Self { entries: Vec::new(), stats: SrvCacheStats::default() }
    }

    pub fn stats(&self) -> SrvCacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the cached view for `key`, creating and caching one via
    /// `create` on a miss.
    pub fn get_or_create(&mut self, key: SurfaceKey, create: impl FnOnce() -> V) -> &V {
        if let Some(pos) = self.entries.iter().position(|(k, _)| *k == key) {
            self.stats.hits += 1;
            return &self.entries[pos].1;
        }
        self.stats.misses += 1;
        self.entries.push((key, create()));
        &self.entries.last().unwrap().1
    }

    /// Drops every cached view. Must happen before the decoder recycles its
    /// surface pool (seek, stop) — otherwise a later lookup can return a
    /// view bound to memory that the decoder has since overwritten.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<V> Default for SrvCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(handle: u64, slice: u32) -> SurfaceKey {
        SurfaceKey { surface_handle: handle, array_slice: slice }
    }

    #[test]
    fn second_lookup_of_same_key_is_a_hit() {
        let mut cache: SrvCache<u32> = SrvCache::new();
        let mut creates = 0;
        cache.get_or_create(key(1, 0), || {
            creates += 1;
            42
        });
        cache.get_or_create(key(1, 0), || {
            creates += 1;
            42
        });
        assert_eq!(creates, 1);
        assert_eq!(cache.stats(), SrvCacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn distinct_array_slices_are_distinct_entries() {
        let mut cache: SrvCache<u32> = SrvCache::new();
        cache.get_or_create(key(1, 0), || 1);
        cache.get_or_create(key(1, 1), || 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn clear_empties_the_pool() {
        let mut cache: SrvCache<u32> = SrvCache::new();
        cache.get_or_create(key(1, 0), || 1);
        cache.clear();
        assert!(cache.is_empty());
        // the next lookup for a previously-cached key is a fresh miss, not a
        // stale hit against a dropped view.
        let mut created_again = false;
        cache.get_or_create(key(1, 0), || {
            created_again = true;
            1
        });
        assert!(created_again);
    }

    #[test]
    fn steady_state_hit_rate_exceeds_99_percent() {
        let mut cache: SrvCache<u32> = SrvCache::new();
        let keys: Vec<SurfaceKey> = (0..16).map(|i| key(i, 0)).collect();
        for _ in 0..200 {
            for k in &keys {
                cache.get_or_create(*k, || 0);
            }
        }
        assert!(cache.stats().hit_rate() > 0.99);
    }
}
