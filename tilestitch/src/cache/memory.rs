//! In-memory tier backed by moka.
//!
//! Moka gives lock-free reads and automatic LRU eviction, which is exactly
//! the shape of this tier: many concurrent lookups from fetch tasks, a
//! bounded number of recently-seen tiles kept hot.

use crate::cache::{BoxFuture, CacheError, TierStats, TileCache};
use crate::coord::TileCoord;
use bytes::Bytes;
use moka::future::Cache as MokaCache;

/// Bounded in-memory tile cache.
///
/// Capacity is counted in tiles, not bytes. Vector tiles at one zoom are
/// roughly uniform in size, so an entry count is the honest knob.
pub struct MemoryTileCache {
    cache: MokaCache<TileCoord, Bytes>,
}

impl MemoryTileCache {
    /// Creates a cache holding at most `max_tiles` entries.
    pub fn new(max_tiles: u64) -> Self {
        Self {
            cache: MokaCache::builder().max_capacity(max_tiles).build(),
        }
    }

    pub fn stats(&self) -> TierStats {
        TierStats {
            entries: self.cache.entry_count(),
            bytes: self.cache.iter().map(|(_, v)| v.len() as u64).sum(),
        }
    }

    /// Runs pending moka maintenance. Tests call this to settle eviction
    /// before asserting on counts.
    #[cfg(test)]
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl TileCache for MemoryTileCache {
    fn get(&self, coord: TileCoord) -> BoxFuture<'_, Result<Option<Bytes>, CacheError>> {
        Box::pin(async move { Ok(self.cache.get(&coord).await) })
    }

    fn put(&self, coord: TileCoord, bytes: Bytes) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            self.cache.insert(coord, bytes).await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_put_and_get() {
        let cache = MemoryTileCache::new(16);
        let coord = TileCoord::new(15, 1, 2);

        cache.put(coord, Bytes::from_static(b"tile")).await.unwrap();
        assert_eq!(
            cache.get(coord).await.unwrap(),
            Some(Bytes::from_static(b"tile"))
        );
    }

    #[tokio::test]
    async fn test_memory_cache_miss() {
        let cache = MemoryTileCache::new(16);
        assert!(cache.get(TileCoord::new(1, 0, 0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_cache_replace() {
        let cache = MemoryTileCache::new(16);
        let coord = TileCoord::new(15, 1, 2);

        cache.put(coord, Bytes::from_static(b"old")).await.unwrap();
        cache.put(coord, Bytes::from_static(b"new")).await.unwrap();
        cache.sync().await;

        assert_eq!(
            cache.get(coord).await.unwrap(),
            Some(Bytes::from_static(b"new"))
        );
        assert_eq!(cache.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_memory_cache_evicts_at_capacity() {
        let cache = MemoryTileCache::new(4);

        for x in 0..32 {
            cache
                .put(TileCoord::new(10, x, 0), Bytes::from_static(b"t"))
                .await
                .unwrap();
        }
        cache.sync().await;

        assert!(cache.stats().entries <= 4);
    }
}
