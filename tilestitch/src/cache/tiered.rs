//! Write-through composition of the memory and disk tiers.

use crate::cache::{BoxFuture, CacheError, DiskTileCache, MemoryTileCache, TierStats, TileCache};
use crate::coord::TileCoord;
use bytes::Bytes;
use std::path::PathBuf;

/// Memory-over-disk tile cache.
///
/// Lookups try memory first, then disk; a disk hit is promoted into the
/// memory tier. Writes land in both tiers so the next run starts warm.
pub struct TieredTileCache {
    memory: MemoryTileCache,
    disk: DiskTileCache,
}

impl TieredTileCache {
    pub fn new(root: PathBuf, memory_tiles: u64) -> Result<Self, CacheError> {
        Ok(Self {
            memory: MemoryTileCache::new(memory_tiles),
            disk: DiskTileCache::new(root)?,
        })
    }

    /// Stats for both tiers, memory first.
    pub fn stats(&self) -> Result<(TierStats, TierStats), CacheError> {
        Ok((self.memory.stats(), self.disk.stats()?))
    }

    pub fn disk(&self) -> &DiskTileCache {
        &self.disk
    }
}

impl TileCache for TieredTileCache {
    fn get(&self, coord: TileCoord) -> BoxFuture<'_, Result<Option<Bytes>, CacheError>> {
        Box::pin(async move {
            if let Some(bytes) = self.memory.get(coord).await? {
                return Ok(Some(bytes));
            }
            match self.disk.get(coord).await? {
                Some(bytes) => {
                    self.memory.put(coord, bytes.clone()).await?;
                    Ok(Some(bytes))
                }
                None => Ok(None),
            }
        })
    }

    fn put(&self, coord: TileCoord, bytes: Bytes) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            self.memory.put(coord, bytes.clone()).await?;
            self.disk.put(coord, bytes).await
        })
    }
}
