//! Persistent disk tier.
//!
//! Tiles live under the cache root as `<zoom>/<x>/<y>.pbf`, mirroring the
//! source URL layout so a cached tree is recognisable at a glance. Writes
//! go to a temporary file first and are renamed into place, so a crash
//! mid-write can never leave a truncated tile for the next run to trust.

use crate::cache::{BoxFuture, CacheError, TierStats, TileCache};
use crate::coord::TileCoord;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, trace};

const TILE_EXTENSION: &str = "pbf";

/// Disk-backed tile cache rooted at a directory.
pub struct DiskTileCache {
    root: PathBuf,
}

impl DiskTileCache {
    /// Opens (and creates if missing) a cache rooted at `root`.
    pub fn new(root: PathBuf) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Path for one tile inside the cache tree.
    fn tile_path(&self, coord: TileCoord) -> PathBuf {
        self.root
            .join(coord.zoom.to_string())
            .join(coord.x.to_string())
            .join(format!("{}.{}", coord.y, TILE_EXTENSION))
    }

    /// Walks the cache tree and totals entry count and bytes.
    ///
    /// Synchronous on purpose: only the stats CLI command calls this, once.
    pub fn stats(&self) -> Result<TierStats, CacheError> {
        let mut stats = TierStats::default();
        scan_directory(&self.root, &mut stats)?;
        Ok(stats)
    }

    /// Deletes every cached tile and the zoom subdirectories.
    pub fn clear(&self) -> Result<u64, CacheError> {
        let before = self.stats()?.entries;
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            }
        }
        debug!(entries = before, root = %self.root.display(), "disk cache cleared");
        Ok(before)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn scan_directory(dir: &Path, stats: &mut TierStats) -> Result<(), CacheError> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            scan_directory(&path, stats)?;
        } else if path.extension().and_then(|s| s.to_str()) == Some(TILE_EXTENSION) {
            if let Ok(metadata) = std::fs::metadata(&path) {
                stats.entries += 1;
                stats.bytes += metadata.len();
            }
        }
    }
    Ok(())
}

impl TileCache for DiskTileCache {
    fn get(&self, coord: TileCoord) -> BoxFuture<'_, Result<Option<Bytes>, CacheError>> {
        let path = self.tile_path(coord);
        Box::pin(async move {
            match tokio::fs::read(&path).await {
                Ok(data) => {
                    trace!(tile = %coord, bytes = data.len(), "disk cache hit");
                    Ok(Some(Bytes::from(data)))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(CacheError::Io(e)),
            }
        })
    }

    fn put(&self, coord: TileCoord, bytes: Bytes) -> BoxFuture<'_, Result<(), CacheError>> {
        let path = self.tile_path(coord);
        Box::pin(async move {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            // Unique temp name keeps concurrent writers of the same tile
            // from clobbering each other's partial files.
            let tmp = path.with_extension(format!("{}.tmp{}", TILE_EXTENSION, process::id()));
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, &path).await?;

            trace!(tile = %coord, bytes = bytes.len(), "disk cache write");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_temp_cache() -> (DiskTileCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskTileCache::new(temp_dir.path().to_path_buf()).unwrap();
        (cache, temp_dir)
    }

    #[tokio::test]
    async fn test_disk_cache_put_and_get() {
        let (cache, _temp) = create_temp_cache();
        let coord = TileCoord::new(15, 17000, 11000);
        let data = Bytes::from_static(&[1, 2, 3, 4, 5]);

        cache.put(coord, data.clone()).await.unwrap();
        assert_eq!(cache.get(coord).await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn test_disk_cache_miss() {
        let (cache, _temp) = create_temp_cache();
        let coord = TileCoord::new(15, 17000, 11000);

        assert_eq!(cache.get(coord).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disk_cache_layout_matches_url_shape() {
        let (cache, temp) = create_temp_cache();
        let coord = TileCoord::new(15, 17000, 11000);

        cache.put(coord, Bytes::from_static(b"x")).await.unwrap();

        let expected = temp.path().join("15").join("17000").join("11000.pbf");
        assert!(expected.is_file());
    }

    #[tokio::test]
    async fn test_disk_cache_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let coord = TileCoord::new(12, 100, 200);

        {
            let cache = DiskTileCache::new(temp_dir.path().to_path_buf()).unwrap();
            cache.put(coord, Bytes::from_static(b"hello")).await.unwrap();
        }

        let cache = DiskTileCache::new(temp_dir.path().to_path_buf()).unwrap();
        assert_eq!(
            cache.get(coord).await.unwrap(),
            Some(Bytes::from_static(b"hello"))
        );
    }

    #[tokio::test]
    async fn test_disk_cache_replaces_existing_entry() {
        let (cache, _temp) = create_temp_cache();
        let coord = TileCoord::new(5, 1, 2);

        cache.put(coord, Bytes::from_static(b"old")).await.unwrap();
        cache.put(coord, Bytes::from_static(b"new")).await.unwrap();

        assert_eq!(
            cache.get(coord).await.unwrap(),
            Some(Bytes::from_static(b"new"))
        );
    }

    #[tokio::test]
    async fn test_disk_cache_no_temp_files_left_behind() {
        let (cache, temp) = create_temp_cache();
        let coord = TileCoord::new(5, 1, 2);

        cache.put(coord, Bytes::from_static(b"data")).await.unwrap();

        let mut stats = TierStats::default();
        scan_directory(temp.path(), &mut stats).unwrap();
        assert_eq!(stats.entries, 1);

        let dir = temp.path().join("5").join("1");
        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["2.pbf".to_string()]);
    }

    #[tokio::test]
    async fn test_disk_cache_stats() {
        let (cache, _temp) = create_temp_cache();

        cache
            .put(TileCoord::new(5, 1, 1), Bytes::from(vec![0u8; 100]))
            .await
            .unwrap();
        cache
            .put(TileCoord::new(5, 1, 2), Bytes::from(vec![0u8; 200]))
            .await
            .unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.bytes, 300);
    }

    #[tokio::test]
    async fn test_disk_cache_clear() {
        let (cache, _temp) = create_temp_cache();
        let coord = TileCoord::new(5, 1, 1);

        cache.put(coord, Bytes::from_static(b"abc")).await.unwrap();
        let removed = cache.clear().unwrap();

        assert_eq!(removed, 1);
        assert_eq!(cache.stats().unwrap().entries, 0);
        assert_eq!(cache.get(coord).await.unwrap(), None);
    }
}
