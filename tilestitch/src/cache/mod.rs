//! Two-tier tile cache.
//!
//! Raw tile bytes are cached so a re-run over the same area costs no
//! network traffic. The memory tier answers repeat lookups within a run,
//! the disk tier persists across runs. Writes go through both tiers.
//!
//! The `TileCache` trait uses `Pin<Box<dyn Future>>` for its async methods
//! so callers can hold an `Arc<dyn TileCache>` and swap implementations in
//! tests.

mod disk;
mod memory;
mod tiered;

pub use disk::DiskTileCache;
pub use memory::MemoryTileCache;
pub use tiered::TieredTileCache;

use crate::coord::TileCoord;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors from cache operations.
///
/// Cache failures never abort a run; callers log them and fall back to
/// the network.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counts and sizes for one cache tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    pub entries: u64,
    pub bytes: u64,
}

/// Format a byte count as a human-readable string.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Key-value interface for cached tile payloads.
///
/// Keys are tile coordinates; values are the raw bytes exactly as the
/// source served them. Implementations must be `Send + Sync` so the
/// fetcher can share them across concurrent requests.
pub trait TileCache: Send + Sync {
    /// Looks up the cached payload for a coordinate.
    ///
    /// Returns `Ok(None)` on a miss.
    fn get(&self, coord: TileCoord) -> BoxFuture<'_, Result<Option<Bytes>, CacheError>>;

    /// Stores a payload for a coordinate, replacing any previous entry.
    fn put(&self, coord: TileCoord, bytes: Bytes) -> BoxFuture<'_, Result<(), CacheError>>;
}

/// Cache that stores nothing. Every lookup is a miss.
///
/// Used when caching is disabled and in tests that must observe every
/// network attempt.
#[derive(Debug, Default)]
pub struct NoopTileCache;

impl TileCache for NoopTileCache {
    fn get(&self, _coord: TileCoord) -> BoxFuture<'_, Result<Option<Bytes>, CacheError>> {
        Box::pin(async { Ok(None) })
    }

    fn put(&self, _coord: TileCoord, _bytes: Bytes) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async { Ok(()) })
    }
}
