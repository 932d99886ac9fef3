//! Cache-first tile acquisition.
//!
//! The fetcher turns a planned list of tile coordinates into raw tile
//! bytes. For each coordinate it consults the cache first; only on a miss
//! does it go to the network, under a concurrency cap, with a politeness
//! pause before every attempt and exponential backoff between retries.
//!
//! A 404 from the source is a confirmed absence, not an error: the tile
//! simply does not exist at that coordinate and is never retried. Tiles
//! that still fail after all retries are logged and skipped; the rest of
//! the run continues without them.

mod limiter;
mod transport;

pub use limiter::{FetchLimiter, FetchPermit};
pub use transport::{ReqwestTransport, TileResponse, TileTransport, TransportError};

use crate::cache::TileCache;
use crate::config::FetchSettings;
use crate::coord::TileCoord;
use crate::telemetry::IngestMetrics;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Terminal fetch failure for one tile.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("tile {coord} failed after {attempts} attempts: {last_error}")]
    Network {
        coord: TileCoord,
        attempts: u32,
        last_error: String,
    },
}

/// Downloads tiles through a cache, a concurrency limiter, and a retry
/// loop.
///
/// Cheap to clone; all shared state is behind `Arc`.
pub struct TileFetcher<T: TileTransport> {
    transport: Arc<T>,
    cache: Arc<dyn TileCache>,
    limiter: Arc<FetchLimiter>,
    metrics: Arc<IngestMetrics>,
    base_url: String,
    settings: FetchSettings,
}

impl<T: TileTransport> Clone for TileFetcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            cache: Arc::clone(&self.cache),
            limiter: Arc::clone(&self.limiter),
            metrics: Arc::clone(&self.metrics),
            base_url: self.base_url.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<T: TileTransport + 'static> TileFetcher<T> {
    pub fn new(
        transport: Arc<T>,
        cache: Arc<dyn TileCache>,
        metrics: Arc<IngestMetrics>,
        base_url: impl Into<String>,
        settings: FetchSettings,
    ) -> Self {
        let limiter = Arc::new(FetchLimiter::new(settings.max_concurrent));
        Self {
            transport,
            cache,
            limiter,
            metrics,
            base_url: base_url.into(),
            settings,
        }
    }

    /// URL for one tile under the configured source.
    pub fn tile_url(&self, coord: TileCoord) -> String {
        format!(
            "{}/{}/{}/{}.vector.pbf",
            self.base_url, coord.zoom, coord.x, coord.y
        )
    }

    /// Fetches one tile, cache first.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` for a tile payload, from cache or network
    /// - `Ok(None)` when the source confirms the tile absent (404)
    /// - `Err(_)` when every attempt failed
    pub async fn fetch(&self, coord: TileCoord) -> Result<Option<Bytes>, FetchError> {
        // Cache hits skip the limiter, the politeness pause, and the
        // retry loop entirely.
        match self.cache.get(coord).await {
            Ok(Some(bytes)) => {
                trace!(tile = %coord, bytes = bytes.len(), "cache hit");
                self.metrics.tile_from_cache();
                return Ok(Some(bytes));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(tile = %coord, error = %e, "cache read failed, fetching from network");
            }
        }

        let url = self.tile_url(coord);
        let timeout = Duration::from_secs(self.settings.request_timeout_secs);
        let total_attempts = self.settings.max_retries + 1;

        let mut last_error = String::new();
        for attempt in 1..=total_attempts {
            // Acquire inside the retry loop: cache hits never consume
            // permits, and backoff delays don't hold one.
            let permit = self.limiter.acquire().await;

            // Politeness pause while holding the permit, so concurrent
            // tasks cannot collapse their pauses into one burst.
            if self.settings.politeness_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.settings.politeness_delay_ms)).await;
            }

            match tokio::time::timeout(timeout, self.transport.get(&url)).await {
                Ok(Ok(response)) => {
                    drop(permit);
                    match response.status {
                        status if (200..300).contains(&status) && !response.body.is_empty() => {
                            self.metrics.tile_fetched(response.body.len() as u64);
                            self.write_through(coord, response.body.clone()).await;
                            return Ok(Some(response.body));
                        }
                        404 => {
                            debug!(tile = %coord, "source reports tile absent");
                            self.metrics.tile_absent();
                            return Ok(None);
                        }
                        status if (200..300).contains(&status) => {
                            // A 2xx with no body carries no features.
                            debug!(tile = %coord, status = status, "empty payload, treating as absent");
                            self.metrics.tile_absent();
                            return Ok(None);
                        }
                        status => {
                            last_error = format!("status {}", status);
                            warn!(
                                tile = %coord,
                                status = status,
                                attempt = attempt,
                                "tile request rejected"
                            );
                        }
                    }
                }
                Ok(Err(e)) => {
                    drop(permit);
                    last_error = e.message.clone();
                    warn!(tile = %coord, error = %e, attempt = attempt, "tile request failed");
                }
                Err(_) => {
                    drop(permit);
                    last_error = format!("timed out after {}s", self.settings.request_timeout_secs);
                    warn!(
                        tile = %coord,
                        timeout_secs = self.settings.request_timeout_secs,
                        attempt = attempt,
                        "tile request timed out"
                    );
                }
            }

            if attempt < total_attempts {
                self.metrics.fetch_retried();
                let backoff =
                    Duration::from_millis(self.settings.retry_base_delay_ms << (attempt - 1));
                tokio::time::sleep(backoff).await;
            }
        }

        self.metrics.tile_failed();
        Err(FetchError::Network {
            coord,
            attempts: total_attempts,
            last_error,
        })
    }

    /// Fetches a batch of tiles concurrently.
    ///
    /// Returns the successful subset only. Absent tiles and tiles that
    /// exhausted their retries are counted and logged, never fatal.
    pub async fn fetch_many(
        &self,
        coords: Vec<TileCoord>,
        cancel: &CancellationToken,
    ) -> HashMap<TileCoord, Bytes> {
        let mut join_set = JoinSet::new();
        for coord in coords {
            let fetcher = self.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => (coord, None),
                    result = fetcher.fetch(coord) => match result {
                        Ok(bytes) => (coord, bytes.map(Ok)),
                        Err(e) => (coord, Some(Err(e))),
                    },
                }
            });
        }

        let mut tiles = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((coord, Some(Ok(bytes)))) => {
                    tiles.insert(coord, bytes);
                }
                Ok((coord, Some(Err(e)))) => {
                    warn!(tile = %coord, error = %e, "tile dropped from run");
                }
                Ok((_, None)) => {}
                Err(e) => {
                    warn!(error = %e, "fetch task panicked");
                }
            }
        }
        tiles
    }

    /// Write-through to the cache. Failures degrade to a warning; the
    /// bytes are already in hand.
    async fn write_through(&self, coord: TileCoord, bytes: Bytes) {
        if let Err(e) = self.cache.put(coord, bytes).await {
            warn!(tile = %coord, error = %e, "cache write failed");
        }
    }

    /// Peak concurrent requests observed, for the end-of-run report.
    pub fn peak_in_flight(&self) -> usize {
        self.limiter.peak_in_flight()
    }
}
