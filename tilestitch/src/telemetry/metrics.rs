//! Lock-free atomic metrics collection.
//!
//! Uses `AtomicU64` with `Relaxed` ordering throughout. The counters are
//! independent measurements, so no ordering between them is needed.

use super::TelemetrySnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Lock-free counters for one ingest run.
pub struct IngestMetrics {
    /// When metrics collection started
    start_time: Instant,

    // === Fetch metrics ===
    /// Tiles downloaded from the network
    tiles_fetched: AtomicU64,
    /// Tiles answered from the cache
    tiles_from_cache: AtomicU64,
    /// Tiles the source confirmed absent (404)
    tiles_absent: AtomicU64,
    /// Tiles that failed after all retries
    tiles_failed: AtomicU64,
    /// Re-attempts after a failed network try
    fetch_retries: AtomicU64,
    /// Total bytes downloaded
    bytes_downloaded: AtomicU64,

    // === Decode metrics ===
    /// Tiles decoded successfully
    tiles_decoded: AtomicU64,
    /// Tiles quarantined as malformed
    tiles_quarantined: AtomicU64,
    /// Feature records decoded across all tiles
    features_decoded: AtomicU64,
    /// Identifier values nulled because they were not clean integers
    properties_nulled: AtomicU64,

    // === Repair metrics ===
    /// Geometries modified by validation repair
    features_repaired: AtomicU64,
    /// Features dropped because repair left them empty
    features_dropped: AtomicU64,

    // === Stitch metrics ===
    /// Records written to staging
    records_staged: AtomicU64,
    /// Records dropped from point layers for not being points
    non_point_records_dropped: AtomicU64,
    /// Stitch groups produced across all layers
    groups_stitched: AtomicU64,

    // === Layer metrics ===
    /// Layers that produced output
    layers_completed: AtomicU64,
    /// Layers abandoned before producing output
    layers_failed: AtomicU64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            tiles_fetched: AtomicU64::new(0),
            tiles_from_cache: AtomicU64::new(0),
            tiles_absent: AtomicU64::new(0),
            tiles_failed: AtomicU64::new(0),
            fetch_retries: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            tiles_decoded: AtomicU64::new(0),
            tiles_quarantined: AtomicU64::new(0),
            features_decoded: AtomicU64::new(0),
            properties_nulled: AtomicU64::new(0),
            features_repaired: AtomicU64::new(0),
            features_dropped: AtomicU64::new(0),
            records_staged: AtomicU64::new(0),
            non_point_records_dropped: AtomicU64::new(0),
            groups_stitched: AtomicU64::new(0),
            layers_completed: AtomicU64::new(0),
            layers_failed: AtomicU64::new(0),
        }
    }

    // === Fetch tracking ===

    /// Record a successful network download.
    pub fn tile_fetched(&self, bytes: u64) {
        self.tiles_fetched.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a tile served from the cache.
    pub fn tile_from_cache(&self) {
        self.tiles_from_cache.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tile the source does not have.
    pub fn tile_absent(&self) {
        self.tiles_absent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tile that failed after exhausting retries.
    pub fn tile_failed(&self) {
        self.tiles_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one retry attempt.
    pub fn fetch_retried(&self) {
        self.fetch_retries.fetch_add(1, Ordering::Relaxed);
    }

    // === Decode tracking ===

    /// Record one successful decode pass: one tile, one layer.
    pub fn tile_decoded(&self, features: u64) {
        self.tiles_decoded.fetch_add(1, Ordering::Relaxed);
        self.features_decoded.fetch_add(features, Ordering::Relaxed);
    }

    /// Record a tile set aside as malformed.
    pub fn tile_quarantined(&self) {
        self.tiles_quarantined.fetch_add(1, Ordering::Relaxed);
    }

    /// Record identifier values that had to be nulled.
    pub fn properties_nulled(&self, count: u64) {
        self.properties_nulled.fetch_add(count, Ordering::Relaxed);
    }

    // === Repair tracking ===

    /// Record geometries changed by repair.
    pub fn features_repaired(&self, count: u64) {
        self.features_repaired.fetch_add(count, Ordering::Relaxed);
    }

    /// Record features dropped because nothing usable survived repair.
    pub fn features_dropped(&self, count: u64) {
        self.features_dropped.fetch_add(count, Ordering::Relaxed);
    }

    // === Stitch tracking ===

    /// Record records written to staging.
    pub fn records_staged(&self, count: u64) {
        self.records_staged.fetch_add(count, Ordering::Relaxed);
    }

    /// Record non-point records dropped from a point layer.
    pub fn non_point_records_dropped(&self, count: u64) {
        self.non_point_records_dropped
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Record stitch groups produced for a layer.
    pub fn groups_stitched(&self, count: u64) {
        self.groups_stitched.fetch_add(count, Ordering::Relaxed);
    }

    // === Layer tracking ===

    /// Record a layer that ran to completion.
    pub fn layer_completed(&self) {
        self.layers_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a layer abandoned before producing output.
    pub fn layer_failed(&self) {
        self.layers_failed.fetch_add(1, Ordering::Relaxed);
    }

    // === Snapshot ===

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let uptime = self.start_time.elapsed();
        let uptime_secs = uptime.as_secs_f64().max(0.001);

        let tiles_fetched = self.tiles_fetched.load(Ordering::Relaxed);
        let tiles_from_cache = self.tiles_from_cache.load(Ordering::Relaxed);
        let tiles_absent = self.tiles_absent.load(Ordering::Relaxed);
        let tiles_failed = self.tiles_failed.load(Ordering::Relaxed);
        let bytes_downloaded = self.bytes_downloaded.load(Ordering::Relaxed);

        let lookups = tiles_fetched + tiles_from_cache + tiles_absent + tiles_failed;

        TelemetrySnapshot {
            uptime,
            tiles_fetched,
            tiles_from_cache,
            tiles_absent,
            tiles_failed,
            fetch_retries: self.fetch_retries.load(Ordering::Relaxed),
            bytes_downloaded,
            cache_hit_rate: if lookups > 0 {
                tiles_from_cache as f64 / lookups as f64
            } else {
                0.0
            },
            tiles_decoded: self.tiles_decoded.load(Ordering::Relaxed),
            tiles_quarantined: self.tiles_quarantined.load(Ordering::Relaxed),
            features_decoded: self.features_decoded.load(Ordering::Relaxed),
            properties_nulled: self.properties_nulled.load(Ordering::Relaxed),
            features_repaired: self.features_repaired.load(Ordering::Relaxed),
            features_dropped: self.features_dropped.load(Ordering::Relaxed),
            records_staged: self.records_staged.load(Ordering::Relaxed),
            non_point_records_dropped: self.non_point_records_dropped.load(Ordering::Relaxed),
            groups_stitched: self.groups_stitched.load(Ordering::Relaxed),
            layers_completed: self.layers_completed.load(Ordering::Relaxed),
            layers_failed: self.layers_failed.load(Ordering::Relaxed),
            tiles_per_second: (tiles_fetched + tiles_from_cache) as f64 / uptime_secs,
            bytes_per_second: bytes_downloaded as f64 / uptime_secs,
        }
    }
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}
