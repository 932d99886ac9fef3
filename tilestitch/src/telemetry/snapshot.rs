//! Point-in-time telemetry snapshot.
//!
//! Provides an immutable view of metrics for display and reporting.

use std::time::Duration;

/// A point-in-time snapshot of ingest metrics.
///
/// This is an immutable copy of all counters, safe to use for display
/// without touching the live pipeline. Rates are pre-computed from the
/// uptime at snapshot time.
#[derive(Clone, Debug)]
pub struct TelemetrySnapshot {
    /// How long the run has been going
    pub uptime: Duration,

    // === Fetch metrics ===
    /// Tiles downloaded from the network
    pub tiles_fetched: u64,
    /// Tiles answered from the cache
    pub tiles_from_cache: u64,
    /// Tiles the source confirmed absent
    pub tiles_absent: u64,
    /// Tiles that failed after retries
    pub tiles_failed: u64,
    /// Total retry attempts
    pub fetch_retries: u64,
    /// Total bytes downloaded
    pub bytes_downloaded: u64,
    /// Cache hit rate (0.0 - 1.0) over all tile lookups
    pub cache_hit_rate: f64,

    // === Decode metrics ===
    /// Tiles decoded successfully
    pub tiles_decoded: u64,
    /// Tiles quarantined as malformed
    pub tiles_quarantined: u64,
    /// Feature records decoded
    pub features_decoded: u64,
    /// Identifier values nulled during normalization
    pub properties_nulled: u64,

    // === Repair metrics ===
    /// Geometries changed by repair
    pub features_repaired: u64,
    /// Features dropped as empty after repair
    pub features_dropped: u64,

    // === Stitch metrics ===
    /// Records written to staging
    pub records_staged: u64,
    /// Non-point records dropped from point layers
    pub non_point_records_dropped: u64,
    /// Stitch groups produced
    pub groups_stitched: u64,

    // === Layer metrics ===
    /// Layers that produced output
    pub layers_completed: u64,
    /// Layers abandoned before producing output
    pub layers_failed: u64,

    // === Computed rates ===
    /// Tiles obtained per second (network plus cache)
    pub tiles_per_second: f64,
    /// Download throughput in bytes per second
    pub bytes_per_second: f64,
}

impl TelemetrySnapshot {
    /// Total tiles the run obtained bytes for.
    pub fn tiles_obtained(&self) -> u64 {
        self.tiles_fetched + self.tiles_from_cache
    }

    /// Share of obtained tiles that turned out malformed (0.0 - 1.0).
    pub fn quarantine_rate(&self) -> f64 {
        let decoded_or_bad = self.tiles_decoded + self.tiles_quarantined;
        if decoded_or_bad == 0 {
            0.0
        } else {
            self.tiles_quarantined as f64 / decoded_or_bad as f64
        }
    }
}
