//! Run telemetry for observability and the end-of-run report.
//!
//! Every stage of an ingest run records what it did through lock-free
//! atomic counters. The counters are cheap enough to update from hot
//! paths; views take an immutable point-in-time snapshot when they need
//! numbers.
//!
//! # Architecture
//!
//! ```text
//! Ingest Stages ─────► IngestMetrics ─────► TelemetrySnapshot ─────► Views
//!                      (atomic counters)    (point-in-time copy)     (report, CLI)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tilestitch::telemetry::IngestMetrics;
//! use std::sync::Arc;
//!
//! let metrics = Arc::new(IngestMetrics::new());
//!
//! metrics.tile_fetched(48_000);
//! metrics.tile_from_cache();
//!
//! let snapshot = metrics.snapshot();
//! println!("tiles: {}", snapshot.tiles_fetched + snapshot.tiles_from_cache);
//! println!("cache hit rate: {:.1}%", snapshot.cache_hit_rate * 100.0);
//! ```

mod metrics;
mod snapshot;

pub use metrics::IngestMetrics;
pub use snapshot::TelemetrySnapshot;
