//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use crate::layer::LayerPlan;
use std::path::PathBuf;

/// Complete ingestion configuration loaded from config.ini.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// Tile source settings
    pub source: SourceSettings,
    /// Fetch concurrency and retry settings
    pub fetch: FetchSettings,
    /// Tile cache settings
    pub cache: CacheSettings,
    /// Quarantine settings for malformed tiles
    pub quarantine: QuarantineSettings,
    /// Staging settings for the stitch spill store
    pub staging: StagingSettings,
    /// Geometry repair settings
    pub repair: RepairSettings,
    /// Output settings for stitched results
    pub output: OutputSettings,
    /// Logging settings
    pub logging: LoggingSettings,
    /// Per-layer ingestion plans, one per `[layer:<name>]` section
    pub layers: Vec<LayerPlan>,
}

/// Tile source configuration.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Base URL of the tile server; tiles resolve to
    /// `{base_url}/{z}/{x}/{y}.vector.pbf`
    pub base_url: Option<String>,
}

/// Fetch configuration for concurrency and retry behavior.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Maximum concurrent tile requests.
    /// Default: 8. Hard limits: 1-64 (values outside are clamped); feature
    /// tile servers rate-limit far sooner than imagery CDNs.
    pub max_concurrent: usize,
    /// Per-attempt HTTP timeout in seconds. Default: 10.
    pub request_timeout_secs: u64,
    /// Maximum retry attempts per tile after the first try. Default: 3.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff between retries.
    /// Actual delay = base_delay * 2^attempt. Default: 100.
    pub retry_base_delay_ms: u64,
    /// Fixed pause in milliseconds before each network attempt. Default: 50.
    pub politeness_delay_ms: u64,
}

/// Tile cache configuration.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Disk cache directory; tiles land at `{directory}/{z}/{x}/{y}.pbf`
    pub directory: PathBuf,
    /// Maximum number of tiles held in the memory tier
    pub memory_tiles: u64,
}

/// Quarantine configuration.
#[derive(Debug, Clone)]
pub struct QuarantineSettings {
    /// Directory receiving malformed tile payloads and reason files
    pub directory: PathBuf,
}

/// Staging configuration for the stitch spill store.
#[derive(Debug, Clone)]
pub struct StagingSettings {
    /// Directory holding per-layer staging areas during a run
    pub directory: PathBuf,
    /// Number of hash partitions per staging area.
    /// Bounds stitch memory: one partition is dissolved at a time.
    pub partitions: u32,
}

/// Geometry repair configuration.
#[derive(Debug, Clone)]
pub struct RepairSettings {
    /// Vertex snap tolerance in degrees. Source-specific; the default only
    /// collapses float noise, never real vertices.
    pub snap_tolerance: f64,
}

/// Output configuration.
#[derive(Debug, Clone)]
pub struct OutputSettings {
    /// Directory receiving stitched layer files
    pub directory: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    /// Directory receiving run log files
    pub directory: PathBuf,
}
