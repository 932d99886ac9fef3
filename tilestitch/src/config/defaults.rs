//! Default values and constants for all configuration settings.
//!
//! Contains all `DEFAULT_*` constants, clamp helpers, and the
//! `ConfigFile::default()` implementation.

use super::file::config_directory;
use super::settings::*;

// =============================================================================
// Fetch limits
// =============================================================================

/// Minimum concurrent tile requests.
pub const MIN_FETCH_CONCURRENT: usize = 1;

/// Maximum concurrent tile requests.
/// Feature tile servers throttle aggressively; anything beyond this trades
/// throughput for 429s.
pub const MAX_FETCH_CONCURRENT: usize = 64;

/// Default concurrent tile requests.
pub const DEFAULT_FETCH_CONCURRENT: usize = 8;

/// Default per-attempt request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default maximum retry attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default retry backoff base delay in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;

/// Default politeness pause before each network attempt, in milliseconds.
pub const DEFAULT_POLITENESS_DELAY_MS: u64 = 50;

// =============================================================================
// Cache defaults
// =============================================================================

/// Default memory cache capacity in tiles.
pub const DEFAULT_MEMORY_CACHE_TILES: u64 = 512;

// =============================================================================
// Staging defaults
// =============================================================================

/// Default number of hash partitions per staging area.
pub const DEFAULT_STAGING_PARTITIONS: u32 = 16;

// =============================================================================
// Repair defaults
// =============================================================================

/// Default vertex snap tolerance in degrees.
/// Roughly a hundredth of one tile-local integer unit at zoom 15, so only
/// float noise collapses.
pub const DEFAULT_SNAP_TOLERANCE: f64 = 1e-7;

/// Clamps fetch concurrency to valid range and logs a warning if clamped.
pub(super) fn clamp_fetch_concurrent(value: usize) -> usize {
    if value < MIN_FETCH_CONCURRENT {
        tracing::warn!(
            requested = value,
            min = MIN_FETCH_CONCURRENT,
            max = MAX_FETCH_CONCURRENT,
            "max_concurrent below minimum, clamping to {}",
            MIN_FETCH_CONCURRENT
        );
        MIN_FETCH_CONCURRENT
    } else if value > MAX_FETCH_CONCURRENT {
        tracing::warn!(
            requested = value,
            min = MIN_FETCH_CONCURRENT,
            max = MAX_FETCH_CONCURRENT,
            "max_concurrent above maximum, clamping to {} (prevents server rate limiting)",
            MAX_FETCH_CONCURRENT
        );
        MAX_FETCH_CONCURRENT
    } else {
        value
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            source: SourceSettings::default(),
            fetch: FetchSettings::default(),
            cache: CacheSettings::default(),
            quarantine: QuarantineSettings::default(),
            staging: StagingSettings::default(),
            repair: RepairSettings::default(),
            output: OutputSettings::default(),
            logging: LoggingSettings::default(),
            layers: Vec::new(),
        }
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self { base_url: None }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_FETCH_CONCURRENT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            politeness_delay_ms: DEFAULT_POLITENESS_DELAY_MS,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: config_directory().join("cache"),
            memory_tiles: DEFAULT_MEMORY_CACHE_TILES,
        }
    }
}

impl Default for QuarantineSettings {
    fn default() -> Self {
        Self {
            directory: config_directory().join("quarantine"),
        }
    }
}

impl Default for StagingSettings {
    fn default() -> Self {
        Self {
            directory: config_directory().join("staging"),
            partitions: DEFAULT_STAGING_PARTITIONS,
        }
    }
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self {
            snap_tolerance: DEFAULT_SNAP_TOLERANCE,
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: config_directory().join("output"),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: config_directory().join("logs"),
        }
    }
}
