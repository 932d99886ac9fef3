//! Configuration loading for tilestitch components.
//!
//! Configuration lives in one INI file (~/.tilestitch/config.ini by
//! default): global sections for the tile source, fetch behavior, cache,
//! quarantine, staging, repair and output, plus one `[layer:<name>]`
//! section per ingested layer. Components receive the parsed settings
//! structs explicitly in their constructors; nothing reads configuration
//! ambiently.

mod defaults;
mod file;
mod parser;
mod settings;

pub use defaults::{
    DEFAULT_FETCH_CONCURRENT, DEFAULT_MAX_RETRIES, DEFAULT_MEMORY_CACHE_TILES,
    DEFAULT_POLITENESS_DELAY_MS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_RETRY_BASE_DELAY_MS,
    DEFAULT_SNAP_TOLERANCE, DEFAULT_STAGING_PARTITIONS, MAX_FETCH_CONCURRENT,
    MIN_FETCH_CONCURRENT,
};
pub use file::{config_directory, config_file_path, ConfigFile, ConfigFileError};
pub use settings::{
    CacheSettings, FetchSettings, LoggingSettings, OutputSettings, QuarantineSettings,
    RepairSettings, SourceSettings, StagingSettings,
};
