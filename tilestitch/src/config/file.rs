//! Configuration file handling for ~/.tilestitch/config.ini.
//!
//! Loads user configuration with sensible defaults. Settings structs live
//! in [`super::settings`], constants in [`super::defaults`], parsing in
//! [`super::parser`].

use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use super::defaults::*;
pub use super::settings::*;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// A layer plan failed validation
    #[error("Invalid layer plan: {0}")]
    InvalidLayer(#[from] crate::layer::LayerPlanError),
}

impl ConfigFile {
    /// Load configuration from the default path (~/.tilestitch/config.ini).
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load() -> Result<Self, ConfigFileError> {
        let path = config_file_path();
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Save configuration to the default path, creating the config
    /// directory if needed.
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        super::parser::to_ini(self).write_to_file(path)
    }
}

/// Get the path to the config directory (~/.tilestitch).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tilestitch")
}

/// Get the path to the config file (~/.tilestitch/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default();

        assert!(config.source.base_url.is_none());
        assert_eq!(config.fetch.max_concurrent, DEFAULT_FETCH_CONCURRENT);
        assert_eq!(config.fetch.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.cache.memory_tiles, DEFAULT_MEMORY_CACHE_TILES);
        assert_eq!(config.staging.partitions, DEFAULT_STAGING_PARTITIONS);
        assert_eq!(config.repair.snap_tolerance, DEFAULT_SNAP_TOLERANCE);
        assert!(config.layers.is_empty());
    }

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.ini");

        let config = ConfigFile::load_from(&config_path).unwrap();
        let default = ConfigFile::default();

        assert_eq!(config.fetch.max_concurrent, default.fetch.max_concurrent);
        assert_eq!(
            config.fetch.request_timeout_secs,
            default.fetch.request_timeout_secs
        );
    }

    #[test]
    fn test_save_load_round_trip() {
        use crate::feature::GeometryClass;
        use crate::layer::{AggregateRule, LayerPlan};

        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.ini");

        let mut config = ConfigFile::default();
        config.source.base_url = Some("https://tiles.example.com/features".to_string());
        config.fetch.max_retries = 5;
        config.staging.partitions = 8;

        let mut plan = LayerPlan::new("parcels", GeometryClass::Polygon);
        plan.identifier_column = Some("parcel_id".to_string());
        plan.known_columns = vec!["parcel_id".to_string(), "area_sqm".to_string()];
        plan.integer_fields = vec!["parcel_id".to_string()];
        plan.aggregates
            .push(("area_sqm".to_string(), AggregateRule::Sum));
        plan.remap
            .entry("parcel_id".to_string())
            .or_default()
            .insert(99999999, 0);
        config.layers.push(plan);

        config.save_to(&config_path).unwrap();
        let loaded = ConfigFile::load_from(&config_path).unwrap();

        assert_eq!(loaded.source.base_url, config.source.base_url);
        assert_eq!(loaded.fetch.max_retries, 5);
        assert_eq!(loaded.staging.partitions, 8);
        assert_eq!(loaded.repair.snap_tolerance, DEFAULT_SNAP_TOLERANCE);
        assert_eq!(loaded.layers.len(), 1);

        let plan = &loaded.layers[0];
        assert_eq!(plan.name, "parcels");
        assert_eq!(plan.identifier_column.as_deref(), Some("parcel_id"));
        assert_eq!(plan.known_columns, vec!["parcel_id", "area_sqm"]);
        assert_eq!(plan.rule_for("area_sqm"), AggregateRule::Sum);
        assert_eq!(plan.remap_value("parcel_id", 99999999), Some(0));
    }

    #[test]
    fn test_save_default_omits_source_section() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.ini");

        ConfigFile::default().save_to(&config_path).unwrap();

        let text = std::fs::read_to_string(&config_path).unwrap();
        assert!(!text.contains("[source]"));
        assert!(text.contains("[fetch]"));

        let loaded = ConfigFile::load_from(&config_path).unwrap();
        assert!(loaded.source.base_url.is_none());
    }
}
