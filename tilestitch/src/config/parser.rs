//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This module contains the `parse_ini()` function and its helpers.
//! It is the single place where INI key names are mapped to struct fields.

use ini::Ini;
use std::collections::HashMap;
use std::path::PathBuf;

use super::defaults::clamp_fetch_concurrent;
use super::file::ConfigFileError;
use super::settings::ConfigFile;
use crate::feature::GeometryClass;
use crate::layer::{AggregateRule, LayerPlan};

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the
/// INI. Layer sections (`[layer:<name>]`) are parsed into [`LayerPlan`]s and
/// validated immediately so unsafe names fail here, before any I/O.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [source] section
    if let Some(section) = ini.section(Some("source")) {
        if let Some(v) = section.get("base_url") {
            let v = v.trim().trim_end_matches('/');
            if !v.is_empty() {
                config.source.base_url = Some(v.to_string());
            }
        }
    }

    // [fetch] section
    if let Some(section) = ini.section(Some("fetch")) {
        if let Some(v) = section.get("max_concurrent") {
            let parsed: usize = v.parse().map_err(|_| ConfigFileError::InvalidValue {
                section: "fetch".to_string(),
                key: "max_concurrent".to_string(),
                value: v.to_string(),
                reason: "must be a positive integer".to_string(),
            })?;
            config.fetch.max_concurrent = clamp_fetch_concurrent(parsed);
        }
        if let Some(v) = section.get("request_timeout_secs") {
            config.fetch.request_timeout_secs =
                v.parse().map_err(|_| ConfigFileError::InvalidValue {
                    section: "fetch".to_string(),
                    key: "request_timeout_secs".to_string(),
                    value: v.to_string(),
                    reason: "must be a positive integer (seconds)".to_string(),
                })?;
        }
        if let Some(v) = section.get("max_retries") {
            config.fetch.max_retries = v.parse().map_err(|_| ConfigFileError::InvalidValue {
                section: "fetch".to_string(),
                key: "max_retries".to_string(),
                value: v.to_string(),
                reason: "must be a non-negative integer".to_string(),
            })?;
        }
        if let Some(v) = section.get("retry_base_delay_ms") {
            config.fetch.retry_base_delay_ms =
                v.parse().map_err(|_| ConfigFileError::InvalidValue {
                    section: "fetch".to_string(),
                    key: "retry_base_delay_ms".to_string(),
                    value: v.to_string(),
                    reason: "must be a positive integer (milliseconds)".to_string(),
                })?;
        }
        if let Some(v) = section.get("politeness_delay_ms") {
            config.fetch.politeness_delay_ms =
                v.parse().map_err(|_| ConfigFileError::InvalidValue {
                    section: "fetch".to_string(),
                    key: "politeness_delay_ms".to_string(),
                    value: v.to_string(),
                    reason: "must be a non-negative integer (milliseconds)".to_string(),
                })?;
        }
    }

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.cache.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("memory_tiles") {
            config.cache.memory_tiles = v.parse().map_err(|_| ConfigFileError::InvalidValue {
                section: "cache".to_string(),
                key: "memory_tiles".to_string(),
                value: v.to_string(),
                reason: "must be a non-negative integer (tile count)".to_string(),
            })?;
        }
    }

    // [quarantine] section
    if let Some(section) = ini.section(Some("quarantine")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.quarantine.directory = expand_tilde(v);
            }
        }
    }

    // [staging] section
    if let Some(section) = ini.section(Some("staging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.staging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("partitions") {
            let parsed: u32 = v.parse().map_err(|_| ConfigFileError::InvalidValue {
                section: "staging".to_string(),
                key: "partitions".to_string(),
                value: v.to_string(),
                reason: "must be a positive integer".to_string(),
            })?;
            if parsed == 0 {
                return Err(ConfigFileError::InvalidValue {
                    section: "staging".to_string(),
                    key: "partitions".to_string(),
                    value: v.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            config.staging.partitions = parsed;
        }
    }

    // [repair] section
    if let Some(section) = ini.section(Some("repair")) {
        if let Some(v) = section.get("snap_tolerance") {
            let parsed: f64 = v.parse().map_err(|_| ConfigFileError::InvalidValue {
                section: "repair".to_string(),
                key: "snap_tolerance".to_string(),
                value: v.to_string(),
                reason: "must be a number (degrees)".to_string(),
            })?;
            if !parsed.is_finite() || parsed < 0.0 {
                return Err(ConfigFileError::InvalidValue {
                    section: "repair".to_string(),
                    key: "snap_tolerance".to_string(),
                    value: v.to_string(),
                    reason: "must be a non-negative finite number (degrees)".to_string(),
                });
            }
            config.repair.snap_tolerance = parsed;
        }
    }

    // [output] section
    if let Some(section) = ini.section(Some("output")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.output.directory = expand_tilde(v);
            }
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
    }

    // [layer:<name>] sections
    for (section_name, props) in ini.iter() {
        let Some(section_name) = section_name else {
            continue;
        };
        let Some(layer_name) = section_name.strip_prefix("layer:") else {
            continue;
        };

        let mut geometry: Option<GeometryClass> = None;
        let mut plan = LayerPlan::new(layer_name.trim(), GeometryClass::Polygon);

        for (key, value) in props.iter() {
            match key {
                "identifier" => {
                    let v = value.trim();
                    if !v.is_empty() {
                        plan.identifier_column = Some(v.to_string());
                    }
                }
                "geometry" => {
                    geometry = Some(value.parse().map_err(|reason| {
                        ConfigFileError::InvalidValue {
                            section: section_name.to_string(),
                            key: "geometry".to_string(),
                            value: value.to_string(),
                            reason,
                        }
                    })?);
                }
                "known_columns" => plan.known_columns = parse_list(value),
                "integer_fields" => plan.integer_fields = parse_list(value),
                "string_fields" => plan.string_fields = parse_list(value),
                _ => {
                    if let Some(column) = key.strip_prefix("aggregate.") {
                        let rule: AggregateRule = value.parse().map_err(|reason| {
                            ConfigFileError::InvalidValue {
                                section: section_name.to_string(),
                                key: key.to_string(),
                                value: value.to_string(),
                                reason,
                            }
                        })?;
                        plan.aggregates.push((column.to_string(), rule));
                    } else if let Some(field) = key.strip_prefix("remap.") {
                        let table = parse_remap_table(value).map_err(|reason| {
                            ConfigFileError::InvalidValue {
                                section: section_name.to_string(),
                                key: key.to_string(),
                                value: value.to_string(),
                                reason,
                            }
                        })?;
                        plan.remap.insert(field.to_string(), table);
                    }
                    // Unknown keys are ignored, matching the other sections
                }
            }
        }

        plan.geometry = geometry.ok_or_else(|| ConfigFileError::InvalidValue {
            section: section_name.to_string(),
            key: "geometry".to_string(),
            value: String::new(),
            reason: "required: must be 'point', 'line' or 'polygon'".to_string(),
        })?;

        plan.validate()?;
        config.layers.push(plan);
    }

    Ok(config)
}

/// Serialize a `ConfigFile` back into an `Ini` object.
///
/// Inverse of [`parse_ini`]. Every setting is written explicitly, so a
/// saved file shows the effective values and round-trips through the
/// parser unchanged.
pub(super) fn to_ini(config: &ConfigFile) -> Ini {
    let mut ini = Ini::new();

    if let Some(ref base_url) = config.source.base_url {
        ini.with_section(Some("source")).set("base_url", base_url);
    }

    ini.with_section(Some("fetch"))
        .set("max_concurrent", config.fetch.max_concurrent.to_string())
        .set(
            "request_timeout_secs",
            config.fetch.request_timeout_secs.to_string(),
        )
        .set("max_retries", config.fetch.max_retries.to_string())
        .set(
            "retry_base_delay_ms",
            config.fetch.retry_base_delay_ms.to_string(),
        )
        .set(
            "politeness_delay_ms",
            config.fetch.politeness_delay_ms.to_string(),
        );

    ini.with_section(Some("cache"))
        .set("directory", config.cache.directory.display().to_string())
        .set("memory_tiles", config.cache.memory_tiles.to_string());

    ini.with_section(Some("quarantine")).set(
        "directory",
        config.quarantine.directory.display().to_string(),
    );

    ini.with_section(Some("staging"))
        .set("directory", config.staging.directory.display().to_string())
        .set("partitions", config.staging.partitions.to_string());

    ini.with_section(Some("repair"))
        .set("snap_tolerance", config.repair.snap_tolerance.to_string());

    ini.with_section(Some("output"))
        .set("directory", config.output.directory.display().to_string());

    ini.with_section(Some("logging"))
        .set("directory", config.logging.directory.display().to_string());

    for plan in &config.layers {
        let section = format!("layer:{}", plan.name);
        let mut setter = ini.with_section(Some(section));
        setter.set("geometry", plan.geometry.to_string());
        if let Some(ref identifier) = plan.identifier_column {
            setter.set("identifier", identifier);
        }
        if !plan.known_columns.is_empty() {
            setter.set("known_columns", plan.known_columns.join(", "));
        }
        if !plan.integer_fields.is_empty() {
            setter.set("integer_fields", plan.integer_fields.join(", "));
        }
        if !plan.string_fields.is_empty() {
            setter.set("string_fields", plan.string_fields.join(", "));
        }
        for (column, rule) in &plan.aggregates {
            setter.set(format!("aggregate.{}", column), rule.name());
        }

        // Sort remap fields and pairs so saved files are stable
        let mut fields: Vec<&String> = plan.remap.keys().collect();
        fields.sort();
        for field in fields {
            let mut pairs: Vec<(&i64, &i64)> = plan.remap[field].iter().collect();
            pairs.sort_by_key(|(from, _)| **from);
            let value = pairs
                .iter()
                .map(|(from, to)| format!("{}:{}", from, to))
                .collect::<Vec<_>>()
                .join(",");
            setter.set(format!("remap.{}", field), value);
        }
    }

    ini
}

/// Parse a comma-separated list, trimming entries and dropping empties.
pub(super) fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Parse a remap table of the form `from:to,from:to`.
fn parse_remap_table(value: &str) -> Result<HashMap<i64, i64>, String> {
    let mut table = HashMap::new();
    for pair in value.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (from, to) = pair
            .split_once(':')
            .ok_or_else(|| format!("expected 'from:to' pairs, got '{}'", pair))?;
        let from: i64 = from
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not an integer", from.trim()))?;
        let to: i64 = to
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not an integer", to.trim()))?;
        table.insert(from, to);
    }
    Ok(table)
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
