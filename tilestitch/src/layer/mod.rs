//! Per-layer ingestion plans.
//!
//! A [`LayerPlan`] tells the decoder and the stitcher everything they need
//! to know about one layer: which column identifies an entity across tiles,
//! which geometry class the layer is expected to hold, which columns the
//! staging schema must carry, how attributes aggregate, and which fields
//! get type-normalized at decode time.
//!
//! Plans are injected configuration. Validation happens up front, before
//! any I/O, because column names flow into staging file names and output
//! schemas where an unvetted string must never arrive.

use crate::feature::GeometryClass;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

/// How one attribute column is resolved when fragments merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateRule {
    /// Value from the first fragment under the stable tile ordering
    First,
    /// Sum across fragments (numeric columns)
    Sum,
    /// Arithmetic mean across fragments (numeric columns)
    Mean,
}

impl AggregateRule {
    /// Canonical name, as written in configuration.
    pub fn name(&self) -> &'static str {
        match self {
            AggregateRule::First => "first",
            AggregateRule::Sum => "sum",
            AggregateRule::Mean => "mean",
        }
    }
}

impl std::str::FromStr for AggregateRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "first" => Ok(AggregateRule::First),
            "sum" => Ok(AggregateRule::Sum),
            "mean" | "avg" => Ok(AggregateRule::Mean),
            other => Err(format!("unknown aggregation rule '{}'", other)),
        }
    }
}

/// Errors raised while validating a layer plan.
///
/// These are configuration errors: fatal, raised before any I/O.
#[derive(Debug, Error)]
pub enum LayerPlanError {
    /// Layer name is empty or contains unsafe characters
    #[error("unsafe layer name '{0}': must match [A-Za-z_][A-Za-z0-9_]*")]
    UnsafeLayerName(String),

    /// A column name is empty or contains unsafe characters
    #[error("unsafe column name '{column}' in layer '{layer}': must match [A-Za-z_][A-Za-z0-9_]*")]
    UnsafeColumnName { layer: String, column: String },
}

/// Column names are embedded into staging identifiers and output schemas,
/// so they are restricted to a conservative identifier alphabet.
fn safe_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

/// Whether a name is safe to use as a layer or column identifier.
#[inline]
pub fn is_safe_name(name: &str) -> bool {
    safe_name_pattern().is_match(name)
}

/// Ingestion plan for one layer.
#[derive(Debug, Clone)]
pub struct LayerPlan {
    /// Layer name as published by the tile source
    pub name: String,
    /// Column grouping fragments of the same entity; None collapses the
    /// whole layer into a single group
    pub identifier_column: Option<String>,
    /// Geometry class the stitched output must hold
    pub geometry: GeometryClass,
    /// Columns the staging schema always carries, present in input or not
    pub known_columns: Vec<String>,
    /// Aggregation rules per output column
    pub aggregates: Vec<(String, AggregateRule)>,
    /// Fields coerced to a clean integer at decode time
    pub integer_fields: Vec<String>,
    /// Fields coerced to string at decode time
    pub string_fields: Vec<String>,
    /// Known-bad upstream identifier corrections, per field: {from → to}
    pub remap: HashMap<String, HashMap<i64, i64>>,
}

impl LayerPlan {
    /// Creates a minimal plan with no identifier and no normalization.
    pub fn new(name: impl Into<String>, geometry: GeometryClass) -> Self {
        Self {
            name: name.into(),
            identifier_column: None,
            geometry,
            known_columns: Vec::new(),
            aggregates: Vec::new(),
            integer_fields: Vec::new(),
            string_fields: Vec::new(),
            remap: HashMap::new(),
        }
    }

    /// Checks every name in the plan against the safe-identifier alphabet.
    ///
    /// # Returns
    ///
    /// `Ok(())` when all names are safe, otherwise the first offending name.
    pub fn validate(&self) -> Result<(), LayerPlanError> {
        if !is_safe_name(&self.name) {
            return Err(LayerPlanError::UnsafeLayerName(self.name.clone()));
        }

        let columns = self
            .identifier_column
            .iter()
            .chain(self.known_columns.iter())
            .chain(self.aggregates.iter().map(|(c, _)| c))
            .chain(self.integer_fields.iter())
            .chain(self.string_fields.iter())
            .chain(self.remap.keys());

        for column in columns {
            if !is_safe_name(column) {
                return Err(LayerPlanError::UnsafeColumnName {
                    layer: self.name.clone(),
                    column: column.clone(),
                });
            }
        }

        Ok(())
    }

    /// Aggregation rule for a column, defaulting to first-observed.
    pub fn rule_for(&self, column: &str) -> AggregateRule {
        self.aggregates
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, r)| *r)
            .unwrap_or(AggregateRule::First)
    }

    /// Remapped value for a field, when a correction table matches.
    pub fn remap_value(&self, field: &str, value: i64) -> Option<i64> {
        self.remap.get(field).and_then(|table| table.get(&value)).copied()
    }
}
