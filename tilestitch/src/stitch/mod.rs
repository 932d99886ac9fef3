//! Fragment stitching: staging, grouping and dissolve.
//!
//! One real-world feature that straddles N tiles arrives as N
//! individually valid fragments. This module merges them back together
//! without ever holding a whole layer in memory:
//!
//! 1. **Stage**: decoded tile batches stream into a [`StagingArea`],
//!    routed into hash partitions by dissolve key.
//! 2. **Group**: each partition is read back alone; fragments sharing
//!    an identifier value form one group.
//! 3. **Dissolve**: each group merges into a single geometry of the
//!    layer's class, attributes resolved per aggregation rule.
//!
//! A [`StitchSession`] walks one layer through all three phases. The
//! staging area is released when the session ends, finished or not.
//! Layers without an identifier column collapse into a single group
//! spanning the whole layer.

mod dissolve;
mod staging;

pub use dissolve::dissolve_group;
pub use staging::{
    DiskStagingStore, SpillRecord, StagingArea, StagingError, StagingStore,
};

use crate::feature::{FeatureRecord, GeometryClass, LayerBatch, PropertyValue, StitchGroup};
use crate::layer::LayerPlan;
use geo_types::Geometry;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Dissolve key for layers without an identifier column.
const WHOLE_LAYER_KEY: &str = "layer";

/// Errors raised while stitching one layer.
///
/// These abort only the affected layer; the caller logs them and moves
/// on to the next layer with an empty result.
#[derive(Debug, Error)]
pub enum StitchError {
    /// The staging store failed underneath the session
    #[error("staging failed for layer '{layer}': {source}")]
    Staging {
        layer: String,
        #[source]
        source: StagingError,
    },
}

/// Result of stitching one layer.
#[derive(Debug)]
pub struct StitchOutcome {
    /// Merged groups, sorted by identifier key
    pub groups: Vec<StitchGroup>,
    /// Fragments staged
    pub staged: u64,
    /// Fragments refused by the point-layer check
    pub non_points_dropped: u64,
}

/// Creates stitch sessions bound to one staging store and run.
pub struct Stitcher {
    store: Arc<dyn StagingStore>,
    run_id: String,
}

impl Stitcher {
    /// Creates a stitcher with a generated run id.
    pub fn new(store: Arc<dyn StagingStore>) -> Self {
        let run_id = format!(
            "{}_{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S"),
            std::process::id()
        );
        Self::with_run_id(store, run_id)
    }

    /// Creates a stitcher under an explicit run id.
    ///
    /// The id becomes part of staging directory names, so it must be
    /// filesystem-safe and unique among concurrent runs.
    pub fn with_run_id(store: Arc<dyn StagingStore>, run_id: impl Into<String>) -> Self {
        Self {
            store,
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Opens a session for one layer.
    pub fn session(&self, plan: &LayerPlan) -> Result<StitchSession, StitchError> {
        let area = self
            .store
            .open(&self.run_id, &plan.name)
            .map_err(|source| StitchError::Staging {
                layer: plan.name.clone(),
                source,
            })?;

        Ok(StitchSession {
            plan: plan.clone(),
            area,
            staged: 0,
            non_points_dropped: 0,
            observed_columns: HashSet::new(),
        })
    }
}

/// One layer's pass through stage, group and dissolve.
///
/// Feed decoded batches with [`stage`](Self::stage), then call
/// [`finish`](Self::finish) once. Dropping the session at any point
/// releases the staging area.
pub struct StitchSession {
    plan: LayerPlan,
    area: Box<dyn StagingArea>,
    staged: u64,
    non_points_dropped: u64,
    observed_columns: HashSet<String>,
}

impl StitchSession {
    /// Stages one tile batch worth of records.
    ///
    /// On a point layer, records that are not a single point are
    /// refused here so centroid-style output cannot be contaminated
    /// by stray lines or polygons.
    pub fn stage(&mut self, batch: LayerBatch) -> Result<(), StitchError> {
        let mut spill = Vec::with_capacity(batch.records.len());
        for record in batch.records {
            if self.plan.geometry == GeometryClass::Point
                && !matches!(record.geometry, Geometry::Point(_))
            {
                self.non_points_dropped += 1;
                continue;
            }
            for column in record.properties.keys() {
                if !self.observed_columns.contains(column) {
                    self.observed_columns.insert(column.clone());
                }
            }
            let key = self.dissolve_key(&record);
            spill.push(SpillRecord { key, record });
        }

        self.staged += spill.len() as u64;
        self.area
            .append(spill)
            .map_err(|source| StitchError::Staging {
                layer: self.plan.name.clone(),
                source,
            })
    }

    /// Groups and dissolves everything staged, one partition at a time.
    pub fn finish(mut self) -> Result<StitchOutcome, StitchError> {
        let columns = self.output_columns();
        let mut groups: Vec<StitchGroup> = Vec::new();

        for partition in 0..self.area.partition_count() {
            let staged =
                self.area
                    .read_partition(partition)
                    .map_err(|source| StitchError::Staging {
                        layer: self.plan.name.clone(),
                        source,
                    })?;
            if staged.is_empty() {
                continue;
            }

            let mut by_key: BTreeMap<String, Vec<FeatureRecord>> = BTreeMap::new();
            for spill in staged {
                by_key.entry(spill.key).or_default().push(spill.record);
            }
            for (_, records) in by_key {
                if let Some(group) = dissolve_group(&self.plan, &columns, records) {
                    groups.push(group);
                }
            }
        }

        // Partitions come back in hash order; settle on identifier order.
        groups.sort_by_key(|g| g.identifier.group_key());

        if self.non_points_dropped > 0 {
            warn!(
                layer = %self.plan.name,
                dropped = self.non_points_dropped,
                "refused non-point fragments on point layer"
            );
        }
        info!(
            layer = %self.plan.name,
            staged = self.staged,
            groups = groups.len(),
            "layer stitched"
        );

        Ok(StitchOutcome {
            groups,
            staged: self.staged,
            non_points_dropped: self.non_points_dropped,
        })
    }

    fn dissolve_key(&self, record: &FeatureRecord) -> String {
        match &self.plan.identifier_column {
            Some(column) => record
                .property(column)
                .map(|v| v.group_key())
                .unwrap_or_else(|| PropertyValue::Null.group_key()),
            None => WHOLE_LAYER_KEY.to_string(),
        }
    }

    /// Output schema: known columns, then the identifier if missing,
    /// then requested aggregation columns that actually occur in the
    /// staged data. Aggregation columns never observed are dropped.
    fn output_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for column in &self.plan.known_columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        if let Some(identifier) = &self.plan.identifier_column {
            if !columns.contains(identifier) {
                columns.push(identifier.clone());
            }
        }
        for (column, _) in &self.plan.aggregates {
            if columns.contains(column) {
                continue;
            }
            if self.observed_columns.contains(column) {
                columns.push(column.clone());
            } else {
                warn!(
                    layer = %self.plan.name,
                    column = %column,
                    "aggregation column absent from staged data, dropping"
                );
            }
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TileCoord;
    use crate::layer::AggregateRule;
    use geo::Area;
    use geo_types::{point, polygon};
    use indexmap::IndexMap;
    use std::io;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_stitcher() -> (Stitcher, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(DiskStagingStore::new(temp.path(), 4));
        (Stitcher::with_run_id(store, "testrun"), temp)
    }

    fn parcel_plan() -> LayerPlan {
        let mut plan = LayerPlan::new("parcels", GeometryClass::Polygon);
        plan.identifier_column = Some("parcel_id".to_string());
        plan.known_columns = vec!["parcel_id".to_string()];
        plan
    }

    fn square(origin: f64, id: i64, tile: TileCoord, sequence: u32) -> FeatureRecord {
        let mut properties = IndexMap::new();
        properties.insert("parcel_id".to_string(), PropertyValue::Int(id));
        FeatureRecord {
            layer: "parcels".to_string(),
            geometry: Geometry::Polygon(polygon![
                (x: origin, y: 0.0),
                (x: origin + 1.0, y: 0.0),
                (x: origin + 1.0, y: 1.0),
                (x: origin, y: 1.0),
            ]),
            properties,
            tile,
            sequence,
        }
    }

    fn batch(records: Vec<FeatureRecord>) -> LayerBatch {
        LayerBatch {
            layer: "parcels".to_string(),
            records,
        }
    }

    #[test]
    fn test_session_groups_across_batches() {
        let (stitcher, _temp) = create_stitcher();
        let mut session = stitcher.session(&parcel_plan()).unwrap();

        let t0 = TileCoord::new(15, 100, 200);
        let t1 = TileCoord::new(15, 101, 200);
        session
            .stage(batch(vec![square(0.0, 42, t0, 0), square(5.0, 7, t0, 1)]))
            .unwrap();
        session.stage(batch(vec![square(1.0, 42, t1, 0)])).unwrap();

        let outcome = session.finish().unwrap();

        assert_eq!(outcome.staged, 3);
        assert_eq!(outcome.groups.len(), 2);
        // Sorted by identifier key: "i:42" before "i:7".
        assert_eq!(outcome.groups[0].identifier, PropertyValue::Int(42));
        assert_eq!(outcome.groups[0].fragment_count, 2);
        assert_eq!(outcome.groups[1].identifier, PropertyValue::Int(7));
        assert_eq!(outcome.groups[1].fragment_count, 1);
    }

    #[test]
    fn test_point_layer_refuses_other_classes() {
        let (stitcher, _temp) = create_stitcher();
        let mut plan = LayerPlan::new("markers", GeometryClass::Point);
        plan.identifier_column = Some("parcel_id".to_string());
        let mut session = stitcher.session(&plan).unwrap();

        let tile = TileCoord::new(15, 100, 200);
        let mut marker = square(0.0, 1, tile, 0);
        marker.geometry = Geometry::Point(point!(x: 0.5, y: 0.5));
        let stray_polygon = square(0.0, 1, tile, 1);

        session
            .stage(batch(vec![marker, stray_polygon]))
            .unwrap();
        let outcome = session.finish().unwrap();

        assert_eq!(outcome.staged, 1);
        assert_eq!(outcome.non_points_dropped, 1);
        assert_eq!(outcome.groups.len(), 1);
        assert!(matches!(outcome.groups[0].geometry, Geometry::Point(_)));
    }

    #[test]
    fn test_unobserved_aggregate_column_dropped() {
        let (stitcher, _temp) = create_stitcher();
        let mut plan = parcel_plan();
        plan.aggregates = vec![("height_m".to_string(), AggregateRule::Sum)];
        let mut session = stitcher.session(&plan).unwrap();

        let tile = TileCoord::new(15, 100, 200);
        session.stage(batch(vec![square(0.0, 42, tile, 0)])).unwrap();
        let outcome = session.finish().unwrap();

        assert_eq!(outcome.groups.len(), 1);
        assert!(!outcome.groups[0].properties.contains_key("height_m"));
        assert!(outcome.groups[0].properties.contains_key("parcel_id"));
    }

    #[test]
    fn test_observed_aggregate_column_included() {
        let (stitcher, _temp) = create_stitcher();
        let mut plan = parcel_plan();
        plan.aggregates = vec![("height_m".to_string(), AggregateRule::Sum)];
        let mut session = stitcher.session(&plan).unwrap();

        let tile = TileCoord::new(15, 100, 200);
        let mut a = square(0.0, 42, tile, 0);
        a.properties
            .insert("height_m".to_string(), PropertyValue::Int(10));
        let mut b = square(1.0, 42, tile, 1);
        b.properties
            .insert("height_m".to_string(), PropertyValue::Int(5));

        session.stage(batch(vec![a, b])).unwrap();
        let outcome = session.finish().unwrap();

        assert_eq!(
            outcome.groups[0].properties.get("height_m"),
            Some(&PropertyValue::Int(15))
        );
    }

    #[test]
    fn test_without_identifier_whole_layer_collapses() {
        let (stitcher, _temp) = create_stitcher();
        let plan = LayerPlan::new("parcels", GeometryClass::Polygon);
        let mut session = stitcher.session(&plan).unwrap();

        let t0 = TileCoord::new(15, 100, 200);
        let t1 = TileCoord::new(15, 101, 200);
        session.stage(batch(vec![square(0.0, 1, t0, 0)])).unwrap();
        session.stage(batch(vec![square(5.0, 2, t1, 0)])).unwrap();

        let outcome = session.finish().unwrap();

        assert_eq!(outcome.groups.len(), 1);
        let group = &outcome.groups[0];
        assert_eq!(group.identifier, PropertyValue::Null);
        assert_eq!(group.fragment_count, 2);
        // Disjoint squares stay two parts of one merged shape.
        assert!(matches!(group.geometry, Geometry::MultiPolygon(_)));
        assert!((group.geometry.unsigned_area() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_input_order_does_not_change_result() {
        let t = |x: u32| TileCoord::new(15, 100 + x, 200);
        let make_fragments = || {
            vec![
                square(0.0, 42, t(0), 0),
                square(1.0, 42, t(1), 0),
                square(2.0, 42, t(2), 0),
                square(8.0, 7, t(3), 0),
            ]
        };

        let run = |order: Vec<usize>| {
            let (stitcher, temp) = create_stitcher();
            let mut session = stitcher.session(&parcel_plan()).unwrap();
            let fragments = make_fragments();
            for index in order {
                session
                    .stage(batch(vec![fragments[index].clone()]))
                    .unwrap();
            }
            let outcome = session.finish().unwrap();
            drop(temp);
            outcome
        };

        let forward = run(vec![0, 1, 2, 3]);
        let backward = run(vec![3, 2, 1, 0]);

        assert_eq!(forward.groups.len(), backward.groups.len());
        for (a, b) in forward.groups.iter().zip(backward.groups.iter()) {
            assert_eq!(a.identifier, b.identifier);
            assert_eq!(a.fragment_count, b.fragment_count);
            assert!(
                (a.geometry.unsigned_area() - b.geometry.unsigned_area()).abs() < 1e-9
            );
            assert_eq!(a.properties, b.properties);
        }
    }

    #[test]
    fn test_staging_write_failure_surfaces() {
        struct FailingArea;
        impl StagingArea for FailingArea {
            fn append(&mut self, _records: Vec<SpillRecord>) -> Result<(), StagingError> {
                Err(StagingError::Write {
                    path: PathBuf::from("/nowhere/part_000.bin"),
                    source: io::Error::other("disk full"),
                })
            }
            fn partition_count(&self) -> u32 {
                1
            }
            fn read_partition(&mut self, _partition: u32) -> Result<Vec<SpillRecord>, StagingError> {
                Ok(Vec::new())
            }
        }
        struct FailingStore;
        impl StagingStore for FailingStore {
            fn open(&self, _run_id: &str, _layer: &str) -> Result<Box<dyn StagingArea>, StagingError> {
                Ok(Box::new(FailingArea))
            }
        }

        let stitcher = Stitcher::with_run_id(Arc::new(FailingStore), "testrun");
        let mut session = stitcher.session(&parcel_plan()).unwrap();

        let tile = TileCoord::new(15, 100, 200);
        let result = session.stage(batch(vec![square(0.0, 42, tile, 0)]));

        match result {
            Err(StitchError::Staging { layer, .. }) => assert_eq!(layer, "parcels"),
            other => panic!("expected staging error, got {:?}", other),
        }
    }

    #[test]
    fn test_generated_run_ids_are_filesystem_safe() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(DiskStagingStore::new(temp.path(), 2));
        let stitcher = Stitcher::new(store);

        assert!(!stitcher.run_id().is_empty());
        assert!(stitcher
            .run_id()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }
}
