//! Run orchestration: plan, fetch, then per layer decode, repair,
//! stage, stitch, persist.
//!
//! Layers are processed one after another and independently; a failure
//! inside one layer empties that layer's output and leaves the others
//! alone. Within a layer, tiles are decoded in bounded chunks on the
//! blocking pool (`rayon` across tiles inside a chunk) and staged
//! immediately, so no more than one chunk of decoded records exists in
//! memory at a time.
//!
//! Tiles that fail decoding are quarantined with their payload and
//! skipped by every later layer. Only configuration problems abort a
//! run, and they do so before any I/O.

mod report;

pub use report::{LayerReport, RunReport};

use crate::coord::TileCoord;
use crate::feature::LayerBatch;
use crate::fetch::{TileFetcher, TileTransport};
use crate::layer::{LayerPlan, LayerPlanError};
use crate::mvt::{decode_tile, DecodeError};
use crate::plan::AreaDescriptor;
use crate::quarantine::Quarantine;
use crate::repair::repair_batch;
use crate::sink::FeatureSink;
use crate::stitch::Stitcher;
use crate::telemetry::IngestMetrics;
use bytes::Bytes;
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Tiles handed to one blocking decode batch.
const DECODE_CHUNK_SIZE: usize = 32;

/// Fatal pipeline errors.
///
/// Only configuration problems are fatal. Everything else degrades to
/// skipped tiles or empty layers and shows up in the [`RunReport`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid layer configuration: {0}")]
    Config(#[from] LayerPlanError),
}

/// Drives one ingest run end to end.
pub struct IngestPipeline<T: TileTransport> {
    fetcher: TileFetcher<T>,
    quarantine: Arc<Quarantine>,
    stitcher: Stitcher,
    sink: Arc<dyn FeatureSink>,
    metrics: Arc<IngestMetrics>,
    snap_tolerance: f64,
    chunk_size: usize,
}

impl<T: TileTransport + 'static> IngestPipeline<T> {
    pub fn new(
        fetcher: TileFetcher<T>,
        quarantine: Arc<Quarantine>,
        stitcher: Stitcher,
        sink: Arc<dyn FeatureSink>,
        metrics: Arc<IngestMetrics>,
        snap_tolerance: f64,
    ) -> Self {
        Self {
            fetcher,
            quarantine,
            stitcher,
            sink,
            metrics,
            snap_tolerance,
            chunk_size: DECODE_CHUNK_SIZE,
        }
    }

    /// Runs one ingest over `area` at `zoom` for every plan in `plans`.
    ///
    /// Validates every plan before touching the network or the disk.
    /// After that the run always completes: absent tiles, failed tiles,
    /// malformed tiles and broken layers degrade the report, never the
    /// call.
    pub async fn run(
        &self,
        area: &AreaDescriptor,
        zoom: u8,
        plans: &[LayerPlan],
        cancel: &CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        for plan in plans {
            plan.validate()?;
        }

        let started = Instant::now();
        let coords = crate::plan::plan(area, zoom);
        info!(
            tiles = coords.len(),
            zoom = zoom,
            layers = plans.len(),
            "run planned"
        );

        let tiles = self.fetcher.fetch_many(coords.clone(), cancel).await;
        let mut acquired: Vec<(TileCoord, Bytes)> = tiles.into_iter().collect();
        // Fixed tile order keeps the staging sequence, and with it the
        // "first" aggregation input, independent of arrival order.
        acquired.sort_by_key(|(coord, _)| *coord);

        let mut quarantined: HashSet<TileCoord> = HashSet::new();
        let mut layers = Vec::with_capacity(plans.len());
        for plan in plans {
            if cancel.is_cancelled() {
                break;
            }
            layers.push(
                self.run_layer(plan, &acquired, &mut quarantined, cancel)
                    .await,
            );
        }

        let report = RunReport {
            tiles_planned: coords.len(),
            tiles_acquired: acquired.len(),
            layers,
            cancelled: cancel.is_cancelled(),
            elapsed: started.elapsed(),
        };
        info!(
            tiles = report.tiles_acquired,
            groups = report.total_groups(),
            quarantined = report.tiles_quarantined(),
            elapsed_secs = report.elapsed.as_secs_f64(),
            "run complete"
        );
        Ok(report)
    }

    /// One layer: decode and repair chunk by chunk, stage as we go,
    /// then stitch and persist.
    ///
    /// Never returns an error; failures are logged, counted, and leave
    /// `failed` set on the report. Dropping the stitch session on the
    /// early returns releases the staging area.
    #[instrument(skip_all, fields(layer = %plan.name))]
    async fn run_layer(
        &self,
        plan: &LayerPlan,
        tiles: &[(TileCoord, Bytes)],
        quarantined: &mut HashSet<TileCoord>,
        cancel: &CancellationToken,
    ) -> LayerReport {
        let mut report = LayerReport::new(&plan.name);

        let mut session = match self.stitcher.session(plan) {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "staging unavailable, layer abandoned");
                self.metrics.layer_failed();
                report.failed = true;
                return report;
            }
        };

        for chunk in tiles.chunks(self.chunk_size) {
            if cancel.is_cancelled() {
                info!("run cancelled, layer output withheld");
                return report;
            }

            let work: Vec<(TileCoord, Bytes)> = chunk
                .iter()
                .filter(|(coord, _)| !quarantined.contains(coord))
                .cloned()
                .collect();
            if work.is_empty() {
                continue;
            }

            let worker_plan = plan.clone();
            let tolerance = self.snap_tolerance;
            let joined =
                tokio::task::spawn_blocking(move || decode_chunk(work, worker_plan, tolerance))
                    .await;
            let passes = match joined {
                Ok(passes) => passes,
                Err(e) => {
                    error!(error = %e, "decode workers aborted, layer abandoned");
                    self.metrics.layer_failed();
                    report.failed = true;
                    return report;
                }
            };

            for (coord, bytes, pass) in passes {
                match pass {
                    Ok(pass) => {
                        self.metrics.tile_decoded(pass.records);
                        self.metrics.properties_nulled(pass.nulled);
                        self.metrics.features_repaired(pass.repaired);
                        self.metrics.features_dropped(pass.dropped);
                        report.records_decoded += pass.records;
                        report.identifiers_nulled += pass.nulled;
                        report.records_repaired += pass.repaired;
                        report.records_dropped += pass.dropped;

                        let Some(batch) = pass.batch else { continue };
                        if let Err(e) = session.stage(batch) {
                            error!(error = %e, "staging failed, layer abandoned");
                            self.metrics.layer_failed();
                            report.failed = true;
                            return report;
                        }
                    }
                    Err(e) => {
                        quarantined.insert(coord);
                        self.metrics.tile_quarantined();
                        report.tiles_quarantined += 1;
                        if let Err(io_err) = self.quarantine.record(coord, &bytes, &e.to_string())
                        {
                            warn!(tile = %coord, error = %io_err, "quarantine write failed");
                        }
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            info!("run cancelled, layer output withheld");
            return report;
        }

        let outcome = match session.finish() {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "stitching failed, layer abandoned");
                self.metrics.layer_failed();
                report.failed = true;
                return report;
            }
        };

        self.metrics.records_staged(outcome.staged);
        self.metrics.non_point_records_dropped(outcome.non_points_dropped);
        self.metrics.groups_stitched(outcome.groups.len() as u64);
        report.records_staged = outcome.staged;
        report.non_points_dropped = outcome.non_points_dropped;
        report.groups = outcome.groups.len() as u64;

        if let Err(e) = self.sink.persist(&plan.name, &outcome.groups) {
            error!(error = %e, "persist failed, layer output lost");
            self.metrics.layer_failed();
            report.failed = true;
            return report;
        }

        self.metrics.layer_completed();
        info!(
            records = report.records_decoded,
            staged = report.records_staged,
            groups = report.groups,
            "layer complete"
        );
        report
    }
}

/// Per-tile result of one decode and repair pass.
struct TilePass {
    batch: Option<LayerBatch>,
    /// Records decoded, before repair
    records: u64,
    nulled: u64,
    repaired: u64,
    dropped: u64,
}

/// Decodes and repairs one chunk of tiles, in parallel across tiles.
fn decode_chunk(
    work: Vec<(TileCoord, Bytes)>,
    plan: LayerPlan,
    tolerance: f64,
) -> Vec<(TileCoord, Bytes, Result<TilePass, DecodeError>)> {
    work.into_par_iter()
        .map(|(coord, bytes)| {
            let result = decode_tile(coord, &bytes, std::slice::from_ref(&plan)).map(|decoded| {
                let mut pass = TilePass {
                    batch: None,
                    records: 0,
                    nulled: decoded.nulled,
                    repaired: 0,
                    dropped: 0,
                };
                if let Some(batch) = decoded.batches.into_iter().next() {
                    pass.records = batch.len() as u64;
                    let outcome = repair_batch(batch, tolerance);
                    pass.repaired = outcome.repaired;
                    pass.dropped = outcome.dropped;
                    pass.batch = Some(outcome.batch);
                }
                pass
            });
            (coord, bytes, result)
        })
        .collect()
}
