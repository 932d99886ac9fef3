//! End-of-run reporting.

use std::fmt;
use std::time::Duration;

/// Outcome of one layer's pass through the pipeline.
#[derive(Debug, Clone, Default)]
pub struct LayerReport {
    pub layer: String,
    /// Feature records decoded for this layer, before repair
    pub records_decoded: u64,
    /// Geometries modified by repair
    pub records_repaired: u64,
    /// Records dropped because repair left nothing usable
    pub records_dropped: u64,
    /// Identifier values nulled during property normalization
    pub identifiers_nulled: u64,
    /// Records written to staging
    pub records_staged: u64,
    /// Non-point records refused by a point layer
    pub non_points_dropped: u64,
    /// Tiles quarantined while decoding this layer
    pub tiles_quarantined: u64,
    /// Stitch groups produced
    pub groups: u64,
    /// True when a staging or persistence failure emptied this layer
    pub failed: bool,
}

impl LayerReport {
    pub fn new(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            ..Default::default()
        }
    }
}

/// Everything one run did, for the log and the CLI summary.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Tiles the planner asked for
    pub tiles_planned: usize,
    /// Tiles whose bytes were actually acquired
    pub tiles_acquired: usize,
    /// One entry per layer, in configuration order
    pub layers: Vec<LayerReport>,
    /// True when the run was cancelled before completing
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl RunReport {
    /// Total stitch groups across all layers.
    pub fn total_groups(&self) -> u64 {
        self.layers.iter().map(|l| l.groups).sum()
    }

    /// Tiles quarantined across all layers.
    pub fn tiles_quarantined(&self) -> u64 {
        self.layers.iter().map(|l| l.tiles_quarantined).sum()
    }

    /// True when the run finished and every layer produced output.
    pub fn all_layers_completed(&self) -> bool {
        !self.cancelled && self.layers.iter().all(|l| !l.failed)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "run {} in {:.1}s: {}/{} tiles acquired, {} quarantined",
            if self.cancelled { "cancelled" } else { "finished" },
            self.elapsed.as_secs_f64(),
            self.tiles_acquired,
            self.tiles_planned,
            self.tiles_quarantined()
        )?;
        for layer in &self.layers {
            if layer.failed {
                writeln!(f, "  {}: failed, no output written", layer.layer)?;
            } else {
                writeln!(
                    f,
                    "  {}: {} records -> {} groups ({} repaired, {} dropped, {} ids nulled)",
                    layer.layer,
                    layer.records_decoded,
                    layer.groups,
                    layer.records_repaired,
                    layer.records_dropped,
                    layer.identifiers_nulled
                )?;
            }
        }
        Ok(())
    }
}
