//! TileStitch - Vector map feature ingestion
//!
//! This library fetches vector-tile-encoded map features (parcels,
//! boundaries, infrastructure) from a tile server and reassembles them
//! into clean, query-ready spatial records: tiles are planned, fetched
//! through a cache, decoded to WGS84 feature records, repaired, and
//! stitched back together across tile boundaries.
//!
//! # High-Level API
//!
//! The [`pipeline`] module drives a whole run:
//!
//! ```ignore
//! use tilestitch::pipeline::IngestPipeline;
//! use tilestitch::plan::AreaDescriptor;
//! use tokio_util::sync::CancellationToken;
//!
//! let pipeline = IngestPipeline::new(fetcher, quarantine, stitcher, sink, metrics, 1e-9);
//! let area = AreaDescriptor::Bbox {
//!     min_lon: 11.5,
//!     min_lat: 48.1,
//!     max_lon: 11.6,
//!     max_lat: 48.2,
//! };
//! let report = pipeline.run(&area, 15, &layers, &CancellationToken::new()).await?;
//! println!("{report}");
//! ```

pub mod cache;
pub mod config;
pub mod coord;
pub mod feature;
pub mod fetch;
pub mod layer;
pub mod logging;
pub mod mvt;
pub mod pipeline;
pub mod plan;
pub mod quarantine;
pub mod repair;
pub mod sink;
pub mod stitch;
pub mod telemetry;

/// Version of the TileStitch library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
