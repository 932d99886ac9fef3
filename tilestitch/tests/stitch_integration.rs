//! Integration tests for the ingest pipeline.
//!
//! These tests drive the complete flow over synthetic vector tiles:
//! - plan → fetch → decode → repair → stage → stitch → persist
//! - cross-tile fragment dissolve along shared tile edges
//! - quarantine, retry and cache behavior through scripted transports
//!
//! Run with: `cargo test --test stitch_integration`

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use geo::{Area, BoundingRect};
use geo_types::{Geometry, LineString, Polygon};
use parking_lot::Mutex;
use prost::Message;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use tilestitch::cache::{MemoryTileCache, NoopTileCache, TileCache};
use tilestitch::config::FetchSettings;
use tilestitch::coord::TileCoord;
use tilestitch::feature::{GeometryClass, PropertyValue};
use tilestitch::fetch::{TileFetcher, TileResponse, TileTransport, TransportError};
use tilestitch::layer::LayerPlan;
use tilestitch::mvt::{GeomType, TileFeature, TileLayer, TileTransform, TileValue, VectorTile};
use tilestitch::pipeline::IngestPipeline;
use tilestitch::plan::AreaDescriptor;
use tilestitch::quarantine::Quarantine;
use tilestitch::sink::MemorySink;
use tilestitch::stitch::{DiskStagingStore, Stitcher};
use tilestitch::telemetry::IngestMetrics;

// ============================================================================
// Helper Functions
// ============================================================================

const BASE_URL: &str = "https://tiles.test/data";
const EXTENT: u32 = 4096;

/// Zoom 15 tile over Hamburg (roughly 53.5N, 10.0E). Adjacent tiles in
/// the tests extend east and south from here.
const HAMBURG: TileCoord = TileCoord {
    zoom: 15,
    x: 17294,
    y: 10600,
};

fn tile_url(coord: TileCoord) -> String {
    format!(
        "{}/{}/{}/{}.vector.pbf",
        BASE_URL, coord.zoom, coord.x, coord.y
    )
}

fn zigzag(value: i64) -> u32 {
    ((value << 1) ^ (value >> 63)) as u32
}

/// Encodes one closed ring as a MoveTo, LineTo, ClosePath command
/// stream. `corners` are absolute tile-local coordinates in ring order.
fn ring_commands(corners: &[(i64, i64)]) -> Vec<u32> {
    let mut stream = Vec::with_capacity(corners.len() * 2 + 3);
    let (mut x, mut y) = (0i64, 0i64);

    stream.push((1 << 3) | 1);
    stream.push(zigzag(corners[0].0 - x));
    stream.push(zigzag(corners[0].1 - y));
    (x, y) = corners[0];

    stream.push((((corners.len() - 1) as u32) << 3) | 2);
    for &(cx, cy) in &corners[1..] {
        stream.push(zigzag(cx - x));
        stream.push(zigzag(cy - y));
        (x, y) = (cx, cy);
    }

    stream.push((1 << 3) | 7);
    stream
}

/// Axis-aligned square ring between two corners, wound as an exterior
/// under the tile's y-down convention.
fn square_ring(min: (i64, i64), max: (i64, i64)) -> Vec<(i64, i64)> {
    vec![(min.0, min.1), (max.0, min.1), (max.0, max.1), (min.0, max.1)]
}

/// Encodes a tile carrying polygon features on one layer. Each entry is
/// a parcel id plus its ring corners in tile-local coordinates.
fn polygon_tile(layer: &str, features: &[(i64, Vec<(i64, i64)>)]) -> Vec<u8> {
    VectorTile {
        layers: vec![TileLayer {
            name: layer.to_string(),
            features: features
                .iter()
                .enumerate()
                .map(|(index, (_, corners))| TileFeature {
                    id: None,
                    tags: vec![0, index as u32],
                    geom_type: Some(GeomType::Polygon as i32),
                    geometry: ring_commands(corners),
                })
                .collect(),
            keys: vec!["parcel_id".to_string()],
            values: features.iter().map(|(id, _)| TileValue::int(*id)).collect(),
            extent: Some(EXTENT),
            version: 2,
        }],
    }
    .encode_to_vec()
}

fn parcel_plan() -> LayerPlan {
    let mut plan = LayerPlan::new("parcels", GeometryClass::Polygon);
    plan.identifier_column = Some("parcel_id".to_string());
    plan.integer_fields = vec!["parcel_id".to_string()];
    plan.known_columns = vec!["parcel_id".to_string()];
    plan
}

fn fetch_settings(max_retries: u32) -> FetchSettings {
    FetchSettings {
        max_concurrent: 4,
        request_timeout_secs: 5,
        max_retries,
        retry_base_delay_ms: 1,
        politeness_delay_ms: 0,
    }
}

/// Transport answering by exact URL, counting every request. Unknown
/// URLs get a 404.
struct MapTransport {
    tiles: HashMap<String, Bytes>,
    calls: AtomicUsize,
}

impl MapTransport {
    fn new(tiles: Vec<(TileCoord, Vec<u8>)>) -> Self {
        Self {
            tiles: tiles
                .into_iter()
                .map(|(coord, bytes)| (tile_url(coord), Bytes::from(bytes)))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TileTransport for MapTransport {
    async fn get(&self, url: &str) -> Result<TileResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.tiles.get(url) {
            Some(bytes) => Ok(TileResponse {
                status: 200,
                body: bytes.clone(),
            }),
            None => Ok(TileResponse {
                status: 404,
                body: Bytes::new(),
            }),
        }
    }
}

/// Transport replaying a fixed sequence of responses, then repeating
/// the last one.
struct SequenceTransport {
    script: Mutex<VecDeque<(u16, Bytes)>>,
    calls: AtomicUsize,
}

impl SequenceTransport {
    fn new(script: Vec<(u16, Bytes)>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TileTransport for SequenceTransport {
    async fn get(&self, _url: &str) -> Result<TileResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock();
        let (status, body) = if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap_or((404, Bytes::new()))
        };
        Ok(TileResponse { status, body })
    }
}

struct Rig<T: TileTransport> {
    pipeline: IngestPipeline<T>,
    sink: Arc<MemorySink>,
    metrics: Arc<IngestMetrics>,
    quarantine: Arc<Quarantine>,
    _temp: TempDir,
}

fn build_rig<T: TileTransport + 'static>(
    transport: Arc<T>,
    cache: Arc<dyn TileCache>,
    settings: FetchSettings,
) -> Rig<T> {
    let temp = TempDir::new().expect("temp dir");
    let metrics = Arc::new(IngestMetrics::new());
    let fetcher = TileFetcher::new(transport, cache, metrics.clone(), BASE_URL, settings);
    let quarantine =
        Arc::new(Quarantine::new(temp.path().join("quarantine")).expect("quarantine dir"));
    let stitcher = Stitcher::with_run_id(
        Arc::new(DiskStagingStore::new(temp.path().join("staging"), 4)),
        "integration",
    );
    let sink = Arc::new(MemorySink::new());
    let pipeline = IngestPipeline::new(
        fetcher,
        quarantine.clone(),
        stitcher,
        sink.clone(),
        metrics.clone(),
        1e-9,
    );
    Rig {
        pipeline,
        sink,
        metrics,
        quarantine,
        _temp: temp,
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

/// A feature clipped into four tiles comes back as one group.
///
/// Parcel 42 straddles the corner where four z15 tiles meet; each tile
/// carries one quarter. Parcel 7 sits wholly inside the north-west
/// tile. The stitched layer must hold exactly two groups: the four
/// quarters merged into a single polygon, and the untouched singleton.
#[tokio::test]
async fn test_fragments_across_four_tiles_dissolve_into_one_group() {
    let nw = HAMBURG;
    let ne = TileCoord::new(15, HAMBURG.x + 1, HAMBURG.y);
    let sw = TileCoord::new(15, HAMBURG.x, HAMBURG.y + 1);
    let se = TileCoord::new(15, HAMBURG.x + 1, HAMBURG.y + 1);

    // Each quarter is 1000x1000 tile pixels touching the shared corner.
    let tiles = vec![
        (
            nw,
            polygon_tile(
                "parcels",
                &[
                    (42, square_ring((3096, 3096), (4096, 4096))),
                    (7, square_ring((500, 500), (1500, 1500))),
                ],
            ),
        ),
        (
            ne,
            polygon_tile("parcels", &[(42, square_ring((0, 3096), (1000, 4096)))]),
        ),
        (
            sw,
            polygon_tile("parcels", &[(42, square_ring((3096, 0), (4096, 1000)))]),
        ),
        (
            se,
            polygon_tile("parcels", &[(42, square_ring((0, 0), (1000, 1000)))]),
        ),
    ];

    let rig = build_rig(
        Arc::new(MapTransport::new(tiles)),
        Arc::new(NoopTileCache),
        fetch_settings(0),
    );
    let area = AreaDescriptor::TileBounds {
        min_x: nw.x,
        min_y: nw.y,
        max_x: se.x,
        max_y: se.y,
    };
    let report = rig
        .pipeline
        .run(&area, 15, &[parcel_plan()], &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(report.tiles_planned, 4);
    assert_eq!(report.tiles_acquired, 4);
    assert_eq!(report.layers[0].records_decoded, 5);
    assert_eq!(report.layers[0].groups, 2);
    assert!(report.all_layers_completed());

    let groups = rig.sink.layer("parcels").expect("layer persisted");
    assert_eq!(groups.len(), 2, "expected exactly two stitched parcels");

    let merged = groups
        .iter()
        .find(|g| g.identifier == PropertyValue::Int(42))
        .expect("parcel 42");
    assert_eq!(merged.fragment_count, 4);
    assert!(
        matches!(merged.geometry, Geometry::Polygon(_)),
        "four quarters sharing edges should merge into one polygon, got {:?}",
        merged.geometry
    );
    assert_eq!(
        merged.properties.get("parcel_id"),
        Some(&PropertyValue::Int(42))
    );

    let lone = groups
        .iter()
        .find(|g| g.identifier == PropertyValue::Int(7))
        .expect("parcel 7");
    assert_eq!(lone.fragment_count, 1);
    assert!(matches!(lone.geometry, Geometry::Polygon(_)));

    // The merged square is 2000x2000 tile pixels, the lone one
    // 1000x1000 at nearly the same latitude.
    let ratio = merged.geometry.unsigned_area() / lone.geometry.unsigned_area();
    assert!(
        (ratio - 4.0).abs() < 1e-2,
        "merged area should be four times the singleton, ratio was {}",
        ratio
    );
}

/// A rectangle cut at one shared edge dissolves back to its original
/// extent, checked against the same projection the decoder uses.
#[tokio::test]
async fn test_split_rectangle_dissolves_to_original_extent() {
    let west = HAMBURG;
    let east = TileCoord::new(15, HAMBURG.x + 1, HAMBURG.y);

    // West tile holds (3000,1000)..(4096,2000), east tile continues
    // with (0,1000)..(1000,2000) across the boundary.
    let tiles = vec![
        (
            west,
            polygon_tile("parcels", &[(9, square_ring((3000, 1000), (4096, 2000)))]),
        ),
        (
            east,
            polygon_tile("parcels", &[(9, square_ring((0, 1000), (1000, 2000)))]),
        ),
    ];

    let rig = build_rig(
        Arc::new(MapTransport::new(tiles)),
        Arc::new(NoopTileCache),
        fetch_settings(0),
    );
    let area = AreaDescriptor::TileBounds {
        min_x: west.x,
        min_y: west.y,
        max_x: east.x,
        max_y: east.y,
    };
    rig.pipeline
        .run(&area, 15, &[parcel_plan()], &CancellationToken::new())
        .await
        .expect("run");

    let groups = rig.sink.layer("parcels").expect("layer persisted");
    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(group.fragment_count, 2);
    assert!(matches!(group.geometry, Geometry::Polygon(_)));

    let nw_corner = TileTransform::new(west, EXTENT).apply(3000, 1000);
    let se_corner = TileTransform::new(east, EXTENT).apply(1000, 2000);

    let rect = group.geometry.bounding_rect().expect("bounding rect");
    assert!((rect.min().x - nw_corner.x).abs() < 1e-9);
    assert!((rect.max().x - se_corner.x).abs() < 1e-9);
    assert!((rect.max().y - nw_corner.y).abs() < 1e-9);
    assert!((rect.min().y - se_corner.y).abs() < 1e-9);

    let expected_area = (se_corner.x - nw_corner.x) * (nw_corner.y - se_corner.y);
    let area_error = (group.geometry.unsigned_area() - expected_area).abs() / expected_area;
    assert!(
        area_error < 1e-6,
        "dissolved area should match the original rectangle, relative error {}",
        area_error
    );
}

/// One corrupt tile in a batch costs exactly that tile.
///
/// Three tiles in a row, the middle one serving an HTML error page
/// instead of a tile. The other two must stitch normally and the bad
/// tile must land in quarantine exactly once.
#[tokio::test]
async fn test_corrupt_tile_quarantined_while_others_deliver() {
    let left = HAMBURG;
    let middle = TileCoord::new(15, HAMBURG.x + 1, HAMBURG.y);
    let right = TileCoord::new(15, HAMBURG.x + 2, HAMBURG.y);

    let tiles = vec![
        (
            left,
            polygon_tile("parcels", &[(1, square_ring((100, 100), (900, 900)))]),
        ),
        (
            middle,
            b"<html><body>tile server error</body></html>".to_vec(),
        ),
        (
            right,
            polygon_tile("parcels", &[(2, square_ring((100, 100), (900, 900)))]),
        ),
    ];

    let rig = build_rig(
        Arc::new(MapTransport::new(tiles)),
        Arc::new(NoopTileCache),
        fetch_settings(0),
    );
    let area = AreaDescriptor::TileBounds {
        min_x: left.x,
        min_y: left.y,
        max_x: right.x,
        max_y: right.y,
    };
    let report = rig
        .pipeline
        .run(&area, 15, &[parcel_plan()], &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(report.tiles_acquired, 3);
    assert_eq!(report.layers[0].tiles_quarantined, 1);
    assert!(report.all_layers_completed());

    let groups = rig.sink.layer("parcels").expect("layer persisted");
    assert_eq!(groups.len(), 2, "the two clean tiles should both stitch");
    assert!(groups.iter().any(|g| g.identifier == PropertyValue::Int(1)));
    assert!(groups.iter().any(|g| g.identifier == PropertyValue::Int(2)));

    let entries = rig.quarantine.entries().expect("quarantine listing");
    assert_eq!(entries.len(), 1, "exactly one quarantine entry expected");
    assert_eq!(entries[0].coord, middle);
    assert_eq!(rig.metrics.snapshot().tiles_quarantined, 1);
}

/// Transient server errors retry with backoff until the payload lands.
#[tokio::test]
async fn test_transient_server_errors_retry_until_payload() {
    let coord = HAMBURG;
    let payload = polygon_tile("parcels", &[(42, square_ring((1000, 1000), (2000, 2000)))]);
    let transport = Arc::new(SequenceTransport::new(vec![
        (500, Bytes::new()),
        (500, Bytes::new()),
        (200, Bytes::from(payload)),
    ]));

    let rig = build_rig(
        transport.clone(),
        Arc::new(NoopTileCache),
        fetch_settings(3),
    );
    let area = AreaDescriptor::TileBounds {
        min_x: coord.x,
        min_y: coord.y,
        max_x: coord.x,
        max_y: coord.y,
    };
    let report = rig
        .pipeline
        .run(&area, 15, &[parcel_plan()], &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(transport.calls(), 3, "two rejected attempts plus the success");
    assert_eq!(rig.metrics.snapshot().fetch_retries, 2);
    assert_eq!(report.tiles_acquired, 1);

    let groups = rig.sink.layer("parcels").expect("layer persisted");
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].identifier, PropertyValue::Int(42));
}

/// A re-run over a cached area touches the network zero times.
#[tokio::test]
async fn test_second_run_served_entirely_from_cache() {
    let first = HAMBURG;
    let second = TileCoord::new(15, HAMBURG.x + 1, HAMBURG.y);
    let tiles = vec![
        (
            first,
            polygon_tile("parcels", &[(1, square_ring((100, 100), (900, 900)))]),
        ),
        (
            second,
            polygon_tile("parcels", &[(2, square_ring((100, 100), (900, 900)))]),
        ),
    ];

    let transport = Arc::new(MapTransport::new(tiles));
    let rig = build_rig(
        transport.clone(),
        Arc::new(MemoryTileCache::new(64)),
        fetch_settings(0),
    );
    let area = AreaDescriptor::TileBounds {
        min_x: first.x,
        min_y: first.y,
        max_x: second.x,
        max_y: second.y,
    };
    let cancel = CancellationToken::new();

    rig.pipeline
        .run(&area, 15, &[parcel_plan()], &cancel)
        .await
        .expect("first run");
    assert_eq!(transport.calls(), 2);
    assert_eq!(rig.metrics.snapshot().tiles_fetched, 2);

    rig.pipeline
        .run(&area, 15, &[parcel_plan()], &cancel)
        .await
        .expect("second run");
    assert_eq!(
        transport.calls(),
        2,
        "the cached re-run must make no network requests"
    );
    assert_eq!(rig.metrics.snapshot().tiles_from_cache, 2);

    // The re-run still persists a full result.
    assert_eq!(rig.sink.layer("parcels").expect("layer persisted").len(), 2);
}

/// A feature wholly inside one tile survives the full pipeline with its
/// coordinates untouched.
#[tokio::test]
async fn test_interior_feature_round_trips_exactly() {
    let coord = HAMBURG;
    let tiles = vec![(
        coord,
        polygon_tile("parcels", &[(42, square_ring((1000, 1000), (2000, 2000)))]),
    )];

    let rig = build_rig(
        Arc::new(MapTransport::new(tiles)),
        Arc::new(NoopTileCache),
        fetch_settings(0),
    );
    let area = AreaDescriptor::TileBounds {
        min_x: coord.x,
        min_y: coord.y,
        max_x: coord.x,
        max_y: coord.y,
    };
    rig.pipeline
        .run(&area, 15, &[parcel_plan()], &CancellationToken::new())
        .await
        .expect("run");

    let groups = rig.sink.layer("parcels").expect("layer persisted");
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].fragment_count, 1);

    // The decoder projects the ring in reverse to restore CCW winding;
    // no repair or union runs for a lone valid fragment, so the output
    // must be exactly the projected input.
    let transform = TileTransform::new(coord, EXTENT);
    let expected = Polygon::new(
        LineString::new(vec![
            transform.apply(1000, 2000),
            transform.apply(2000, 2000),
            transform.apply(2000, 1000),
            transform.apply(1000, 1000),
        ]),
        vec![],
    );
    assert_eq!(groups[0].geometry, Geometry::Polygon(expected));
}
