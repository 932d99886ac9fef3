//! Ingest command - run the full tile ingestion pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tilestitch::cache::{format_size, TieredTileCache};
use tilestitch::config::ConfigFile;
use tilestitch::fetch::{ReqwestTransport, TileFetcher};
use tilestitch::layer::LayerPlan;
use tilestitch::logging::{init_logging, DEFAULT_LOG_FILE};
use tilestitch::pipeline::IngestPipeline;
use tilestitch::quarantine::Quarantine;
use tilestitch::sink::GeoJsonSink;
use tilestitch::stitch::{DiskStagingStore, Stitcher};
use tilestitch::telemetry::IngestMetrics;

use crate::commands::common::{self, AreaArgs};
use crate::error::CliError;

/// Arguments for the ingest command.
#[derive(Debug, Args)]
pub struct IngestArgs {
    #[command(flatten)]
    pub area: AreaArgs,

    /// Tile source base URL (overrides config)
    #[arg(long)]
    pub url: Option<String>,

    /// Output directory for stitched layers (overrides config)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Ingest only this layer; repeat for several (default: all configured)
    #[arg(long = "layer", value_name = "NAME")]
    pub layers: Vec<String>,

    /// Use an alternate configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Run the ingest command.
pub fn run(args: IngestArgs) -> Result<(), CliError> {
    let config = common::load_config(args.config.as_deref())?;

    // Resolve settings from CLI and config; CLI wins
    let base_url = resolve_base_url(args.url.clone(), &config)?;
    let plans = resolve_layers(&args.layers, &config)?;
    let area = common::parse_area(&args.area)?;
    let zoom = args.area.zoom;
    let output_dir = args
        .output
        .clone()
        .map(common::expand_path)
        .unwrap_or_else(|| config.output.directory.clone());

    let _logging =
        init_logging(&config.logging.directory, DEFAULT_LOG_FILE).map_err(CliError::Logging)?;

    info!(
        version = tilestitch::VERSION,
        zoom,
        layers = plans.len(),
        "ingest run starting"
    );

    // Assemble the pipeline
    let metrics = Arc::new(IngestMetrics::new());
    let transport = ReqwestTransport::new(config.fetch.request_timeout_secs)
        .map_err(|e| CliError::Ingest(format!("failed to build HTTP client: {}", e)))?;
    let cache = TieredTileCache::new(config.cache.directory.clone(), config.cache.memory_tiles)
        .map_err(|e| CliError::Ingest(format!("failed to open tile cache: {}", e)))?;
    let fetcher = TileFetcher::new(
        Arc::new(transport),
        Arc::new(cache),
        Arc::clone(&metrics),
        base_url.clone(),
        config.fetch.clone(),
    );
    let quarantine = Arc::new(
        Quarantine::new(config.quarantine.directory.clone())
            .map_err(|e| CliError::Ingest(format!("failed to open quarantine: {}", e)))?,
    );
    let staging = Arc::new(DiskStagingStore::new(
        config.staging.directory.clone(),
        config.staging.partitions,
    ));
    let stitcher = Stitcher::new(staging);
    let sink = Arc::new(GeoJsonSink::new(output_dir.clone()));
    let pipeline = IngestPipeline::new(
        fetcher,
        quarantine,
        stitcher,
        sink,
        Arc::clone(&metrics),
        config.repair.snap_tolerance,
    );

    // Print banner
    let layer_names: Vec<&str> = plans.iter().map(|p| p.name.as_str()).collect();
    println!("TileStitch Ingest v{}", tilestitch::VERSION);
    println!("=====================");
    println!();
    println!("Source: {}", base_url);
    println!("Zoom:   {}", zoom);
    println!("Layers: {}", layer_names.join(", "));
    println!("Output: {}", output_dir.display());
    println!();
    println!("Press Ctrl+C to cancel");
    println!();

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::Ingest(format!("failed to start runtime: {}", e)))?;

    let report = runtime
        .block_on(async {
            let cancel = CancellationToken::new();

            // Ctrl+C cancels the run; in-flight work drains and staging
            // is cleaned up before run() returns.
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    println!();
                    println!("Received shutdown signal, cancelling run...");
                    signal_cancel.cancel();
                }
            });

            // Periodic progress line while the run is going
            let progress_metrics = Arc::clone(&metrics);
            let progress_done = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(10));
                // The first tick completes immediately; swallow it
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = progress_done.cancelled() => break,
                        _ = ticker.tick() => {
                            let snapshot = progress_metrics.snapshot();
                            if snapshot.tiles_obtained() > 0 {
                                println!(
                                    "[{}s] tiles: {} fetched, {} cached, {} failed | records: {} | {}",
                                    snapshot.uptime.as_secs(),
                                    snapshot.tiles_fetched,
                                    snapshot.tiles_from_cache,
                                    snapshot.tiles_failed,
                                    snapshot.features_decoded,
                                    format_size(snapshot.bytes_downloaded),
                                );
                            }
                        }
                    }
                }
            });

            let result = pipeline.run(&area, zoom, &plans, &cancel).await;
            // Stop the helper tasks once the run is over
            cancel.cancel();
            result
        })
        .map_err(|e| CliError::Ingest(e.to_string()))?;

    println!();
    print!("{}", report);

    let snapshot = metrics.snapshot();
    if snapshot.tiles_obtained() > 0 {
        println!();
        println!("Run Summary");
        println!("───────────");
        println!(
            "  Tiles: {} fetched, {} cached, {} absent, {} failed",
            snapshot.tiles_fetched,
            snapshot.tiles_from_cache,
            snapshot.tiles_absent,
            snapshot.tiles_failed
        );
        println!("  Retries:     {}", snapshot.fetch_retries);
        println!("  Downloaded:  {}", format_size(snapshot.bytes_downloaded));
        println!(
            "  Quarantined: {} ({:.1}%)",
            snapshot.tiles_quarantined,
            snapshot.quarantine_rate() * 100.0
        );
        println!(
            "  Records staged: {}, groups written: {}",
            snapshot.records_staged, snapshot.groups_stitched
        );
    }

    if !report.all_layers_completed() && !report.cancelled {
        println!();
        println!("One or more layers failed; see the log for details.");
    }

    Ok(())
}

/// Pick the tile source URL: CLI argument over config.
fn resolve_base_url(cli: Option<String>, config: &ConfigFile) -> Result<String, CliError> {
    cli.map(|u| u.trim_end_matches('/').to_string())
        .or_else(|| config.source.base_url.clone())
        .ok_or_else(|| {
            CliError::Config(
                "No tile source configured. Set source.base_url in config.ini or pass --url."
                    .to_string(),
            )
        })
}

/// Select the layer plans for this run: all configured layers, or the
/// requested subset.
fn resolve_layers(requested: &[String], config: &ConfigFile) -> Result<Vec<LayerPlan>, CliError> {
    if config.layers.is_empty() {
        return Err(CliError::Config(
            "No layers configured. Add a [layer:<name>] section to config.ini.".to_string(),
        ));
    }
    if requested.is_empty() {
        return Ok(config.layers.clone());
    }

    let mut plans = Vec::with_capacity(requested.len());
    for name in requested {
        match config.layers.iter().find(|p| p.name == *name) {
            Some(plan) => plans.push(plan.clone()),
            None => {
                return Err(CliError::Config(format!(
                    "Layer '{}' is not configured. Add a [layer:{}] section to config.ini.",
                    name, name
                )))
            }
        }
    }
    Ok(plans)
}
