//! Common argument types and helpers shared across CLI commands.

use std::path::{Path, PathBuf};

use clap::Args;

use tilestitch::config::ConfigFile;
use tilestitch::plan::AreaDescriptor;

use crate::error::CliError;

/// Area selection shared by the ingest and plan commands: a zoom level
/// plus exactly one of --bbox, --tiles or --center.
#[derive(Debug, Args)]
pub struct AreaArgs {
    /// Zoom level (0-22)
    #[arg(short, long)]
    pub zoom: u8,

    /// Geographic bounding box: min_lon,min_lat,max_lon,max_lat
    #[arg(long, value_name = "W,S,E,N", allow_hyphen_values = true)]
    pub bbox: Option<String>,

    /// Tile-index bounds at the target zoom: min_x,min_y,max_x,max_y
    #[arg(long, value_name = "X0,Y0,X1,Y1", conflicts_with = "bbox")]
    pub tiles: Option<String>,

    /// Tile grid centered on a point: lat,lon,width,height
    #[arg(
        long,
        value_name = "LAT,LON,W,H",
        allow_hyphen_values = true,
        conflicts_with_all = ["bbox", "tiles"]
    )]
    pub center: Option<String>,
}

/// Convert the one area argument into an [`AreaDescriptor`].
pub fn parse_area(args: &AreaArgs) -> Result<AreaDescriptor, CliError> {
    if let Some(ref bbox) = args.bbox {
        let v = parse_numbers::<f64>(bbox, "--bbox")?;
        return Ok(AreaDescriptor::Bbox {
            min_lon: v[0],
            min_lat: v[1],
            max_lon: v[2],
            max_lat: v[3],
        });
    }
    if let Some(ref tiles) = args.tiles {
        let v = parse_numbers::<u32>(tiles, "--tiles")?;
        return Ok(AreaDescriptor::TileBounds {
            min_x: v[0],
            min_y: v[1],
            max_x: v[2],
            max_y: v[3],
        });
    }
    if let Some(ref center) = args.center {
        let parts: Vec<&str> = center.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(CliError::Config(format!(
                "--center expects lat,lon,width,height, got '{}'",
                center
            )));
        }
        return Ok(AreaDescriptor::CenterGrid {
            lat: parse_one(parts[0], "--center")?,
            lon: parse_one(parts[1], "--center")?,
            width: parse_one(parts[2], "--center")?,
            height: parse_one(parts[3], "--center")?,
        });
    }
    Err(CliError::Config(
        "No area given. Pass one of --bbox, --tiles or --center.".to_string(),
    ))
}

/// Load configuration, from an explicit path when given.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    let config = match path {
        Some(path) => ConfigFile::load_from(&expand_path(path.to_path_buf()))?,
        None => ConfigFile::load()?,
    };
    Ok(config)
}

/// Parse four comma-separated values of one numeric type.
fn parse_numbers<T: std::str::FromStr>(value: &str, flag: &str) -> Result<Vec<T>, CliError> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(CliError::Config(format!(
            "{} expects 4 comma-separated values, got '{}'",
            flag, value
        )));
    }
    parts.iter().map(|p| parse_one(p, flag)).collect()
}

fn parse_one<T: std::str::FromStr>(part: &str, flag: &str) -> Result<T, CliError> {
    part.parse()
        .map_err(|_| CliError::Config(format!("{}: '{}' is not a valid number", flag, part)))
}

/// Expand a leading ~ so quoted paths behave like paths in the config
/// file.
pub fn expand_path(path: PathBuf) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path
}
