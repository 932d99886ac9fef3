//! Quarantine store for malformed tiles.
//!
//! A tile that fails decoding is not discarded: its exact bytes land in
//! the quarantine directory next to a small sidecar naming the reason,
//! keyed by coordinate. That preserves the evidence for offline
//! inspection and lets a later run overwrite the entry if the source
//! starts serving the tile correctly.

use crate::coord::TileCoord;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;

const PAYLOAD_EXTENSION: &str = "pbf";
const REASON_SUFFIX: &str = "error.txt";

/// Filename stem for one quarantined tile, stable per coordinate.
fn quarantine_stem(coord: TileCoord) -> String {
    format!("z{}_x{}_y{}", coord.zoom, coord.x, coord.y)
}

fn stem_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^z(\d+)_x(\d+)_y(\d+)$").unwrap())
}

/// One quarantined tile as listed from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantineEntry {
    pub coord: TileCoord,
    pub reason: String,
}

/// Directory-backed quarantine.
pub struct Quarantine {
    dir: PathBuf,
}

impl Quarantine {
    /// Opens (and creates if missing) the quarantine directory.
    pub fn new(dir: PathBuf) -> io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Stores a tile's bytes and the reason it was set aside.
    ///
    /// A second quarantine of the same coordinate replaces the first.
    pub fn record(&self, coord: TileCoord, bytes: &[u8], reason: &str) -> io::Result<()> {
        let stem = quarantine_stem(coord);
        self.write_replace(&format!("{}.{}", stem, PAYLOAD_EXTENSION), bytes)?;

        let sidecar = format!(
            "tile: {}\nwhen: {}\nreason: {}\n",
            coord,
            chrono::Utc::now().to_rfc3339(),
            reason
        );
        self.write_replace(&format!("{}.{}", stem, REASON_SUFFIX), sidecar.as_bytes())?;

        warn!(tile = %coord, reason = reason, "tile quarantined");
        Ok(())
    }

    // Temp name then rename, so a crash mid-write cannot leave a truncated
    // payload sitting where evidence is expected.
    fn write_replace(&self, name: &str, contents: &[u8]) -> io::Result<()> {
        let tmp = self
            .dir
            .join(format!("{}.tmp{}", name, std::process::id()));
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, self.dir.join(name))
    }

    /// Lists quarantined tiles, sorted by coordinate.
    pub fn entries(&self) -> io::Result<Vec<QuarantineEntry>> {
        let mut entries = Vec::new();
        for dir_entry in std::fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(&format!(".{}", REASON_SUFFIX)) else {
                continue;
            };
            let Some(coord) = parse_stem(stem) else {
                continue;
            };
            let reason = std::fs::read_to_string(&path)?
                .lines()
                .find_map(|line| line.strip_prefix("reason: ").map(String::from))
                .unwrap_or_default();
            entries.push(QuarantineEntry { coord, reason });
        }
        entries.sort_by_key(|e| e.coord);
        Ok(entries)
    }

    /// Path of the quarantined payload for one coordinate, if present.
    pub fn payload_path(&self, coord: TileCoord) -> Option<PathBuf> {
        let path = self.dir.join(format!(
            "{}.{}",
            quarantine_stem(coord),
            PAYLOAD_EXTENSION
        ));
        path.is_file().then_some(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn parse_stem(stem: &str) -> Option<TileCoord> {
    let captures = stem_pattern().captures(stem)?;
    let zoom: u8 = captures[1].parse().ok()?;
    let x: u32 = captures[2].parse().ok()?;
    let y: u32 = captures[3].parse().ok()?;
    Some(TileCoord::new(zoom, x, y))
}
