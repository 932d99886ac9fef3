//! Cache management CLI commands.

use clap::Subcommand;
use tilestitch::cache::{format_size, DiskTileCache};
use tilestitch::config::ConfigFile;

use crate::error::CliError;

/// Cache subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show the tile count and size of the disk cache
    Stats,

    /// Delete all cached tiles
    Clear,
}

/// Run a cache subcommand.
pub fn run(action: CacheAction) -> Result<(), CliError> {
    match action {
        CacheAction::Stats => run_stats(),
        CacheAction::Clear => run_clear(),
    }
}

/// Open the disk cache at the configured location.
fn open_cache() -> Result<DiskTileCache, String> {
    let config = ConfigFile::load().map_err(|e| e.to_string())?;
    DiskTileCache::new(config.cache.directory).map_err(|e| e.to_string())
}

/// Show cache statistics.
fn run_stats() -> Result<(), CliError> {
    let cache = open_cache().map_err(CliError::CacheStats)?;
    let stats = cache
        .stats()
        .map_err(|e| CliError::CacheStats(e.to_string()))?;

    println!("Tile Cache");
    println!("==========");
    println!();
    println!("Location: {}", cache.root().display());
    println!("Tiles:    {}", stats.entries);
    println!("Size:     {}", format_size(stats.bytes));
    Ok(())
}

/// Clear the cache.
fn run_clear() -> Result<(), CliError> {
    let cache = open_cache().map_err(CliError::CacheClear)?;
    let removed = cache
        .clear()
        .map_err(|e| CliError::CacheClear(e.to_string()))?;

    println!(
        "Removed {} cached tiles from {}",
        removed,
        cache.root().display()
    );
    Ok(())
}
