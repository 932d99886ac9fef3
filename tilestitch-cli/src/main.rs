//! TileStitch CLI.
//!
//! Command-line interface to the tilestitch library: run ingests, manage
//! the configuration file, and inspect the tile cache.

mod commands;
mod error;

use clap::{Parser, Subcommand};

use commands::{cache, config, ingest, init, plan};

#[derive(Parser)]
#[command(name = "tilestitch")]
#[command(version = tilestitch::VERSION)]
#[command(about = "Fetch, decode and stitch vector map tiles into seamless layers")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an ingest: plan, fetch, decode, repair, stitch, write
    Ingest(ingest::IngestArgs),

    /// Enumerate the tiles an area covers, without fetching anything
    Plan(plan::PlanArgs),

    /// Create the configuration file with default settings
    Init,

    /// View configuration settings
    Config {
        #[command(subcommand)]
        action: config::ConfigAction,
    },

    /// Inspect or clear the tile cache
    Cache {
        #[command(subcommand)]
        action: cache::CacheAction,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Ingest(args) => ingest::run(args),
        Commands::Plan(args) => plan::run(args),
        Commands::Init => init::run(),
        Commands::Config { action } => config::run(action),
        Commands::Cache { action } => cache::run(action),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
