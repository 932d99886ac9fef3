//! Configuration inspection CLI commands.
//!
//! Provides `config show` and `config path` for viewing the effective
//! configuration from the command line.

use clap::Subcommand;
use tilestitch::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration, defaults included
    Show,

    /// Show the configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(action: ConfigAction) -> Result<(), CliError> {
    match action {
        ConfigAction::Show => run_show(),
        ConfigAction::Path => run_path(),
    }
}

/// Print every setting the way it would apply to a run.
fn run_show() -> Result<(), CliError> {
    let config = ConfigFile::load()?;

    println!("Configuration Settings");
    println!("======================");
    println!();
    println!("[source]");
    println!(
        "  base_url = {}",
        config.source.base_url.as_deref().unwrap_or("(not set)")
    );
    println!();
    println!("[fetch]");
    println!("  max_concurrent = {}", config.fetch.max_concurrent);
    println!(
        "  request_timeout_secs = {}",
        config.fetch.request_timeout_secs
    );
    println!("  max_retries = {}", config.fetch.max_retries);
    println!(
        "  retry_base_delay_ms = {}",
        config.fetch.retry_base_delay_ms
    );
    println!(
        "  politeness_delay_ms = {}",
        config.fetch.politeness_delay_ms
    );
    println!();
    println!("[cache]");
    println!("  directory = {}", config.cache.directory.display());
    println!("  memory_tiles = {}", config.cache.memory_tiles);
    println!();
    println!("[quarantine]");
    println!("  directory = {}", config.quarantine.directory.display());
    println!();
    println!("[staging]");
    println!("  directory = {}", config.staging.directory.display());
    println!("  partitions = {}", config.staging.partitions);
    println!();
    println!("[repair]");
    println!("  snap_tolerance = {}", config.repair.snap_tolerance);
    println!();
    println!("[output]");
    println!("  directory = {}", config.output.directory.display());
    println!();
    println!("[logging]");
    println!("  directory = {}", config.logging.directory.display());

    for plan in &config.layers {
        println!();
        println!("[layer:{}]", plan.name);
        println!("  geometry = {}", plan.geometry);
        println!(
            "  identifier = {}",
            plan.identifier_column.as_deref().unwrap_or("(whole layer)")
        );
        if !plan.known_columns.is_empty() {
            println!("  known_columns = {}", plan.known_columns.join(", "));
        }
        if !plan.integer_fields.is_empty() {
            println!("  integer_fields = {}", plan.integer_fields.join(", "));
        }
        if !plan.string_fields.is_empty() {
            println!("  string_fields = {}", plan.string_fields.join(", "));
        }
        for (column, rule) in &plan.aggregates {
            println!("  aggregate.{} = {}", column, rule.name());
        }
        let mut fields: Vec<&String> = plan.remap.keys().collect();
        fields.sort();
        for field in fields {
            println!("  remap.{} = {} corrections", field, plan.remap[field].len());
        }
    }

    Ok(())
}

/// Show the configuration file path.
fn run_path() -> Result<(), CliError> {
    println!("{}", config_file_path().display());
    Ok(())
}
