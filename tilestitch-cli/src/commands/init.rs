//! Init command - create the configuration file.

use tilestitch::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Run the init command.
pub fn run() -> Result<(), CliError> {
    let path = config_file_path();
    if path.exists() {
        println!("Configuration file already exists: {}", path.display());
        println!();
        println!("Edit this file to change TileStitch settings.");
        return Ok(());
    }

    ConfigFile::default()
        .save()
        .map_err(|e| CliError::Config(format!("could not write {}: {}", path.display(), e)))?;

    println!("Configuration file created: {}", path.display());
    println!();
    println!("Set source.base_url and add a [layer:<name>] section per layer,");
    println!("then run 'tilestitch ingest' to start ingesting.");
    println!("CLI arguments override config file values when specified.");
    Ok(())
}
