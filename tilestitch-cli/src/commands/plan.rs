//! Plan command - enumerate the tiles an area covers, without fetching.

use clap::Args;

use tilestitch::plan::plan;

use crate::commands::common::{self, AreaArgs};
use crate::error::CliError;

/// Arguments for the plan command.
#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub area: AreaArgs,
}

/// Run the plan command.
pub fn run(args: PlanArgs) -> Result<(), CliError> {
    let area = common::parse_area(&args.area)?;
    let tiles = plan(&area, args.area.zoom);

    println!("Tile Plan");
    println!("=========");
    println!();

    // Row-major order puts the minimum x and y on the first tile and the
    // maximum on the last.
    let (Some(first), Some(last)) = (tiles.first(), tiles.last()) else {
        println!("No tiles cover the given area at zoom {}.", args.area.zoom);
        return Ok(());
    };

    let columns = last.x - first.x + 1;
    let rows = last.y - first.y + 1;

    println!("Zoom:    {}", args.area.zoom);
    println!("Tiles:   {} ({} x {})", tiles.len(), columns, rows);
    println!("X range: {}..{}", first.x, last.x);
    println!("Y range: {}..{}", first.y, last.y);

    Ok(())
}
