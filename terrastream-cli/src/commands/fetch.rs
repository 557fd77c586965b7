//! Area prefetch into the disk cache.

use clap::Args;
use terrastream::coord::{lat_to_tile_y, lon_to_tile_x};
use terrastream::TileId;

use super::common::{build_services, EndpointArgs};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Center latitude in degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lat: f64,

    /// Center longitude in degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lon: f64,

    /// Zoom level to fetch
    #[arg(long, default_value_t = 10)]
    pub zoom: u8,

    /// Tiles fetched in each direction around the center
    #[arg(long, default_value_t = 2)]
    pub radius: u32,

    #[command(flatten)]
    pub endpoints: EndpointArgs,
}

pub fn run(args: FetchArgs) -> Result<(), CliError> {
    let (imagery, elevation) = build_services(&args.endpoints)?;

    let center_x = lon_to_tile_x(args.lon, args.zoom)?;
    let center_y = lat_to_tile_y(args.lat, args.zoom)?;
    let n = 1u32 << args.zoom;

    let x_range = center_x.saturating_sub(args.radius)..=(center_x + args.radius).min(n - 1);
    let y_range = center_y.saturating_sub(args.radius)..=(center_y + args.radius).min(n - 1);

    let mut fetched = 0usize;
    let mut failed = 0usize;

    for x in x_range {
        for y in y_range.clone() {
            let tile = TileId::new(args.zoom, x, y)?;
            let imagery_ok = imagery.get_tile_sync(tile).is_some();
            let elevation_ok = elevation.get_tile_sync(tile).is_some();
            if imagery_ok && elevation_ok {
                fetched += 1;
            } else {
                failed += 1;
                println!("failed {tile}");
            }
        }
    }

    println!("fetched {fetched} tiles, {failed} failed");
    print_service("imagery", &imagery);
    print_service("elevation", &elevation);
    Ok(())
}

fn print_service(name: &str, service: &terrastream::TileService) {
    let m = service.metrics();
    println!(
        "{name}: {} downloads, {} disk hits, {} failures",
        m.downloads_ok,
        m.disk_hits,
        m.download_failures + m.decode_failures
    );
}
