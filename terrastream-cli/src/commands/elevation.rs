//! Elevation probe for a single coordinate.

use clap::Args;
use terrastream::Coordinate;

use super::common::{build_cache, EndpointArgs};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct ElevationArgs {
    /// Latitude in degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lat: f64,

    /// Longitude in degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lon: f64,

    /// Meters spanned by the normalized elevation encoding
    #[arg(long, default_value_t = terrastream::terrain::DEFAULT_ELEVATION_RANGE)]
    pub elevation_range: f32,

    #[command(flatten)]
    pub endpoints: EndpointArgs,
}

pub fn run(args: ElevationArgs) -> Result<(), CliError> {
    let cache = build_cache(&args.endpoints)?;
    let coord = Coordinate::new(args.lat, args.lon);

    let normalized = cache.elevation(coord)?;
    println!(
        "elevation at {coord}: {:.1} m (normalized {normalized:.4})",
        normalized * args.elevation_range
    );
    Ok(())
}
