//! Headless streaming simulation.
//!
//! Drives the per-frame selection loop without a renderer: the focus point
//! sweeps across the terrain footprint while the draw list, fallback and
//! cache behavior are reported. Useful for eyeballing streaming behavior
//! against a live tile server.

use std::time::{Duration, Instant};

use clap::Args;
use glam::Vec2;
use terrastream::{Bounds, Terrain, TerrainConfig, TileId};

use super::common::{build_cache, EndpointArgs};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Root tile as zoom,x,y
    #[arg(long, default_value = "7,68,44")]
    pub root: String,

    /// Number of frames to run
    #[arg(long, default_value_t = 120)]
    pub frames: u32,

    /// Frame interval in milliseconds
    #[arg(long, default_value_t = 100)]
    pub interval_ms: u64,

    /// Zoom levels below the root
    #[arg(long, default_value_t = 3)]
    pub lod_levels: u8,

    #[command(flatten)]
    pub endpoints: EndpointArgs,
}

fn parse_root(value: &str) -> Result<TileId, CliError> {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != 3 {
        return Err(CliError::Input(format!(
            "root must be zoom,x,y (got {value:?})"
        )));
    }
    let zoom = parts[0]
        .trim()
        .parse::<u8>()
        .map_err(|e| CliError::Input(format!("bad zoom: {e}")))?;
    let x = parts[1]
        .trim()
        .parse::<u32>()
        .map_err(|e| CliError::Input(format!("bad x: {e}")))?;
    let y = parts[2]
        .trim()
        .parse::<u32>()
        .map_err(|e| CliError::Input(format!("bad y: {e}")))?;
    Ok(TileId::new(zoom, x, y)?)
}

pub fn run(args: SimulateArgs) -> Result<(), CliError> {
    let root = parse_root(&args.root)?;
    let world = Bounds::new(Vec2::new(-500.0, -500.0), Vec2::new(500.0, 500.0));

    println!("warming up root {root}...");
    let start = Instant::now();
    let cache = build_cache(&args.endpoints)?;
    let mut terrain = Terrain::new(
        TerrainConfig::new(root, world).with_lod_levels(args.lod_levels),
        cache,
    );
    println!("warm-up took {:.1?}", start.elapsed());

    for frame in 0..args.frames {
        // Sweep the focus diagonally across the footprint and back.
        let t = frame as f32 / args.frames.max(1) as f32;
        let sweep = (t * 2.0 * std::f32::consts::PI).sin();
        let focus = world.center() + world.size() * 0.45 * sweep;

        let draws = terrain.select_tiles(focus, 0.0, |_| true);

        if frame % 10 == 0 {
            let stats = terrain.selection_stats();
            let imagery = terrain.cache().imagery_service().metrics();
            println!(
                "frame {frame:4}: {} draws, focus ({:6.1}, {:6.1}), \
                 exact {} / fallback {} / skipped {}, \
                 imagery in-flight {}, downloads {}",
                draws.len(),
                focus.x,
                focus.y,
                stats.exact_hits,
                stats.fallbacks,
                stats.skipped,
                imagery.in_flight,
                imagery.downloads_ok,
            );
        }

        std::thread::sleep(Duration::from_millis(args.interval_ms));
    }

    let stats = terrain.selection_stats();
    println!("\nselection totals:");
    println!("  leaves considered: {}", stats.leaves_considered);
    println!("  exact hits:        {}", stats.exact_hits);
    println!("  fallbacks:         {}", stats.fallbacks);
    println!("  skipped:           {}", stats.skipped);
    for (delta, count) in stats.fallbacks_by_delta.iter().enumerate() {
        if *count > 0 {
            println!("  fallback depth {delta}: {count}");
        }
    }

    let imagery = terrain.cache().imagery_service().metrics();
    let elevation = terrain.cache().elevation_service().metrics();
    println!("imagery:   {imagery:?}");
    println!("elevation: {elevation:?}");
    Ok(())
}
