//! Terrastream CLI
//!
//! Headless tools around the terrastream library: prefetching tiles into
//! the disk cache, probing elevation data, and simulating the per-frame
//! streaming loop without a renderer.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "terrastream", version, about = "Streaming terrain tile tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Prefetch an area of tiles into the disk cache
    Fetch(commands::fetch::FetchArgs),
    /// Print the terrain elevation at a coordinate
    Elevation(commands::elevation::ElevationArgs),
    /// Run a headless streaming simulation and report cache behavior
    Simulate(commands::simulate::SimulateArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Fetch(args) => commands::fetch::run(args),
        Command::Elevation(args) => commands::elevation::run(args),
        Command::Simulate(args) => commands::simulate::run(args),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
