//! Shared pieces for the subcommands: default endpoints, cache wiring and
//! a uploader that only hands out handles.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use image::RgbaImage;

use terrastream::{
    ReqwestClient, ServiceConfig, TextureUploader, TileCache, TileEndpoint, TileService,
    UrlPattern,
};

use crate::error::CliError;

/// Public imagery source used when none is given.
pub const DEFAULT_IMAGERY_URL: &str =
    "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile";

/// Public elevation source used when none is given.
pub const DEFAULT_ELEVATION_URL: &str = "https://s3.amazonaws.com/elevation-tiles-prod/terrarium";

/// Endpoint options shared by all subcommands.
#[derive(Debug, Args)]
pub struct EndpointArgs {
    /// Imagery tile server base URL
    #[arg(long, default_value = DEFAULT_IMAGERY_URL)]
    pub imagery_url: String,

    /// Imagery URL layout
    #[arg(long, default_value = "zyx-y-south")]
    pub imagery_pattern: String,

    /// Imagery file extension (empty for bare paths)
    #[arg(long, default_value = "")]
    pub imagery_ext: String,

    /// Elevation tile server base URL
    #[arg(long, default_value = DEFAULT_ELEVATION_URL)]
    pub elevation_url: String,

    /// Elevation URL layout
    #[arg(long, default_value = "zxy-y-south")]
    pub elevation_pattern: String,

    /// Elevation file extension
    #[arg(long, default_value = "png")]
    pub elevation_ext: String,

    /// Disk cache directory (defaults to the user cache dir)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

pub fn parse_pattern(name: &str) -> Result<UrlPattern, CliError> {
    match name {
        "zxy-y-south" => Ok(UrlPattern::ZxyYSouth),
        "zxy-y-north" => Ok(UrlPattern::ZxyYNorth),
        "zyx-y-south" => Ok(UrlPattern::ZyxYSouth),
        "zyx-y-north" => Ok(UrlPattern::ZyxYNorth),
        other => Err(CliError::Input(format!(
            "unknown URL pattern {other:?} (expected zxy-y-south, zxy-y-north, zyx-y-south or zyx-y-north)"
        ))),
    }
}

fn cache_dir(args: &EndpointArgs, kind: &str) -> Option<PathBuf> {
    args.cache_dir
        .clone()
        .or_else(|| dirs::cache_dir().map(|d| d.join("terrastream")))
        .map(|d| d.join(kind))
}

/// Builds the two tile services from the endpoint options.
pub fn build_services(args: &EndpointArgs) -> Result<(TileService, TileService), CliError> {
    let http = Arc::new(ReqwestClient::new()?);

    let imagery_endpoint = TileEndpoint::new(
        &args.imagery_url,
        parse_pattern(&args.imagery_pattern)?,
        &args.imagery_ext,
    );
    let mut imagery_config = ServiceConfig::new(imagery_endpoint);
    if let Some(dir) = cache_dir(args, "imagery") {
        imagery_config = imagery_config.with_cache_dir(dir);
    }

    let elevation_endpoint = TileEndpoint::new(
        &args.elevation_url,
        parse_pattern(&args.elevation_pattern)?,
        &args.elevation_ext,
    );
    let mut elevation_config = ServiceConfig::new(elevation_endpoint);
    if let Some(dir) = cache_dir(args, "elevation") {
        elevation_config = elevation_config.with_cache_dir(dir);
    }

    Ok((
        TileService::new(imagery_config, Arc::clone(&http) as Arc<dyn terrastream::HttpClient>),
        TileService::new(elevation_config, http),
    ))
}

/// Uploader for headless runs: hands out sequential handles and drops the
/// pixels.
pub struct HandleCounter {
    next: u64,
}

impl HandleCounter {
    pub fn new() -> Self {
        Self { next: 0 }
    }
}

impl TextureUploader for HandleCounter {
    type Handle = u64;

    fn upload(&mut self, _image: &RgbaImage) -> u64 {
        let handle = self.next;
        self.next += 1;
        handle
    }
}

/// Builds a full cache with the headless uploader.
pub fn build_cache(args: &EndpointArgs) -> Result<TileCache<HandleCounter>, CliError> {
    let (imagery, elevation) = build_services(args)?;
    Ok(TileCache::new(imagery, elevation, HandleCounter::new()))
}
