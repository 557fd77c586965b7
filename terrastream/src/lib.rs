//! Terrastream - streaming terrain tiles with level-of-detail selection
//!
//! This library fetches raster map tiles (imagery + elevation) from remote
//! slippy-tile services without blocking the render loop, caches them in
//! two tiers (decoded images, then GPU textures via a caller-supplied
//! uploader), and decides every frame which tiles to draw at which
//! resolution, substituting coarser ancestor data while downloads are in
//! flight.
//!
//! The typical consumer builds a [`Terrain`] once and calls
//! [`Terrain::select_tiles`] per frame:
//!
//! ```ignore
//! use terrastream::{
//!     ServiceConfig, Terrain, TerrainConfig, TileCache, TileEndpoint, TileId,
//!     TileService, UrlPattern,
//! };
//!
//! let imagery = TileService::new(
//!     ServiceConfig::new(TileEndpoint::new(imagery_url, UrlPattern::ZyxYSouth, "")),
//!     http_client.clone(),
//! );
//! let elevation = TileService::new(
//!     ServiceConfig::new(TileEndpoint::new(dem_url, UrlPattern::ZxyYSouth, "png")),
//!     http_client,
//! );
//! let cache = TileCache::new(imagery, elevation, my_gl_uploader);
//! let root = TileId::new(7, 68, 44)?;
//! let mut terrain = Terrain::new(TerrainConfig::new(root, world_bounds), cache);
//!
//! // per frame
//! for draw in terrain.select_tiles(focus, altitude, |node| frustum.contains(node)) {
//!     renderer.draw_tile(draw.rect, draw.imagery, draw.elevation);
//! }
//! ```

pub mod cache;
pub mod coord;
pub mod geom;
pub mod pool;
pub mod provider;
pub mod quadtree;
pub mod service;
pub mod terrain;

pub use cache::{TextureUploader, TileCache, TileKind, ELEVATION_ZOOM};
pub use coord::{CoordError, Coordinate, TileId, MAX_ZOOM};
pub use geom::Bounds;
pub use provider::{HttpClient, ProviderError, ReqwestClient, TileEndpoint, UrlPattern};
pub use quadtree::{Node, NodeId, QuadTree};
pub use service::{ServiceConfig, TileService};
pub use terrain::{Terrain, TerrainConfig, TileDraw};
