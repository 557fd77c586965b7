//! Render-time tile selection with ancestor fallback.
//!
//! [`Terrain`] is the facade the render loop talks to. Once per frame it
//! rebuilds the LOD quadtree around a focus point, maps every visible leaf
//! to an imagery and an elevation texture, and returns the result as a draw
//! list. When a leaf's own tile has not finished downloading, the leaf is
//! rendered from the nearest resident ancestor with a cropped UV rectangle;
//! the exact-resolution download proceeds in the background and wins on a
//! later frame.
//!
//! Leaves are emitted sorted by descending depth. Fine tiles therefore hit
//! the download queue first, and since the queue is a LIFO stack the tiles
//! that matter for the current frame are also the first to start
//! downloading.

use glam::Vec2;
use tracing::{debug, warn};

use crate::cache::{TextureUploader, TileCache, TileKind};
use crate::coord::{self, CoordError, Coordinate, TileId, MAX_ZOOM};
use crate::geom::{map_range, Bounds};
use crate::quadtree::{Node, NodeId, QuadTree};

/// Default number of zoom levels spanned below the root tile.
pub const DEFAULT_LOD_LEVELS: u8 = 7;

/// Default elevation range in meters: normalized height 1.0 maps to this.
pub const DEFAULT_ELEVATION_RANGE: f32 = 3795.0;

/// Altitude over terrain (meters) at which the zoom window bottoms out.
const ZOOM_FALLOFF_ALTITUDE: f32 = 25_000.0;

// =============================================================================
// Configuration
// =============================================================================

/// Construction parameters for [`Terrain`].
#[derive(Clone, Debug)]
pub struct TerrainConfig {
    /// Tile covering the whole terrain footprint.
    pub root_tile: TileId,

    /// World-space rectangle the root tile is mapped onto.
    pub world_bounds: Bounds<Vec2>,

    /// Maximum width of the zoom window below the root.
    pub lod_levels: u8,

    /// Meters of altitude spanned by the normalized elevation encoding.
    pub elevation_range: f32,
}

impl TerrainConfig {
    pub fn new(root_tile: TileId, world_bounds: Bounds<Vec2>) -> Self {
        Self {
            root_tile,
            world_bounds,
            lod_levels: DEFAULT_LOD_LEVELS,
            elevation_range: DEFAULT_ELEVATION_RANGE,
        }
    }

    pub fn with_lod_levels(mut self, levels: u8) -> Self {
        self.lod_levels = levels.max(1);
        self
    }

    pub fn with_elevation_range(mut self, range: f32) -> Self {
        self.elevation_range = range;
        self
    }
}

// =============================================================================
// Draw list
// =============================================================================

/// A resolved texture for one leaf: the handle, the UV sub-rectangle to
/// sample, and the tile the texture actually belongs to (the leaf's own
/// tile, or an ancestor when falling back).
#[derive(Clone, Copy, Debug)]
pub struct TextureSelection<H> {
    pub texture: H,
    pub uv: Bounds<Vec2>,
    pub source: TileId,
}

/// One leaf ready to draw.
#[derive(Clone, Copy, Debug)]
pub struct TileDraw<H> {
    /// World-space rectangle of the leaf.
    pub rect: Bounds<Vec2>,

    /// The leaf's own tile address.
    pub tile: TileId,

    /// Quadtree depth, for shader LOD inputs.
    pub depth: u8,

    pub imagery: TextureSelection<H>,
    pub elevation: TextureSelection<H>,
}

/// Cumulative selection counters, exposed read-only to the UI layer.
#[derive(Clone, Copy, Debug)]
pub struct SelectionStats {
    pub leaves_considered: u64,
    pub exact_hits: u64,
    pub fallbacks: u64,
    /// Leaves skipped because no ancestor texture was resident.
    pub skipped: u64,
    /// Fallback count per zoom delta between leaf and used ancestor.
    pub fallbacks_by_delta: [u64; (MAX_ZOOM + 1) as usize],
}

impl Default for SelectionStats {
    fn default() -> Self {
        Self {
            leaves_considered: 0,
            exact_hits: 0,
            fallbacks: 0,
            skipped: 0,
            fallbacks_by_delta: [0; (MAX_ZOOM + 1) as usize],
        }
    }
}

/// UV sub-rectangle of `tile` within `ancestor` scaled to `tile`'s zoom.
///
/// The ancestor covers an `n x n` grid of tiles at the leaf zoom, with
/// `n = 2^(tile.zoom - ancestor.zoom)`; the result has side length `1/n`.
pub fn rescale_uv(ancestor: TileId, tile: TileId) -> Bounds<Vec2> {
    debug_assert!(ancestor.zoom <= tile.zoom, "ancestor below tile");
    let n = 1u32 << (tile.zoom - ancestor.zoom);
    let dx = tile.x - ancestor.x * n;
    let dy = tile.y - ancestor.y * n;
    let factor = 1.0 / n as f32;
    Bounds::new(
        Vec2::new(dx as f32 * factor, dy as f32 * factor),
        Vec2::new((dx + 1) as f32 * factor, (dy + 1) as f32 * factor),
    )
}

// =============================================================================
// Terrain facade
// =============================================================================

/// Streaming terrain: per-frame tile selection over a persistent cache.
pub struct Terrain<U: TextureUploader> {
    cache: TileCache<U>,
    root_tile: TileId,
    world: Bounds<Vec2>,
    coord_bounds: Bounds<Coordinate>,
    lod_levels: u8,
    elevation_range: f32,
    terrain_scaling: f32,
    min_zoom: u8,
    max_zoom: u8,
    manual_zoom: bool,
    stats: SelectionStats,
}

impl<U: TextureUploader> Terrain<U> {
    /// Builds the terrain and performs the warm-up fetches: the root tile
    /// and its four children are fetched synchronously for both kinds so
    /// the fallback chain always has somewhere to land.
    pub fn new(config: TerrainConfig, cache: TileCache<U>) -> Self {
        let root_tile = config.root_tile;
        let world = config.world_bounds;

        // The rendered terrain does not necessarily match its physical
        // size; this factor converts between world units and meters.
        let terrain_scaling = world.size().x / root_tile.width_meters() as f32;

        let max_zoom = (root_tile.zoom + config.lod_levels).min(MAX_ZOOM);

        let mut terrain = Self {
            cache,
            root_tile,
            world,
            coord_bounds: root_tile.bounds(),
            lod_levels: config.lod_levels,
            elevation_range: config.elevation_range,
            terrain_scaling,
            min_zoom: root_tile.zoom,
            max_zoom,
            manual_zoom: false,
            stats: SelectionStats::default(),
        };
        terrain.warm_up();
        terrain
    }

    fn warm_up(&mut self) {
        let mut tiles = vec![self.root_tile];
        tiles.extend(self.root_tile.children());

        for tile in tiles {
            for kind in [TileKind::Imagery, TileKind::Elevation] {
                if self.cache.tile_texture_sync(tile, kind).is_none() {
                    warn!(%tile, %kind, "warm-up fetch failed");
                }
            }
        }
        debug!(root = %self.root_tile, "terrain warm-up complete");
    }

    // -------------------------------------------------------------------------
    // Pure queries
    // -------------------------------------------------------------------------

    /// World units per meter.
    pub fn scaling_factor(&self) -> f32 {
        self.terrain_scaling
    }

    pub fn bounds(&self) -> Bounds<Vec2> {
        self.world
    }

    pub fn root_tile(&self) -> TileId {
        self.root_tile
    }

    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    pub fn cache(&self) -> &TileCache<U> {
        &self.cache
    }

    pub fn selection_stats(&self) -> SelectionStats {
        self.stats
    }

    /// Maps a world position to its geographic coordinate.
    pub fn point_to_coordinate(&self, point: Vec2) -> Coordinate {
        let lon = map_range(
            point.x as f64,
            self.world.min.x as f64,
            self.world.max.x as f64,
            self.coord_bounds.min.lon,
            self.coord_bounds.max.lon,
        );
        let lat = map_range(
            point.y as f64,
            self.world.min.y as f64,
            self.world.max.y as f64,
            self.coord_bounds.min.lat,
            self.coord_bounds.max.lat,
        );
        Coordinate::new(lat, lon)
    }

    /// Maps a geographic coordinate to its world position.
    pub fn coordinate_to_point(&self, coord: Coordinate) -> Vec2 {
        let x = map_range(
            coord.lon,
            self.coord_bounds.min.lon,
            self.coord_bounds.max.lon,
            self.world.min.x as f64,
            self.world.max.x as f64,
        );
        let y = map_range(
            coord.lat,
            self.coord_bounds.min.lat,
            self.coord_bounds.max.lat,
            self.world.min.y as f64,
            self.world.max.y as f64,
        );
        Vec2::new(x as f32, y as f32)
    }

    /// Terrain elevation in meters at a world position.
    pub fn elevation(&self, point: Vec2) -> Result<f32, CoordError> {
        let coord = self.point_to_coordinate(point);
        Ok(self.cache.elevation(coord)? * self.elevation_range)
    }

    /// Height of `altitude` (world units) above the terrain, in meters.
    /// Never negative.
    pub fn altitude_over_terrain(&self, point: Vec2, altitude: f32) -> Result<f32, CoordError> {
        let altitude_m = altitude / self.terrain_scaling;
        Ok((altitude_m - self.elevation(point)?).max(0.0))
    }

    // -------------------------------------------------------------------------
    // Zoom window
    // -------------------------------------------------------------------------

    /// Pins the zoom window, disabling the altitude-based policy.
    pub fn set_zoom_window(&mut self, min_zoom: u8, max_zoom: u8) {
        let max_zoom = max_zoom.clamp(self.root_tile.zoom, MAX_ZOOM);
        self.max_zoom = max_zoom;
        self.min_zoom = min_zoom.clamp(self.root_tile.zoom, max_zoom);
        self.manual_zoom = true;
    }

    /// Re-enables the altitude-based zoom policy.
    pub fn auto_zoom(&mut self) {
        self.manual_zoom = false;
    }

    /// Altitude-based zoom policy: max zoom falls off linearly with height
    /// over terrain, and the window below it is at most `lod_levels` wide.
    fn update_zoom_window(&mut self, point: Vec2, altitude: f32) {
        // The point is clamped by the caller, so the conversion cannot be
        // out of range.
        let over_terrain = self.altitude_over_terrain(point, altitude).unwrap_or(0.0);

        let factor = (1.0 - over_terrain / ZOOM_FALLOFF_ALTITUDE).clamp(0.0, 1.0);
        let target = ((MAX_ZOOM as f32 * factor) as u8)
            .max(self.root_tile.zoom + 1)
            .min(MAX_ZOOM);

        let range = (target - self.root_tile.zoom).clamp(1, self.lod_levels);
        self.max_zoom = target;
        self.min_zoom = target - range;
    }

    /// Moves the LOD focus toward the horizon along the view direction.
    ///
    /// At altitude the interesting terrain is in front of the camera, not
    /// below it; `downward` in `[0, 1]` says how much the view points
    /// straight down and blends the focus back to `position`.
    pub fn lod_focus(
        &self,
        position: Vec2,
        altitude: f32,
        view_direction: Vec2,
        downward: f32,
    ) -> Vec2 {
        let altitude_m = (altitude / self.terrain_scaling).max(0.0) as f64;
        let horizon_m = coord::geographical_distance_to_horizon(altitude_m);
        let horizon_world = horizon_m as f32 * self.terrain_scaling;

        let direction = view_direction.normalize_or_zero();
        let horizon_point = self.world.clamp(position + direction * horizon_world);
        let t = downward.clamp(0.0, 1.0);
        self.world.clamp(horizon_point.lerp(position, t))
    }

    // -------------------------------------------------------------------------
    // Per-frame selection
    // -------------------------------------------------------------------------

    /// Selects the tiles to draw this frame.
    ///
    /// `focus` is the LOD center (typically the camera's ground projection
    /// or [`lod_focus`](Self::lod_focus)), `altitude` the camera height in
    /// world units, `visible` the external containment test applied to
    /// every candidate leaf.
    ///
    /// Leaves whose textures cannot be resolved even through the root are
    /// skipped this frame and come back automatically once a download
    /// lands.
    pub fn select_tiles<F>(
        &mut self,
        focus: Vec2,
        altitude: f32,
        visible: F,
    ) -> Vec<TileDraw<U::Handle>>
    where
        F: Fn(&Node) -> bool,
    {
        let focus = self.world.clamp(focus);
        if !self.manual_zoom {
            self.update_zoom_window(focus, altitude);
        }

        let depth = self.max_zoom - self.root_tile.zoom;
        let tree = QuadTree::build(focus, self.world, depth, self.root_tile);

        let min_zoom = self.min_zoom;
        let mut leaves: Vec<NodeId> = Vec::new();
        tree.visit(|id, node| {
            if node.is_leaf() && node.tile().zoom >= min_zoom && visible(node) {
                leaves.push(id);
            }
            true
        });

        // Finest first: presentation priority, and the matching download
        // requests land on the LIFO queue in the right order.
        leaves.sort_by(|&a, &b| tree.node(b).depth().cmp(&tree.node(a).depth()));

        let mut draws = Vec::with_capacity(leaves.len());
        for id in leaves {
            self.stats.leaves_considered += 1;

            let imagery = self.resolve(&tree, id, TileKind::Imagery);
            let elevation = self.resolve(&tree, id, TileKind::Elevation);

            let node = tree.node(id);
            match (imagery, elevation) {
                (Some(imagery), Some(elevation)) => draws.push(TileDraw {
                    rect: node.rect(),
                    tile: node.tile(),
                    depth: node.depth(),
                    imagery,
                    elevation,
                }),
                _ => self.stats.skipped += 1,
            }
        }
        draws
    }

    /// Resolves one leaf to a texture, walking ancestors on a miss.
    fn resolve(
        &mut self,
        tree: &QuadTree,
        id: NodeId,
        kind: TileKind,
    ) -> Option<TextureSelection<U::Handle>> {
        let node = tree.node(id);
        let tile = node.tile();

        if let Some(texture) = self.cache.tile_texture(tile, kind) {
            self.stats.exact_hits += 1;
            return Some(TextureSelection {
                texture,
                uv: Bounds::new(Vec2::ZERO, Vec2::ONE),
                source: tile,
            });
        }

        let mut ancestor = node.parent();
        while let Some(ancestor_id) = ancestor {
            let candidate = tree.node(ancestor_id);
            if let Some(texture) = self.cache.tile_texture_cached(candidate.tile(), kind) {
                self.record_fallback(tile.zoom - candidate.tile().zoom);
                return Some(TextureSelection {
                    texture,
                    uv: rescale_uv(candidate.tile(), tile),
                    source: candidate.tile(),
                });
            }
            ancestor = candidate.parent();
        }

        // The root is fetched during warm-up, so this normally succeeds;
        // if even the root is missing the leaf is skipped for the frame.
        let texture = self.cache.tile_texture(self.root_tile, kind)?;
        self.record_fallback(tile.zoom - self.root_tile.zoom);
        Some(TextureSelection {
            texture,
            uv: rescale_uv(self.root_tile, tile),
            source: self.root_tile,
        })
    }

    fn record_fallback(&mut self, delta: u8) {
        self.stats.fallbacks += 1;
        let bucket = (delta as usize).min(self.stats.fallbacks_by_delta.len() - 1);
        self.stats.fallbacks_by_delta[bucket] += 1;
    }
}
