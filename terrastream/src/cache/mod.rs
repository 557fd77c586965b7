//! Two-tier tile cache: decoded images per service, GPU textures on top.
//!
//! The GPU tier is keyed by `(TileId, TileKind)` and populated lazily the
//! first time a decoded image becomes available for that key. Texture
//! entries are never invalidated by this subsystem; a time-based sweep was
//! designed but never wired in, so the tier only grows (bounded in practice
//! by the tile addresses a session actually touches).
//!
//! Textures are created through the [`TextureUploader`] trait supplied by
//! the render loop. Uploads, like every other access to the GPU tier, must
//! happen on the render thread: the tier is deliberately unsynchronized and
//! worker threads never see it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use image::RgbaImage;
use tracing::warn;

use crate::coord::{CoordError, Coordinate, TileId};
use crate::geom::map_range;
use crate::service::TileService;

/// Zoom level used for elevation lookups.
///
/// Deliberately shallow: one tile covers a large area, so a single fetch
/// answers many queries. The resolution is coarse accordingly.
pub const ELEVATION_ZOOM: u8 = 7;

/// The two tile data sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TileKind {
    Imagery,
    Elevation,
}

impl fmt::Display for TileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileKind::Imagery => write!(f, "imagery"),
            TileKind::Elevation => write!(f, "elevation"),
        }
    }
}

/// Creates GPU-resident textures from decoded images.
///
/// Implemented by the render layer. Must only ever be called from the
/// render thread; the cache upholds this by never invoking it from a
/// worker.
pub trait TextureUploader {
    /// Opaque, copyable texture handle understood by the render layer.
    type Handle: Copy + Eq;

    fn upload(&mut self, image: &RgbaImage) -> Self::Handle;
}

// =============================================================================
// Metrics
// =============================================================================

/// Lock-free counters for the GPU tier.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    texture_hits: AtomicU64,
    texture_misses: AtomicU64,
    textures_created: AtomicU64,
    fallback_lookups: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub texture_hits: u64,
    pub texture_misses: u64,
    pub textures_created: u64,
    /// `tile_texture_cached` probes made while walking ancestor chains.
    pub fallback_lookups: u64,
}

// =============================================================================
// Cache
// =============================================================================

/// Owns one [`TileService`] per data kind plus the GPU texture tier.
pub struct TileCache<U: TextureUploader> {
    imagery: TileService,
    elevation: TileService,
    textures: HashMap<(TileId, TileKind), U::Handle>,
    uploader: U,
    metrics: CacheMetrics,
}

impl<U: TextureUploader> TileCache<U> {
    pub fn new(imagery: TileService, elevation: TileService, uploader: U) -> Self {
        Self {
            imagery,
            elevation,
            textures: HashMap::new(),
            uploader,
            metrics: CacheMetrics::default(),
        }
    }

    fn service(&self, kind: TileKind) -> &TileService {
        match kind {
            TileKind::Imagery => &self.imagery,
            TileKind::Elevation => &self.elevation,
        }
    }

    /// Non-blocking texture lookup.
    ///
    /// A GPU-tier hit returns immediately. Otherwise the matching service
    /// is asked for the decoded image; if that is resident, a texture is
    /// created and memoized. `None` means the tile is not ready yet (a
    /// download may just have been enqueued).
    pub fn tile_texture(&mut self, tile: TileId, kind: TileKind) -> Option<U::Handle> {
        if let Some(handle) = self.textures.get(&(tile, kind)) {
            self.metrics.texture_hits.fetch_add(1, Ordering::Relaxed);
            return Some(*handle);
        }
        self.metrics.texture_misses.fetch_add(1, Ordering::Relaxed);

        let image = self.service(kind).get_tile(tile)?;
        Some(self.create_texture(tile, kind, &image))
    }

    /// Blocking texture lookup for must-have tiles (root and warm-up set).
    pub fn tile_texture_sync(&mut self, tile: TileId, kind: TileKind) -> Option<U::Handle> {
        if let Some(handle) = self.textures.get(&(tile, kind)) {
            self.metrics.texture_hits.fetch_add(1, Ordering::Relaxed);
            return Some(*handle);
        }
        self.metrics.texture_misses.fetch_add(1, Ordering::Relaxed);

        let image = self.service(kind).get_tile_sync(tile)?;
        Some(self.create_texture(tile, kind, &image))
    }

    /// GPU-tier lookup only; never triggers a fetch.
    ///
    /// This is the probe used while walking a leaf's ancestor chain.
    pub fn tile_texture_cached(&self, tile: TileId, kind: TileKind) -> Option<U::Handle> {
        self.metrics.fallback_lookups.fetch_add(1, Ordering::Relaxed);
        self.textures.get(&(tile, kind)).copied()
    }

    fn create_texture(&mut self, tile: TileId, kind: TileKind, image: &RgbaImage) -> U::Handle {
        let handle = self.uploader.upload(image);
        self.metrics.textures_created.fetch_add(1, Ordering::Relaxed);
        self.textures.insert((tile, kind), handle);
        handle
    }

    /// Normalized terrain height at `coord`, in `[0, 1]` of the elevation
    /// range.
    ///
    /// Locates the elevation tile covering `coord` at [`ELEVATION_ZOOM`],
    /// maps the coordinate into the tile's pixel space and reconstructs the
    /// height from the two-channel fixed-point encoding
    /// `red + blue / 255` (over channels normalized to `[0, 1]`).
    ///
    /// Falls back to a blocking fetch if the tile is not resident; if even
    /// that fails the height is reported as sea level and a warning logged.
    pub fn elevation(&self, coord: Coordinate) -> Result<f32, CoordError> {
        let tile = TileId::from_coordinate(coord, ELEVATION_ZOOM)?;

        let image = match self
            .elevation
            .get_tile(tile)
            .or_else(|| self.elevation.get_tile_sync(tile))
        {
            Some(image) => image,
            None => {
                warn!(%tile, "elevation tile unavailable, reporting sea level");
                return Ok(0.0);
            }
        };

        let bounds = tile.bounds();
        let u = map_range(coord.lon, bounds.min.lon, bounds.max.lon, 0.0, 1.0);
        let v = map_range(coord.lat, bounds.min.lat, bounds.max.lat, 0.0, 1.0);

        let (width, height) = image.dimensions();
        let px = ((u * width as f64) as u32).min(width - 1);
        let py = ((v * height as f64) as u32).min(height - 1);

        let pixel = image.get_pixel(px, py).0;
        let red = pixel[0] as f32 / 255.0;
        let blue = pixel[2] as f32 / 255.0;
        Ok(red + blue / 255.0)
    }

    /// Purges queued downloads on both services.
    pub fn clear_pending_downloads(&self) {
        self.imagery.clear_pending_downloads();
        self.elevation.clear_pending_downloads();
    }

    pub fn imagery_service(&self) -> &TileService {
        &self.imagery
    }

    pub fn elevation_service(&self) -> &TileService {
        &self.elevation
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        let m = &self.metrics;
        CacheMetricsSnapshot {
            texture_hits: m.texture_hits.load(Ordering::Relaxed),
            texture_misses: m.texture_misses.load(Ordering::Relaxed),
            textures_created: m.textures_created.load(Ordering::Relaxed),
            fallback_lookups: m.fallback_lookups.load(Ordering::Relaxed),
        }
    }
}
