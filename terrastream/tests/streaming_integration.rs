//! Integration tests for the streaming pipeline.
//!
//! These tests drive the public API end to end with a stub HTTP transport:
//! - warm-up → per-frame selection → ancestor fallback → exact upgrade
//! - download dedup across cache layers
//! - failure handling (404 servers never poison a cache tier)
//!
//! Run with: `cargo test --test streaming_integration`

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec2;
use image::RgbaImage;

use terrastream::{
    Bounds, HttpClient, ProviderError, QuadTree, ServiceConfig, Terrain, TerrainConfig,
    TextureUploader, TileCache, TileEndpoint, TileId, TileKind, TileService, UrlPattern,
};

// ============================================================================
// Helper Functions
// ============================================================================

/// Serves the same PNG for every URL, counting requests; optionally fails
/// every request with an HTTP status instead.
struct StubServer {
    response: Result<Vec<u8>, u16>,
    requests: AtomicUsize,
}

impl StubServer {
    fn ok(r: u8, g: u8, b: u8) -> Self {
        let image = RgbaImage::from_pixel(8, 8, image::Rgba([r, g, b, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .expect("png encode");
        Self {
            response: Ok(bytes),
            requests: AtomicUsize::new(0),
        }
    }

    fn failing(code: u16) -> Self {
        Self {
            response: Err(code),
            requests: AtomicUsize::new(0),
        }
    }

    fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl HttpClient for StubServer {
    fn get(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            Ok(bytes) => Ok(bytes.clone()),
            Err(code) => Err(ProviderError::Status {
                code: *code,
                url: url.to_string(),
            }),
        }
    }
}

/// Sequential-handle uploader standing in for the GL layer.
struct HandleCounter {
    next: u64,
}

impl TextureUploader for HandleCounter {
    type Handle = u64;

    fn upload(&mut self, _image: &RgbaImage) -> u64 {
        let handle = self.next;
        self.next += 1;
        handle
    }
}

fn service(http: Arc<StubServer>, base: &str) -> TileService {
    TileService::new(
        ServiceConfig::new(TileEndpoint::new(base, UrlPattern::ZxyYSouth, "png")),
        http as Arc<dyn HttpClient>,
    )
}

fn root_tile() -> TileId {
    TileId::new(7, 68, 44).unwrap()
}

fn world() -> Bounds<Vec2> {
    Bounds::new(Vec2::new(-500.0, -500.0), Vec2::new(500.0, 500.0))
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(10));
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

/// The reference quadtree scenario over the public API: focus at the
/// center refines the four nearest leaves to full depth inside the node
/// budget.
#[test]
fn test_quadtree_focus_scenario() {
    let tree = QuadTree::build(Vec2::ZERO, world(), 3, root_tile());

    assert!(tree.len() <= 85);
    assert_eq!(tree.node(tree.root()).depth(), 0);

    let leaves = tree.leaves();
    let mut by_distance: Vec<_> = leaves.iter().map(|&id| tree.node(id)).collect();
    by_distance.sort_by(|a, b| {
        a.center()
            .length()
            .partial_cmp(&b.center().length())
            .unwrap()
    });
    for node in by_distance.iter().take(4) {
        assert_eq!(node.depth(), 3);
    }
}

/// Frame one serves every leaf from warmed ancestors; once the async
/// downloads land, the same leaves upgrade to their exact tiles.
#[test]
fn test_streaming_upgrades_from_fallback_to_exact() {
    let imagery_server = Arc::new(StubServer::ok(120, 130, 140));
    let elevation_server = Arc::new(StubServer::ok(10, 0, 0));

    let cache = TileCache::new(
        service(Arc::clone(&imagery_server), "http://imagery.test"),
        service(Arc::clone(&elevation_server), "http://height.test"),
        HandleCounter { next: 0 },
    );
    let mut terrain = Terrain::new(
        TerrainConfig::new(root_tile(), world()).with_lod_levels(3),
        cache,
    );
    terrain.set_zoom_window(7, 9);

    let first = terrain.select_tiles(Vec2::ZERO, 0.0, |_| true);
    assert!(!first.is_empty());
    for draw in &first {
        // Warm-up covered the root and its children, so the deepest
        // available source on frame one is zoom 8.
        assert!(draw.imagery.source.zoom <= 8);
        let delta = draw.tile.zoom - draw.imagery.source.zoom;
        let side = (draw.imagery.uv.max - draw.imagery.uv.min).x;
        assert!((side - 1.0 / (1u32 << delta) as f32).abs() < 1e-6);
    }

    let tiles: Vec<TileId> = first.iter().map(|d| d.tile).collect();
    wait_until(|| {
        tiles.iter().all(|t| {
            terrain.cache().imagery_service().has_cached(t)
                && terrain.cache().elevation_service().has_cached(t)
        })
    });

    let second = terrain.select_tiles(Vec2::ZERO, 0.0, |_| true);
    assert_eq!(second.len(), first.len());
    for draw in &second {
        assert_eq!(draw.imagery.source, draw.tile);
        assert_eq!(draw.elevation.source, draw.tile);
    }
}

/// Each (tile, kind) is downloaded at most once no matter how many frames
/// ask for it.
#[test]
fn test_cache_deduplicates_downloads_across_frames() {
    let imagery_server = Arc::new(StubServer::ok(1, 2, 3));
    let elevation_server = Arc::new(StubServer::ok(0, 0, 0));

    let cache = TileCache::new(
        service(Arc::clone(&imagery_server), "http://imagery.test"),
        service(Arc::clone(&elevation_server), "http://height.test"),
        HandleCounter { next: 0 },
    );
    let mut terrain = Terrain::new(
        TerrainConfig::new(root_tile(), world()).with_lod_levels(2),
        cache,
    );
    terrain.set_zoom_window(7, 9);

    for _ in 0..5 {
        terrain.select_tiles(Vec2::ZERO, 0.0, |_| true);
        std::thread::sleep(Duration::from_millis(20));
    }
    wait_until(|| terrain.cache().imagery_service().metrics().in_flight == 0);

    // 5 warm-up tiles + 16 leaves, each fetched exactly once.
    let imagery = terrain.cache().imagery_service().metrics();
    assert_eq!(imagery.downloads_ok, 21);
    assert_eq!(imagery_server.request_count(), 21);
}

/// A dead tile server produces an empty draw list frame after frame, and
/// no cache tier retains anything for the failed addresses.
#[test]
fn test_dead_server_yields_empty_frames() {
    let imagery_server = Arc::new(StubServer::failing(404));
    let elevation_server = Arc::new(StubServer::failing(404));

    let cache = TileCache::new(
        service(Arc::clone(&imagery_server), "http://imagery.test"),
        service(Arc::clone(&elevation_server), "http://height.test"),
        HandleCounter { next: 0 },
    );
    let mut terrain = Terrain::new(
        TerrainConfig::new(root_tile(), world()).with_lod_levels(2),
        cache,
    );
    terrain.set_zoom_window(7, 8);

    for _ in 0..3 {
        let draws = terrain.select_tiles(Vec2::ZERO, 0.0, |_| true);
        assert!(draws.is_empty());
    }

    assert!(!terrain.cache().imagery_service().has_cached(&root_tile()));
    assert!(terrain
        .cache()
        .tile_texture_cached(root_tile(), TileKind::Imagery)
        .is_none());
    assert!(terrain.selection_stats().skipped > 0);
}

/// A synchronous 404 returns "no image" and leaves every tier empty.
#[test]
fn test_sync_404_leaves_all_tiers_empty() {
    let server = Arc::new(StubServer::failing(404));
    let tile_service = service(Arc::clone(&server), "http://imagery.test");
    let tile = TileId::new(9, 100, 200).unwrap();

    assert!(tile_service.get_tile_sync(tile).is_none());
    assert!(!tile_service.has_cached(&tile));
    assert_eq!(server.request_count(), 1);
    assert_eq!(tile_service.metrics().download_failures, 1);
}
