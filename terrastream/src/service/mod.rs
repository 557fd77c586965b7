//! Tile download service for one remote data source.
//!
//! A [`TileService`] memoizes decoded tile images and owns the worker pool
//! that fetches them. The non-blocking [`get_tile`](TileService::get_tile)
//! path is what the render loop uses every frame; the blocking
//! [`get_tile_sync`](TileService::get_tile_sync) path exists for the few
//! tiles that must be resident before the first frame (root tile and its
//! children).
//!
//! "No tile yet" is the uniform failure representation: a request that
//! fails (non-2xx, transport error, undecodable payload) is logged, enters
//! a cooldown, and is otherwise indistinguishable from a tile that has not
//! finished downloading. The caller's ancestor-fallback logic covers both.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use image::RgbaImage;
use tracing::{debug, warn};

use crate::coord::TileId;
use crate::pool::ThreadPool;
use crate::provider::{HttpClient, TileEndpoint};

/// Default number of download workers per service.
pub const DEFAULT_WORKERS: usize = 3;

/// Default failure cooldown before a tile may be re-requested.
pub const DEFAULT_RETRY_COOLDOWN: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a [`TileService`].
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// The remote tile source.
    pub endpoint: TileEndpoint,

    /// Number of worker threads performing blocking downloads.
    pub workers: usize,

    /// Directory for the optional disk tier. `None` disables it.
    pub cache_dir: Option<PathBuf>,

    /// How long a failed tile stays un-requestable.
    pub retry_cooldown: Duration,
}

impl ServiceConfig {
    pub fn new(endpoint: TileEndpoint) -> Self {
        Self {
            endpoint,
            workers: DEFAULT_WORKERS,
            cache_dir: None,
            retry_cooldown: DEFAULT_RETRY_COOLDOWN,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_retry_cooldown(mut self, cooldown: Duration) -> Self {
        self.retry_cooldown = cooldown;
        self
    }
}

// =============================================================================
// Metrics
// =============================================================================

/// Lock-free counters for one service, read by the UI layer.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    ram_hits: AtomicU64,
    ram_misses: AtomicU64,
    disk_hits: AtomicU64,
    downloads_ok: AtomicU64,
    download_failures: AtomicU64,
    decode_failures: AtomicU64,
}

/// Point-in-time copy of [`ServiceMetrics`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceMetricsSnapshot {
    pub ram_hits: u64,
    pub ram_misses: u64,
    pub disk_hits: u64,
    pub downloads_ok: u64,
    pub download_failures: u64,
    pub decode_failures: u64,
    /// Tiles currently requested but not yet resident.
    pub in_flight: usize,
}

// =============================================================================
// Service
// =============================================================================

/// State shared between the calling thread and the download workers.
struct ServiceState {
    endpoint: TileEndpoint,
    http: Arc<dyn HttpClient>,
    cache_dir: Option<PathBuf>,
    retry_cooldown: Duration,

    /// Decoded-image RAM tier.
    images: DashMap<TileId, Arc<RgbaImage>>,

    /// Dedup of in-flight requests.
    requested: DashSet<TileId>,

    /// Tiles whose last attempt failed, with the failure time.
    failed: DashMap<TileId, Instant>,

    metrics: ServiceMetrics,
}

/// Fetches, decodes and memoizes tiles from one remote source.
pub struct TileService {
    state: Arc<ServiceState>,
    pool: ThreadPool,
}

impl TileService {
    pub fn new(config: ServiceConfig, http: Arc<dyn HttpClient>) -> Self {
        let cache_dir = config.cache_dir.and_then(|dir| {
            match std::fs::create_dir_all(&dir) {
                Ok(()) => Some(dir),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "disk tier disabled");
                    None
                }
            }
        });

        let state = Arc::new(ServiceState {
            endpoint: config.endpoint,
            http,
            cache_dir,
            retry_cooldown: config.retry_cooldown,
            images: DashMap::new(),
            requested: DashSet::new(),
            failed: DashMap::new(),
            metrics: ServiceMetrics::default(),
        });

        Self {
            state,
            pool: ThreadPool::new(config.workers),
        }
    }

    /// Non-blocking lookup.
    ///
    /// Returns the decoded image if resident. Otherwise enqueues a download
    /// (at most once per address while in flight) and returns `None`.
    pub fn get_tile(&self, tile: TileId) -> Option<Arc<RgbaImage>> {
        if let Some(image) = self.state.images.get(&tile) {
            self.state.metrics.ram_hits.fetch_add(1, Ordering::Relaxed);
            return Some(Arc::clone(&image));
        }
        self.state.metrics.ram_misses.fetch_add(1, Ordering::Relaxed);

        if self.state.in_cooldown(tile) {
            return None;
        }

        if self.state.requested.insert(tile) {
            let state = Arc::clone(&self.state);
            self.pool.assign_work(move || state.download_job(tile));
        }
        None
    }

    /// Blocking lookup for must-have tiles.
    ///
    /// Fetches on the calling thread if the tile is not resident. Returns
    /// `None` only if the fetch itself failed.
    pub fn get_tile_sync(&self, tile: TileId) -> Option<Arc<RgbaImage>> {
        if let Some(image) = self.state.images.get(&tile) {
            self.state.metrics.ram_hits.fetch_add(1, Ordering::Relaxed);
            return Some(Arc::clone(&image));
        }
        self.state.metrics.ram_misses.fetch_add(1, Ordering::Relaxed);

        match self.state.fetch_and_decode(tile) {
            Some(image) => {
                let image = Arc::new(image);
                self.state.images.insert(tile, Arc::clone(&image));
                self.state.failed.remove(&tile);
                Some(image)
            }
            None => {
                self.state.failed.insert(tile, Instant::now());
                None
            }
        }
    }

    /// Drops request bookkeeping and purges queued downloads.
    ///
    /// In-flight downloads run to completion and still populate the RAM
    /// tier; they are simply no longer deduplicated against, so a dropped
    /// tile is only fetched again if someone re-requests it.
    pub fn clear_pending_downloads(&self) {
        self.pool.clear_queue();
        self.state.requested.clear();
    }

    /// Whether the decoded image for `tile` is resident in RAM.
    pub fn has_cached(&self, tile: &TileId) -> bool {
        self.state.images.contains_key(tile)
    }

    pub fn metrics(&self) -> ServiceMetricsSnapshot {
        let m = &self.state.metrics;
        ServiceMetricsSnapshot {
            ram_hits: m.ram_hits.load(Ordering::Relaxed),
            ram_misses: m.ram_misses.load(Ordering::Relaxed),
            disk_hits: m.disk_hits.load(Ordering::Relaxed),
            downloads_ok: m.downloads_ok.load(Ordering::Relaxed),
            download_failures: m.download_failures.load(Ordering::Relaxed),
            decode_failures: m.decode_failures.load(Ordering::Relaxed),
            in_flight: self.state.requested.len(),
        }
    }

    pub fn endpoint(&self) -> &TileEndpoint {
        &self.state.endpoint
    }
}

impl ServiceState {
    /// Runs on a pool worker: fetch, decode, publish.
    fn download_job(&self, tile: TileId) {
        match self.fetch_and_decode(tile) {
            Some(image) => {
                self.images.insert(tile, Arc::new(image));
            }
            None => {
                self.failed.insert(tile, Instant::now());
            }
        }
        self.requested.remove(&tile);
    }

    /// Whether `tile` failed recently enough that re-requesting is blocked.
    /// An expired cooldown entry is dropped so the next request goes out.
    fn in_cooldown(&self, tile: TileId) -> bool {
        let Some(failed_at) = self.failed.get(&tile).map(|at| *at) else {
            return false;
        };
        if failed_at.elapsed() < self.retry_cooldown {
            return true;
        }
        self.failed.remove(&tile);
        false
    }

    /// Disk tier first, then network. `None` on any failure.
    fn fetch_and_decode(&self, tile: TileId) -> Option<RgbaImage> {
        if let Some(image) = self.load_from_disk(tile) {
            self.metrics.disk_hits.fetch_add(1, Ordering::Relaxed);
            return Some(image);
        }

        let url = self.endpoint.tile_url(&tile);
        let bytes = match self.http.get(&url) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.metrics.download_failures.fetch_add(1, Ordering::Relaxed);
                warn!(%tile, error = %e, "tile download failed");
                return None;
            }
        };

        match image::load_from_memory(&bytes) {
            Ok(decoded) => {
                debug!(%tile, %url, "tile downloaded");
                self.metrics.downloads_ok.fetch_add(1, Ordering::Relaxed);
                self.save_to_disk(tile, &bytes);
                Some(decoded.to_rgba8())
            }
            Err(e) => {
                self.metrics.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(%tile, error = %e, "could not decode tile payload");
                None
            }
        }
    }

    fn disk_path(&self, tile: TileId) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(self.endpoint.disk_file_name(&tile)))
    }

    fn load_from_disk(&self, tile: TileId) -> Option<RgbaImage> {
        let path = self.disk_path(tile)?;
        if !path.exists() {
            return None;
        }
        let bytes = std::fs::read(&path).ok()?;
        match image::load_from_memory(&bytes) {
            Ok(decoded) => Some(decoded.to_rgba8()),
            Err(e) => {
                warn!(%tile, path = %path.display(), error = %e, "unreadable disk tile");
                None
            }
        }
    }

    /// Best-effort write-through of the raw payload.
    fn save_to_disk(&self, tile: TileId, bytes: &[u8]) {
        let Some(path) = self.disk_path(tile) else {
            return;
        };
        if let Err(e) = std::fs::write(&path, bytes) {
            warn!(%tile, path = %path.display(), error = %e, "failed to persist tile");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockHttpClient, ProviderError, UrlPattern};
    use std::io::Cursor;
    use std::time::Duration;

    fn endpoint() -> TileEndpoint {
        TileEndpoint::new("http://tiles.test/dem", UrlPattern::ZxyYSouth, "png")
    }

    fn png_bytes(r: u8, g: u8, b: u8) -> Vec<u8> {
        let image = RgbaImage::from_pixel(4, 4, image::Rgba([r, g, b, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn service_with(http: MockHttpClient, config: ServiceConfig) -> TileService {
        TileService::new(config, Arc::new(http))
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_get_tile_sync_downloads_and_caches() {
        let service = service_with(
            MockHttpClient::ok(png_bytes(10, 20, 30)),
            ServiceConfig::new(endpoint()),
        );
        let tile = TileId::new(3, 1, 2).unwrap();

        let image = service.get_tile_sync(tile).expect("download must succeed");
        assert_eq!(image.dimensions(), (4, 4));
        assert!(service.has_cached(&tile));

        // Second call is a pure cache hit.
        let again = service.get_tile_sync(tile).unwrap();
        assert!(Arc::ptr_eq(&image, &again));
        assert_eq!(service.metrics().downloads_ok, 1);
    }

    #[test]
    fn test_get_tile_sync_404_leaves_caches_empty() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(
            MockHttpClient::status(404),
            ServiceConfig::new(endpoint()).with_cache_dir(dir.path()),
        );
        let tile = TileId::new(3, 1, 2).unwrap();

        assert!(service.get_tile_sync(tile).is_none());
        assert!(!service.has_cached(&tile));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(service.metrics().download_failures, 1);
    }

    #[test]
    fn test_get_tile_is_non_blocking_then_resident() {
        let service = service_with(
            MockHttpClient::ok(png_bytes(1, 2, 3)),
            ServiceConfig::new(endpoint()),
        );
        let tile = TileId::new(5, 10, 11).unwrap();

        assert!(service.get_tile(tile).is_none());
        wait_until(|| service.has_cached(&tile));
        assert!(service.get_tile(tile).is_some());
    }

    #[test]
    fn test_concurrent_get_tile_enqueues_one_download() {
        let http = Arc::new(
            MockHttpClient::ok(png_bytes(1, 1, 1)).with_delay(Duration::from_millis(100)),
        );
        let service = TileService::new(
            ServiceConfig::new(endpoint()),
            Arc::clone(&http) as Arc<dyn HttpClient>,
        );
        let tile = TileId::new(7, 68, 44).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    assert!(service.get_tile(tile).is_none());
                });
            }
        });

        wait_until(|| service.has_cached(&tile));
        assert_eq!(http.request_count(), 1);
        assert_eq!(service.metrics().downloads_ok, 1);
        assert_eq!(service.metrics().in_flight, 0);
    }

    #[test]
    fn test_failed_tile_respects_cooldown() {
        let service = service_with(
            MockHttpClient::status(500),
            ServiceConfig::new(endpoint()).with_retry_cooldown(Duration::from_secs(600)),
        );
        let tile = TileId::new(4, 3, 3).unwrap();

        assert!(service.get_tile(tile).is_none());
        wait_until(|| service.metrics().download_failures == 1);
        wait_until(|| service.metrics().in_flight == 0);

        // Within the cooldown no new download goes out.
        assert!(service.get_tile(tile).is_none());
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(service.metrics().download_failures, 1);
    }

    #[test]
    fn test_failed_tile_re_requestable_after_cooldown() {
        let service = service_with(
            MockHttpClient::status(500),
            ServiceConfig::new(endpoint()).with_retry_cooldown(Duration::from_millis(50)),
        );
        let tile = TileId::new(4, 3, 3).unwrap();

        assert!(service.get_tile(tile).is_none());
        wait_until(|| service.metrics().download_failures == 1);
        wait_until(|| service.metrics().in_flight == 0);

        std::thread::sleep(Duration::from_millis(80));
        assert!(service.get_tile(tile).is_none());
        wait_until(|| service.metrics().download_failures == 2);
    }

    #[test]
    fn test_disk_tier_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let tile = TileId::new(3, 1, 2).unwrap();

        {
            let service = service_with(
                MockHttpClient::ok(png_bytes(9, 9, 9)),
                ServiceConfig::new(endpoint()).with_cache_dir(dir.path()),
            );
            service.get_tile_sync(tile).expect("download must succeed");
            assert!(dir.path().join("3-1-2.png").exists());
        }

        // A fresh service with a dead network serves the tile from disk.
        let offline = service_with(
            MockHttpClient::status(503),
            ServiceConfig::new(endpoint()).with_cache_dir(dir.path()),
        );
        let image = offline.get_tile_sync(tile).expect("disk tier must hit");
        assert_eq!(image.get_pixel(0, 0).0, [9, 9, 9, 255]);
        assert_eq!(offline.metrics().disk_hits, 1);
        assert_eq!(offline.metrics().download_failures, 0);
    }

    #[test]
    fn test_clear_pending_downloads_drops_queue_but_not_in_flight() {
        let http = MockHttpClient::ok(png_bytes(7, 7, 7)).with_delay(Duration::from_millis(300));
        let service = service_with(
            http,
            ServiceConfig::new(endpoint()).with_workers(1),
        );

        let tiles: Vec<TileId> = (0..5).map(|i| TileId::new(4, i, 0).unwrap()).collect();
        for &tile in &tiles {
            assert!(service.get_tile(tile).is_none());
        }
        // Let the single worker pick up the most recent request.
        std::thread::sleep(Duration::from_millis(50));

        service.clear_pending_downloads();
        assert_eq!(service.pool.queued_jobs(), 0);

        // Exactly the in-flight tile completes and lands in the cache.
        wait_until(|| service.metrics().downloads_ok == 1);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(service.metrics().downloads_ok, 1);
        assert!(service.has_cached(tiles.last().unwrap()));

        // Dropped requests are not retried on their own, but a new request
        // for the same address goes out again.
        assert!(service.get_tile(tiles[0]).is_none());
        wait_until(|| service.has_cached(&tiles[0]));
    }

    #[test]
    fn test_undecodable_payload_is_never_cached() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(
            MockHttpClient::ok(vec![0xde, 0xad, 0xbe, 0xef]),
            ServiceConfig::new(endpoint()).with_cache_dir(dir.path()),
        );
        let tile = TileId::new(2, 1, 1).unwrap();

        assert!(service.get_tile_sync(tile).is_none());
        assert!(!service.has_cached(&tile));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(service.metrics().decode_failures, 1);
    }
}
