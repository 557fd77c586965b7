//! Coordinate conversion module
//!
//! Stateless conversions between geographic coordinates (latitude/longitude)
//! and Web Mercator slippy-tile addresses, following the OpenStreetMap
//! slippy-map tile naming convention.

mod types;

pub use types::{
    CoordError, Coordinate, TileId, MAX_LAT, MAX_LON, MAX_ZOOM, MIN_LAT, MIN_LON, MIN_ZOOM,
};

use std::f64::consts::PI;

/// Earth equatorial radius in meters (WGS84).
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Earth equatorial circumference in meters.
pub const EQUATORIAL_CIRCUMFERENCE: f64 = 2.0 * PI * EARTH_RADIUS;

/// Converts a longitude to a tile x index at `zoom`.
#[inline]
pub fn lon_to_tile_x(lon: f64, zoom: u8) -> Result<u32, CoordError> {
    if !(MIN_LON..=MAX_LON).contains(&lon) {
        return Err(CoordError::InvalidLongitude(lon));
    }
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }
    let n = (1u32 << zoom) as f64;
    let x = ((lon + 180.0) / 360.0 * n).floor() as u32;
    // lon == 180.0 lands exactly on the right edge
    Ok(x.min((1u32 << zoom) - 1))
}

/// Converts a latitude to a tile y index at `zoom`.
///
/// The y axis points south: `y = 0` is the northernmost row.
#[inline]
pub fn lat_to_tile_y(lat: f64, zoom: u8) -> Result<u32, CoordError> {
    if !(MIN_LAT..=MAX_LAT).contains(&lat) {
        return Err(CoordError::InvalidLatitude(lat));
    }
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }
    let n = (1u32 << zoom) as f64;
    let lat_rad = lat.to_radians();
    let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor() as u32;
    Ok(y.min((1u32 << zoom) - 1))
}

/// Longitude of the western edge of tile column `x` at `zoom`.
#[inline]
pub fn tile_x_to_lon(x: u32, zoom: u8) -> f64 {
    x as f64 / (1u32 << zoom) as f64 * 360.0 - 180.0
}

/// Latitude of the northern edge of tile row `y` at `zoom`.
#[inline]
pub fn tile_y_to_lat(y: u32, zoom: u8) -> f64 {
    let n = PI - 2.0 * PI * y as f64 / (1u32 << zoom) as f64;
    (0.5 * (n.exp() - (-n).exp())).atan().to_degrees()
}

/// Width of one tile in meters at the given latitude and zoom.
#[inline]
pub fn tile_width_meters(lat: f64, zoom: u8) -> f64 {
    let lat_rad = lat.to_radians();
    (EQUATORIAL_CIRCUMFERENCE * lat_rad.cos() / (1u32 << zoom) as f64).abs()
}

/// Straight-line distance to the horizon from `altitude` meters.
#[inline]
pub fn distance_to_horizon(altitude: f64) -> f64 {
    (2.0 * EARTH_RADIUS * altitude + altitude * altitude).sqrt()
}

/// Arc distance along the ground to the horizon from `altitude` meters.
#[inline]
pub fn geographical_distance_to_horizon(altitude: f64) -> f64 {
    EARTH_RADIUS * (distance_to_horizon(altitude) / EARTH_RADIUS).atan()
}
