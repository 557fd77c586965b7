//! Tile URL construction for slippy-tile servers.

use crate::coord::TileId;

/// Path layout of a tile server, including the direction of the y axis.
///
/// Internally the tile y axis always points south (`y = 0` is the
/// northernmost row); `*YNorth` variants flip the row index for servers
/// whose origin is in the south.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UrlPattern {
    /// `{base}/{zoom}/{x}/{y}`
    ZxyYSouth,
    /// `{base}/{zoom}/{x}/{flipped_y}`
    ZxyYNorth,
    /// `{base}/{zoom}/{y}/{x}`
    ZyxYSouth,
    /// `{base}/{zoom}/{flipped_y}/{x}`
    ZyxYNorth,
}

/// One remote tile source: base URL, path layout and file extension.
#[derive(Clone, Debug)]
pub struct TileEndpoint {
    base_url: String,
    pattern: UrlPattern,
    extension: String,
}

impl TileEndpoint {
    /// Creates an endpoint. `extension` is appended as `.{extension}` and
    /// may be empty for servers that take bare paths.
    pub fn new(base_url: impl Into<String>, pattern: UrlPattern, extension: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            pattern,
            extension: extension.into(),
        }
    }

    /// Builds the request URL for `tile`.
    pub fn tile_url(&self, tile: &TileId) -> String {
        let num_y_tiles = 1u32 << tile.zoom;
        let flipped_y = num_y_tiles - tile.y - 1;

        let path = match self.pattern {
            UrlPattern::ZxyYSouth => format!("{}/{}/{}", tile.zoom, tile.x, tile.y),
            UrlPattern::ZxyYNorth => format!("{}/{}/{}", tile.zoom, tile.x, flipped_y),
            UrlPattern::ZyxYSouth => format!("{}/{}/{}", tile.zoom, tile.y, tile.x),
            UrlPattern::ZyxYNorth => format!("{}/{}/{}", tile.zoom, flipped_y, tile.x),
        };

        if self.extension.is_empty() {
            format!("{}/{}", self.base_url, path)
        } else {
            format!("{}/{}.{}", self.base_url, path, self.extension)
        }
    }

    /// File name for the disk tier: `{zoom}-{x}-{y}.{extension}`.
    pub fn disk_file_name(&self, tile: &TileId) -> String {
        if self.extension.is_empty() {
            format!("{}.img", tile)
        } else {
            format!("{}.{}", tile, self.extension)
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }
}
