/// Maximum number of vertices held by one batch.
pub const MAX_INDEX: usize = 1024;

/// Mask tile dimensions in texels.
pub const MASK_TILE_WIDTH: u32 = 32;
pub const MASK_TILE_HEIGHT: u32 = 32;
pub const MASK_TILE_SIZE: usize = (MASK_TILE_WIDTH * MASK_TILE_HEIGHT) as usize;

/// Mask atlas grid, in tiles.
pub const MASK_CACHE_WIDTH_IN_TILES: u32 = 8;
pub const MASK_CACHE_HEIGHT_IN_TILES: u32 = 4;

pub const MASK_CACHE_WIDTH_IN_TEXELS: u32 = MASK_TILE_WIDTH * MASK_CACHE_WIDTH_IN_TILES;
pub const MASK_CACHE_HEIGHT_IN_TEXELS: u32 = MASK_TILE_HEIGHT * MASK_CACHE_HEIGHT_IN_TILES;

/// Number of writable tiles. The last grid position is the reserved opaque tile.
pub const MASK_CACHE_MAX_INDEX: usize =
    (MASK_CACHE_WIDTH_IN_TILES * MASK_CACHE_HEIGHT_IN_TILES) as usize - 1;

/// Texel origin of the reserved, always-opaque tile.
pub const MASK_CACHE_SPECIAL_TILE_X: u32 = MASK_CACHE_WIDTH_IN_TEXELS - MASK_TILE_WIDTH;
pub const MASK_CACHE_SPECIAL_TILE_Y: u32 = MASK_CACHE_HEIGHT_IN_TEXELS - MASK_TILE_HEIGHT;

/// Payload sizes of the buffered command stream.
pub const BYTES_PER_POLY_POINT: usize = 8;
pub const BYTES_PER_SCANLINE: usize = 12;
pub const BYTES_PER_SPAN: usize = 16;

/// Largest convolution kernel (taps) and lookup table (entries per band).
pub const MAX_KERNEL_ENTRIES: usize = 25;
pub const MAX_LOOKUP_ENTRIES: usize = 256;

/// Capacity constants as a value, for encoders negotiating with this backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    pub max_index: usize,
    pub tile_width: u32,
    pub tile_height: u32,
    pub width_in_tiles: u32,
    pub height_in_tiles: u32,
    pub reserved_tile: (u32, u32),
}

impl CacheLayout {
    pub const STANDARD: CacheLayout = CacheLayout {
        max_index: MAX_INDEX,
        tile_width: MASK_TILE_WIDTH,
        tile_height: MASK_TILE_HEIGHT,
        width_in_tiles: MASK_CACHE_WIDTH_IN_TILES,
        height_in_tiles: MASK_CACHE_HEIGHT_IN_TILES,
        reserved_tile: (MASK_CACHE_SPECIAL_TILE_X, MASK_CACHE_SPECIAL_TILE_Y),
    };

    /// Atlas extent in texels.
    #[inline]
    pub const fn atlas_size(&self) -> (u32, u32) {
        (
            self.tile_width * self.width_in_tiles,
            self.tile_height * self.height_in_tiles,
        )
    }

    /// Writable tiles (grid size minus the reserved tile).
    #[inline]
    pub const fn writable_tiles(&self) -> usize {
        (self.width_in_tiles * self.height_in_tiles) as usize - 1
    }
}

impl Default for CacheLayout {
    fn default() -> Self {
        Self::STANDARD
    }
}
