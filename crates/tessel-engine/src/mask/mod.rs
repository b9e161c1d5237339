//! Mask tile cache: a fixed 8x4 atlas of 32x32 coverage tiles.

mod slot;
mod tile_cache;

pub use slot::TileSlot;
pub use tile_cache::MaskTileCache;
