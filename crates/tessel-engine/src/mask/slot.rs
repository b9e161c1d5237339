use crate::config::caps::{
    MASK_CACHE_MAX_INDEX, MASK_CACHE_WIDTH_IN_TILES, MASK_TILE_HEIGHT, MASK_TILE_WIDTH,
};

/// Writable tile of the mask atlas.
///
/// Only indices `0..MASK_CACHE_MAX_INDEX` are representable, so the reserved
/// opaque tile can never be named as an upload target.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TileSlot(u8);

impl TileSlot {
    pub const FIRST: TileSlot = TileSlot(0);

    #[inline]
    pub fn new(index: usize) -> Option<Self> {
        (index < MASK_CACHE_MAX_INDEX).then_some(Self(index as u8))
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Next slot, or `None` once every writable slot has been used.
    #[inline]
    pub fn next(self) -> Option<Self> {
        Self::new(self.index() + 1)
    }

    /// Texel origin inside the atlas.
    #[inline]
    pub const fn origin(self) -> (u32, u32) {
        let i = self.0 as u32;
        (
            (i % MASK_CACHE_WIDTH_IN_TILES) * MASK_TILE_WIDTH,
            (i / MASK_CACHE_WIDTH_IN_TILES) * MASK_TILE_HEIGHT,
        )
    }
}
