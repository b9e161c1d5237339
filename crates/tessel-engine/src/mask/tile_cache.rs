use crate::backend::RenderBackend;
use crate::batch::{PrimitiveKind, VertexBatcher};
use crate::config::caps::{
    MASK_CACHE_SPECIAL_TILE_X, MASK_CACHE_SPECIAL_TILE_Y, MASK_TILE_HEIGHT, MASK_TILE_SIZE,
    MASK_TILE_WIDTH,
};
use crate::device::DeviceContext;
use crate::error::{Result, UsageError};

use super::TileSlot;

/// Round-robin allocator over the writable atlas tiles.
///
/// Tiles are not content-addressed: every masked quad takes the next slot.
/// Once all writable slots have been handed out, pending masked quads are
/// flushed before slot 0 is overwritten.
#[derive(Debug)]
pub struct MaskTileCache {
    enabled: bool,
    /// Next slot to hand out; `None` once the atlas is exhausted.
    cursor: Option<TileSlot>,
    scratch: Box<[u8; MASK_TILE_SIZE]>,
}

impl Default for MaskTileCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MaskTileCache {
    pub fn new() -> Self {
        Self {
            enabled: false,
            cursor: Some(TileSlot::FIRST),
            scratch: Box::new([0; MASK_TILE_SIZE]),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Slot the next uploaded mask will use.
    #[inline]
    pub fn next_slot(&self) -> Option<TileSlot> {
        self.cursor
    }

    /// Flushes pending geometry, binds the atlas and restarts at slot 0.
    pub fn enable<B: RenderBackend>(
        &mut self,
        batcher: &mut VertexBatcher,
        ctx: &mut DeviceContext<B>,
    ) -> Result<()> {
        batcher.flush(ctx)?;
        ctx.bind_mask_atlas(true);
        self.cursor = Some(TileSlot::FIRST);
        self.enabled = true;
        log::debug!("mask cache enabled");
        Ok(())
    }

    /// Flushes pending masked quads and unbinds the atlas.
    pub fn disable<B: RenderBackend>(
        &mut self,
        batcher: &mut VertexBatcher,
        ctx: &mut DeviceContext<B>,
    ) -> Result<()> {
        batcher.flush(ctx)?;
        ctx.bind_mask_atlas(false);
        self.enabled = false;
        log::debug!("mask cache disabled");
        Ok(())
    }

    /// Restarts allocation at slot 0 without touching the pipeline, after the
    /// atlas has been recreated.
    pub fn restart(&mut self) {
        self.cursor = Some(TileSlot::FIRST);
    }

    /// Queues a masked quad covering `(dstx, dsty)`-`(dstx + w, dsty + h)`.
    ///
    /// With `mask == None` the quad samples the reserved opaque tile. Otherwise
    /// `w` columns of `h` rows starting at `(srcx, srcy)` in `mask` (row pitch
    /// `stride`) are uploaded into the next tile.
    #[allow(clippy::too_many_arguments)]
    pub fn add_mask_quad<B: RenderBackend>(
        &mut self,
        batcher: &mut VertexBatcher,
        ctx: &mut DeviceContext<B>,
        srcx: u32,
        srcy: u32,
        dstx: i32,
        dsty: i32,
        w: u32,
        h: u32,
        stride: u32,
        mask: Option<&[u8]>,
    ) -> Result<()> {
        if !self.enabled {
            return Err(UsageError::MaskCacheDisabled.into());
        }
        if w > MASK_TILE_WIDTH || h > MASK_TILE_HEIGHT {
            return Err(UsageError::MaskTooLarge { width: w, height: h }.into());
        }
        if w == 0 || h == 0 {
            return Ok(());
        }

        let (tx, ty) = match mask {
            None => (MASK_CACHE_SPECIAL_TILE_X, MASK_CACHE_SPECIAL_TILE_Y),
            Some(mask) => {
                let slot = self.next_writable(batcher, ctx)?;
                self.fill_scratch(mask, srcx, srcy, w, h, stride)?;
                ctx.upload_mask_tile(slot, &self.scratch[..])?;
                slot.origin()
            }
        };

        let (dx, dy) = (dstx as f32, dsty as f32);
        let (tx, ty) = (tx as f32, ty as f32);
        let (w, h) = (w as f32, h as f32);
        batcher.add_quad(
            ctx,
            PrimitiveKind::MaskQuads,
            [dx, dy, dx + w, dy + h],
            [tx, ty, tx + w, ty + h],
        )
    }

    fn next_writable<B: RenderBackend>(
        &mut self,
        batcher: &mut VertexBatcher,
        ctx: &mut DeviceContext<B>,
    ) -> Result<TileSlot> {
        let slot = match self.cursor {
            Some(slot) => slot,
            None => {
                log::trace!("mask atlas exhausted; flushing before reuse");
                batcher.flush(ctx)?;
                TileSlot::FIRST
            }
        };
        self.cursor = slot.next();
        Ok(slot)
    }

    fn fill_scratch(
        &mut self,
        mask: &[u8],
        srcx: u32,
        srcy: u32,
        w: u32,
        h: u32,
        stride: u32,
    ) -> Result<()> {
        let (srcx, srcy, w, stride) = (srcx as usize, srcy as usize, w as usize, stride as usize);
        let needed = (srcy + h as usize - 1) * stride + srcx + w;
        if mask.len() < needed {
            return Err(UsageError::MaskBufferTooSmall { len: mask.len(), needed }.into());
        }

        self.scratch.fill(0);
        let tile_w = MASK_TILE_WIDTH as usize;
        for row in 0..h as usize {
            let src = (srcy + row) * stride + srcx;
            self.scratch[row * tile_w..row * tile_w + w].copy_from_slice(&mask[src..src + w]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::config::caps::MASK_CACHE_MAX_INDEX;
    use crate::RenderError;

    struct Fixture {
        ctx: DeviceContext<SoftwareBackend>,
        batcher: VertexBatcher,
        cache: MaskTileCache,
    }

    impl Fixture {
        fn new() -> Self {
            let mut ctx = DeviceContext::new(SoftwareBackend::new());
            ctx.init().unwrap();
            ctx.begin_frame((64, 64)).unwrap();
            let mut batcher = VertexBatcher::new();
            let mut cache = MaskTileCache::new();
            cache.enable(&mut batcher, &mut ctx).unwrap();
            Self { ctx, batcher, cache }
        }

        fn quad(&mut self, mask: Option<&[u8]>, w: u32, h: u32) -> Result<()> {
            self.cache
                .add_mask_quad(&mut self.batcher, &mut self.ctx, 0, 0, 0, 0, w, h, w, mask)
        }

        fn finish(&mut self) {
            self.cache.disable(&mut self.batcher, &mut self.ctx).unwrap();
            self.ctx.submit().unwrap();
        }
    }

    // ── slot allocation ───────────────────────────────────────────────────

    #[test]
    fn atlas_exhaustion_flushes_before_reuse() {
        let mut fx = Fixture::new();
        let mask = [0x80u8; 16];
        for _ in 0..MASK_CACHE_MAX_INDEX {
            fx.quad(Some(&mask), 4, 4).unwrap();
        }
        assert_eq!(fx.cache.next_slot(), None);
        assert_eq!(fx.batcher.len(), MASK_CACHE_MAX_INDEX * 6);

        // The 32nd masked quad reuses slot 0 after a flush.
        fx.quad(Some(&mask), 4, 4).unwrap();
        assert_eq!(fx.batcher.len(), 6);
        assert_eq!(fx.cache.next_slot(), TileSlot::new(1));

        fx.finish();
        let draws = fx.ctx.backend().draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].vertex_count, MASK_CACHE_MAX_INDEX * 6);
        assert_eq!(draws[1].vertex_count, 6);
        let slots: Vec<_> = fx.ctx.backend().uploads().iter().map(|u| u.slot.index()).collect();
        assert_eq!(slots.len(), MASK_CACHE_MAX_INDEX + 1);
        assert_eq!(slots[..3], [0, 1, 2]);
        assert_eq!(slots[MASK_CACHE_MAX_INDEX], 0);
    }

    #[test]
    fn reserved_tile_is_never_uploaded() {
        let mut fx = Fixture::new();
        let mask = [0xffu8; 4];
        for _ in 0..3 * MASK_CACHE_MAX_INDEX {
            fx.quad(Some(&mask), 2, 2).unwrap();
        }
        fx.finish();
        let backend = fx.ctx.backend();
        assert!(backend.uploads().iter().all(|u| u.slot.origin() != (224, 96)));
        let reserved = backend.mask_tile(MASK_CACHE_SPECIAL_TILE_X, MASK_CACHE_SPECIAL_TILE_Y);
        assert!(reserved.iter().all(|&t| t == 0xff));
    }

    #[test]
    fn unmasked_quad_samples_reserved_tile_without_upload() {
        let mut fx = Fixture::new();
        fx.quad(None, 8, 8).unwrap();
        let v = fx.batcher.pending()[0];
        assert_eq!(v.tex_coord, [224.0, 96.0]);
        fx.finish();
        assert!(fx.ctx.backend().uploads().is_empty());
        assert_eq!(fx.ctx.backend().pixel_rgba8(3, 3), Some([0, 0, 0, 255]));
    }

    #[test]
    fn enable_restarts_the_cursor() {
        let mut fx = Fixture::new();
        fx.quad(Some(&[1; 4]), 2, 2).unwrap();
        assert_eq!(fx.cache.next_slot(), TileSlot::new(1));
        fx.cache.disable(&mut fx.batcher, &mut fx.ctx).unwrap();
        fx.cache.enable(&mut fx.batcher, &mut fx.ctx).unwrap();
        assert_eq!(fx.cache.next_slot(), Some(TileSlot::FIRST));
    }

    // ── copying ───────────────────────────────────────────────────────────

    #[test]
    fn sub_rectangle_is_copied_with_stride() {
        let mut fx = Fixture::new();
        // 4x3 source, copy the 2x2 block at (1, 1).
        let mask: Vec<u8> = (0..12).collect();
        fx.cache
            .add_mask_quad(&mut fx.batcher, &mut fx.ctx, 1, 1, 10, 20, 2, 2, 4, Some(&mask))
            .unwrap();
        assert_eq!(fx.batcher.pending()[0].position, [10.0, 20.0]);
        assert_eq!(fx.batcher.pending()[2].position, [12.0, 22.0]);
        fx.finish();
        let tile = &fx.ctx.backend().uploads()[0].texels;
        assert_eq!(&tile[..3], &[5, 6, 0]);
        assert_eq!(&tile[32..35], &[9, 10, 0]);
        assert!(tile[64..].iter().all(|&t| t == 0));
    }

    // ── rejections ────────────────────────────────────────────────────────

    #[test]
    fn oversize_mask_is_rejected() {
        let mut fx = Fixture::new();
        let err = fx.quad(Some(&[0; 33 * 33]), 33, 1).unwrap_err();
        assert!(matches!(
            err,
            RenderError::InvalidStateTransition(UsageError::MaskTooLarge { width: 33, height: 1 })
        ));
    }

    #[test]
    fn disabled_cache_is_rejected() {
        let mut fx = Fixture::new();
        fx.cache.disable(&mut fx.batcher, &mut fx.ctx).unwrap();
        assert!(matches!(
            fx.quad(None, 1, 1),
            Err(RenderError::InvalidStateTransition(UsageError::MaskCacheDisabled))
        ));
    }

    #[test]
    fn short_mask_buffer_is_rejected() {
        let mut fx = Fixture::new();
        assert!(matches!(
            fx.quad(Some(&[0; 15]), 4, 4),
            Err(RenderError::InvalidStateTransition(UsageError::MaskBufferTooSmall { len: 15, needed: 16 }))
        ));
    }
}
