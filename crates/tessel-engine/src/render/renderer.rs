use crate::backend::{ImageId, RenderBackend, SourceImage};
use crate::batch::{PrimitiveKind, VertexBatcher};
use crate::config::caps::{MASK_TILE_HEIGHT, MASK_TILE_WIDTH};
use crate::device::DeviceContext;
use crate::error::{Result, UsageError};
use crate::imageop::{
    ConvolveOp, FilterKind, ImageOp, ImageOpState, LookupOp, LookupTable, RescaleOp,
};
use crate::mask::MaskTileCache;
use crate::paint::Color;

use super::parallelogram::{aa_quad, Parallelogram, Stroke};
use super::shapes::{self, Piece};

/// Immediate-mode renderer for one drawing target.
///
/// Every call appends to the vertex batch; state changes flush first. A
/// failure that abandons the frame also drops the pending batch.
pub struct Renderer<B: RenderBackend> {
    ctx: DeviceContext<B>,
    batcher: VertexBatcher,
    mask_cache: MaskTileCache,
    image_ops: ImageOpState,
    aa_program: bool,
}

impl<B: RenderBackend> Renderer<B> {
    /// Creates a renderer, allocating the atlas and device buffers.
    pub fn new(backend: B) -> Result<Self> {
        let mut ctx = DeviceContext::new(backend);
        ctx.init()?;
        Ok(Self {
            ctx,
            batcher: VertexBatcher::new(),
            mask_cache: MaskTileCache::new(),
            image_ops: ImageOpState::new(),
            aa_program: false,
        })
    }

    #[inline]
    pub fn context(&self) -> &DeviceContext<B> {
        &self.ctx
    }

    #[inline]
    pub fn backend(&self) -> &B {
        self.ctx.backend()
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        self.ctx.backend_mut()
    }

    #[inline]
    pub fn batcher(&self) -> &VertexBatcher {
        &self.batcher
    }

    #[inline]
    pub fn mask_cache(&self) -> &MaskTileCache {
        &self.mask_cache
    }

    #[inline]
    pub fn image_op(&self) -> FilterKind {
        self.image_ops.kind()
    }

    #[inline]
    pub fn is_aa_program_enabled(&self) -> bool {
        self.aa_program
    }

    // ── frame lifecycle ───────────────────────────────────────────────────

    /// Flushes work for the previous target and binds `target`.
    pub fn begin_frame(&mut self, target: B::Target) -> Result<()> {
        let flushed = self.batcher.flush(&mut self.ctx);
        self.guard(flushed)?;
        let begun = self.ctx.begin_frame(target);
        self.guard(begun)
    }

    /// Flushes pending vertices and dispatches the command buffer.
    pub fn submit(&mut self) -> Result<()> {
        let flushed = self.batcher.flush(&mut self.ctx);
        self.guard(flushed)?;
        let submitted = self.ctx.submit();
        self.guard(submitted)
    }

    /// Drops pending vertices and the open command buffer.
    pub fn abandon_frame(&mut self) {
        self.batcher.discard();
        self.ctx.abandon_frame();
    }

    /// Recreates backend objects after [`RenderError::DeviceLost`]. Enabled
    /// states stay enabled; bind a target again before drawing.
    pub fn recover(&mut self) -> Result<()> {
        self.batcher.discard();
        self.ctx.recover()?;
        self.mask_cache.restart();
        Ok(())
    }

    pub fn set_color(&mut self, color: Color) {
        self.ctx.set_color(color);
    }

    #[inline]
    pub fn color(&self) -> Color {
        self.ctx.color()
    }

    /// Submits outstanding work and hands the backend back.
    ///
    /// Fails if an enable was left without its disable; the frame is
    /// abandoned in that case.
    pub fn dispose(mut self) -> Result<B> {
        let unpaired = if self.aa_program {
            Some("antialiased parallelogram program")
        } else if self.mask_cache.is_enabled() {
            Some("mask cache")
        } else if self.image_ops.kind() != FilterKind::None {
            Some("image op")
        } else {
            None
        };
        if let Some(what) = unpaired {
            log::warn!("{what} still enabled at teardown");
            self.abandon_frame();
            return Err(UsageError::UnpairedAtTeardown(what).into());
        }
        self.submit()?;
        Ok(self.ctx.into_backend())
    }

    // ── strokes ───────────────────────────────────────────────────────────

    pub fn draw_line(&mut self, x1: i32, y1: i32, x2: i32, y2: i32) -> Result<()> {
        self.emit(&[shapes::line(x1, y1, x2, y2)])
    }

    pub fn draw_rect(&mut self, x: i32, y: i32, w: i32, h: i32) -> Result<()> {
        self.emit(&shapes::rect_outline(x, y, w, h))
    }

    pub fn draw_poly(
        &mut self,
        xs: &[i32],
        ys: &[i32],
        closed: bool,
        trans_x: i32,
        trans_y: i32,
    ) -> Result<()> {
        self.emit(&shapes::poly(xs, ys, closed, trans_x, trans_y))
    }

    /// Draws scanlines packed as `[x1, x2, y, ...]`, `x2` inclusive.
    pub fn draw_scanlines(&mut self, scanlines: &[i32]) -> Result<()> {
        let pieces: Vec<Piece> = scanlines
            .chunks_exact(3)
            .filter_map(|s| shapes::scanline(s[0], s[1], s[2]))
            .collect();
        self.emit(&pieces)
    }

    // ── fills ─────────────────────────────────────────────────────────────

    pub fn fill_rect(&mut self, x: i32, y: i32, w: i32, h: i32) -> Result<()> {
        if w <= 0 || h <= 0 {
            return Ok(());
        }
        self.emit(&[Piece::rect(x, y, w, h)])
    }

    /// Fills spans packed as `[x1, y1, x2, y2, ...]`, right and bottom exclusive.
    pub fn fill_spans(&mut self, spans: &[i32]) -> Result<()> {
        let pieces: Vec<Piece> = spans
            .chunks_exact(4)
            .filter(|s| s[2] > s[0] && s[3] > s[1])
            .map(|s| Piece::Span { x1: s[0], y1: s[1], x2: s[2], y2: s[3] })
            .collect();
        self.emit(&pieces)
    }

    pub fn fill_parallelogram(
        &mut self,
        fx11: f32,
        fy11: f32,
        dx21: f32,
        dy21: f32,
        dx12: f32,
        dy12: f32,
    ) -> Result<()> {
        let p = Parallelogram::new(fx11, fy11, dx21, dy21, dx12, dy12);
        let added = self
            .batcher
            .add_vertices(&mut self.ctx, PrimitiveKind::Triangles, &p.triangles());
        self.guard(added)
    }

    /// Strokes a parallelogram; `lw21`/`lw12` are widths as fractions of the
    /// corresponding edge vector.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_parallelogram(
        &mut self,
        fx11: f32,
        fy11: f32,
        dx21: f32,
        dy21: f32,
        dx12: f32,
        dy12: f32,
        lw21: f32,
        lw12: f32,
    ) -> Result<()> {
        let p = Parallelogram::new(fx11, fy11, dx21, dy21, dx12, dy12);
        let parts: Vec<Parallelogram> = match p.stroke(lw21, lw12) {
            Stroke::Filled(outer) => vec![outer],
            Stroke::Edges(edges) => edges.to_vec(),
        };
        for part in parts {
            let added = self
                .batcher
                .add_vertices(&mut self.ctx, PrimitiveKind::Triangles, &part.triangles());
            self.guard(added)?;
        }
        Ok(())
    }

    // ── antialiased parallelograms ────────────────────────────────────────

    pub fn enable_aa_parallelogram_program(&mut self) -> Result<()> {
        if self.aa_program {
            return Err(UsageError::AaProgramActive.into());
        }
        let flushed = self.batcher.flush(&mut self.ctx);
        self.guard(flushed)?;
        self.ctx.set_aa_program(true);
        self.aa_program = true;
        Ok(())
    }

    pub fn disable_aa_parallelogram_program(&mut self) -> Result<()> {
        if !self.aa_program {
            return Err(UsageError::AaProgramInactive.into());
        }
        let flushed = self.batcher.flush(&mut self.ctx);
        self.guard(flushed)?;
        self.ctx.set_aa_program(false);
        self.aa_program = false;
        Ok(())
    }

    pub fn fill_aa_parallelogram(
        &mut self,
        fx11: f32,
        fy11: f32,
        dx21: f32,
        dy21: f32,
        dx12: f32,
        dy12: f32,
    ) -> Result<()> {
        let outer = Parallelogram::new(fx11, fy11, dx21, dy21, dx12, dy12);
        self.emit_aa(&outer, None)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn draw_aa_parallelogram(
        &mut self,
        fx11: f32,
        fy11: f32,
        dx21: f32,
        dy21: f32,
        dx12: f32,
        dy12: f32,
        lw21: f32,
        lw12: f32,
    ) -> Result<()> {
        let p = Parallelogram::new(fx11, fy11, dx21, dy21, dx12, dy12);
        let (outer, inner) = p.aa_stroke(lw21, lw12);
        self.emit_aa(&outer, inner.as_ref())
    }

    fn emit_aa(&mut self, outer: &Parallelogram, inner: Option<&Parallelogram>) -> Result<()> {
        if !self.aa_program {
            return Err(UsageError::AaProgramInactive.into());
        }
        let Some(quad) = aa_quad(outer, inner) else {
            return Ok(());
        };
        let added = self
            .batcher
            .add_vertices(&mut self.ctx, PrimitiveKind::AaParallelograms, &quad);
        self.guard(added)
    }

    // ── masks and glyphs ──────────────────────────────────────────────────

    pub fn enable_mask_cache(&mut self) -> Result<()> {
        let enabled = self.mask_cache.enable(&mut self.batcher, &mut self.ctx);
        self.guard(enabled)
    }

    pub fn disable_mask_cache(&mut self) -> Result<()> {
        let disabled = self.mask_cache.disable(&mut self.batcher, &mut self.ctx);
        self.guard(disabled)
    }

    /// Queues one masked quad of at most one tile. See
    /// [`MaskTileCache::add_mask_quad`].
    #[allow(clippy::too_many_arguments)]
    pub fn add_mask_quad(
        &mut self,
        srcx: u32,
        srcy: u32,
        dstx: i32,
        dsty: i32,
        w: u32,
        h: u32,
        stride: u32,
        mask: Option<&[u8]>,
    ) -> Result<()> {
        let added = self.mask_cache.add_mask_quad(
            &mut self.batcher,
            &mut self.ctx,
            srcx,
            srcy,
            dstx,
            dsty,
            w,
            h,
            stride,
            mask,
        );
        self.guard(added)
    }

    /// Fills `(x, y, w, h)` through `mask`, starting at `mask_offset` with
    /// row pitch `mask_scan`, split into tile-sized pieces. `None` fills
    /// through the opaque tile. The mask cache must be enabled.
    #[allow(clippy::too_many_arguments)]
    pub fn mask_fill(
        &mut self,
        x: i32,
        y: i32,
        w: u32,
        h: u32,
        mask_offset: usize,
        mask_scan: u32,
        mask: Option<&[u8]>,
    ) -> Result<()> {
        let mask = match mask {
            Some(m) if mask_offset > m.len() => {
                return Err(UsageError::MaskBufferTooSmall {
                    len: m.len(),
                    needed: mask_offset,
                }
                .into());
            }
            Some(m) => Some(&m[mask_offset..]),
            None => None,
        };
        for sy in (0..h).step_by(MASK_TILE_HEIGHT as usize) {
            let sh = (h - sy).min(MASK_TILE_HEIGHT);
            for sx in (0..w).step_by(MASK_TILE_WIDTH as usize) {
                let sw = (w - sx).min(MASK_TILE_WIDTH);
                self.add_mask_quad(
                    sx,
                    sy,
                    offset_clamped(x, sx),
                    offset_clamped(y, sy),
                    sw,
                    sh,
                    mask_scan,
                    mask,
                )?;
            }
        }
        Ok(())
    }

    /// Queues a glyph quad sampling the coverage texture `glyph`, with texture
    /// coordinates in texels.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_glyph_quad(
        &mut self,
        glyph: ImageId,
        tx1: f32,
        ty1: f32,
        tx2: f32,
        ty2: f32,
        dx1: f32,
        dy1: f32,
        dx2: f32,
        dy2: f32,
    ) -> Result<()> {
        if self.ctx.pipeline().glyph_source != Some(glyph) {
            let flushed = self.batcher.flush(&mut self.ctx);
            self.guard(flushed)?;
            self.ctx.bind_glyph_source(Some(glyph));
        }
        let added = self
            .batcher
            .add_glyph_quad(&mut self.ctx, tx1, ty1, tx2, ty2, dx1, dy1, dx2, dy2);
        self.guard(added)
    }

    // ── images ────────────────────────────────────────────────────────────

    /// Draws the `src` region `(sx1, sy1)`-`(sx2, sy2)` (texels) into
    /// `(dx1, dy1)`-`(dx2, dy2)` through the active image op, if any. Alpha
    /// is modulated by the current color's alpha.
    #[allow(clippy::too_many_arguments)]
    pub fn blit_image(
        &mut self,
        src: SourceImage,
        sx1: f32,
        sy1: f32,
        sx2: f32,
        sy2: f32,
        dx1: f32,
        dy1: f32,
        dx2: f32,
        dy2: f32,
    ) -> Result<()> {
        if let Some(active) = self.image_ops.source() {
            if active != src {
                return Err(UsageError::SourceMismatch.into());
            }
        }
        if self.ctx.pipeline().image_source != Some(src) {
            let flushed = self.batcher.flush(&mut self.ctx);
            self.guard(flushed)?;
            self.ctx.bind_image_source(Some(src));
        }
        let added = self.batcher.add_quad(
            &mut self.ctx,
            PrimitiveKind::ImageQuads,
            [dx1, dy1, dx2, dy2],
            [sx1, sy1, sx2, sy2],
        );
        self.guard(added)
    }

    pub fn enable_convolve_op(
        &mut self,
        src: SourceImage,
        edge_zero_fill: bool,
        kernel_width: u32,
        kernel_height: u32,
        values: &[f32],
    ) -> Result<()> {
        let op = ConvolveOp::new(edge_zero_fill, kernel_width, kernel_height, values)?;
        self.enable_op(src, ImageOp::Convolve(op))
    }

    pub fn disable_convolve_op(&mut self) -> Result<()> {
        self.disable_op(Some(FilterKind::Convolve))
    }

    pub fn enable_rescale_op(
        &mut self,
        src: SourceImage,
        non_premultiplied: bool,
        scale: &[f32],
        offset: &[f32],
    ) -> Result<()> {
        let op = RescaleOp::new(non_premultiplied, scale, offset)?;
        self.enable_op(src, ImageOp::Rescale(op))
    }

    pub fn disable_rescale_op(&mut self) -> Result<()> {
        self.disable_op(Some(FilterKind::Rescale))
    }

    /// Enables a lookup op. Element width follows the table variant.
    pub fn enable_lookup_op(
        &mut self,
        src: SourceImage,
        non_premultiplied: bool,
        num_bands: usize,
        band_length: usize,
        offset: i32,
        tables: LookupTable,
    ) -> Result<()> {
        let op = LookupOp::new(non_premultiplied, num_bands, band_length, offset, tables)?;
        self.enable_op(src, ImageOp::Lookup(op))
    }

    pub fn disable_lookup_op(&mut self) -> Result<()> {
        self.disable_op(Some(FilterKind::Lookup))
    }

    /// Disables whichever image op is active; no-op when none is.
    pub fn disable_current_op(&mut self) -> Result<()> {
        self.disable_op(None)
    }

    fn enable_op(&mut self, src: SourceImage, op: ImageOp) -> Result<()> {
        let enabled = self.image_ops.enable(&mut self.batcher, &mut self.ctx, src, op);
        self.guard(enabled)
    }

    fn disable_op(&mut self, expected: Option<FilterKind>) -> Result<()> {
        let disabled = self.image_ops.disable(&mut self.batcher, &mut self.ctx, expected);
        self.guard(disabled)
    }

    // ── helpers ───────────────────────────────────────────────────────────

    fn emit(&mut self, pieces: &[Piece]) -> Result<()> {
        for piece in pieces {
            let added = match *piece {
                Piece::Span { x1, y1, x2, y2 } => self.batcher.add_vertices(
                    &mut self.ctx,
                    PrimitiveKind::Triangles,
                    &shapes::quad(x1 as f32, y1 as f32, x2 as f32, y2 as f32),
                ),
                Piece::Segment { x1, y1, x2, y2 } => self.batcher.add_vertices(
                    &mut self.ctx,
                    PrimitiveKind::Lines,
                    &shapes::segment_vertices(x1, y1, x2, y2),
                ),
            };
            self.guard(added)?;
        }
        Ok(())
    }

    /// Drops the pending batch when `result` abandoned the frame.
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.abandons_frame() {
                self.batcher.discard();
            }
        }
        result
    }
}

impl<B: RenderBackend> std::fmt::Debug for Renderer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("batch_kind", &self.batcher.kind())
            .field("pending", &self.batcher.len())
            .field("mask_cache", &self.mask_cache.is_enabled())
            .field("image_op", &self.image_ops.kind())
            .field("aa_program", &self.aa_program)
            .finish()
    }
}

/// `base + offset`, clamped to the `i32` range.
fn offset_clamped(base: i32, offset: u32) -> i32 {
    let v = i64::from(base) + i64::from(offset);
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Fault, SoftwareBackend};
    use crate::config::caps::MASK_CACHE_MAX_INDEX;
    use crate::error::RenderError;

    const RED: Color = Color::from_premul(1.0, 0.0, 0.0, 1.0);

    fn renderer(w: u32, h: u32) -> Renderer<SoftwareBackend> {
        let mut r = Renderer::new(SoftwareBackend::new()).unwrap();
        r.begin_frame((w, h)).unwrap();
        r
    }

    fn alpha(r: &Renderer<SoftwareBackend>, x: u32, y: u32) -> u8 {
        r.backend().pixel_rgba8(x, y).map_or(0, |p| p[3])
    }

    fn lit(r: &Renderer<SoftwareBackend>, w: u32, h: u32) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        for y in 0..h {
            for x in 0..w {
                if alpha(r, x, y) > 0 {
                    out.push((x, y));
                }
            }
        }
        out
    }

    fn checker(backend: &mut SoftwareBackend) -> (SourceImage, Vec<u8>) {
        let mut rgba = Vec::new();
        for i in 0..16u8 {
            let a = 128 + i * 8;
            rgba.extend_from_slice(&[a / 2, i * 4, a / 3, a]);
        }
        let src = backend.add_image_rgba8(4, 4, &rgba).unwrap();
        (src, rgba)
    }

    // ── construction and teardown ─────────────────────────────────────────

    #[test]
    fn init_failure_is_backend_unavailable() {
        let mut backend = SoftwareBackend::new();
        backend.inject_fault(Fault::Exhausted);
        assert!(matches!(
            Renderer::new(backend),
            Err(RenderError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn dispose_checks_pairing() {
        let mut r = renderer(4, 4);
        r.enable_aa_parallelogram_program().unwrap();
        assert!(matches!(
            r.dispose(),
            Err(RenderError::InvalidStateTransition(UsageError::UnpairedAtTeardown(_)))
        ));

        let mut r = renderer(4, 4);
        r.fill_rect(0, 0, 2, 2).unwrap();
        let backend = r.dispose().unwrap();
        assert_eq!(backend.draws().len(), 1);
    }

    // ── strokes and fills ─────────────────────────────────────────────────

    #[test]
    fn fill_rect_covers_exact_pixels() {
        let mut r = renderer(8, 8);
        r.set_color(RED);
        r.fill_rect(2, 1, 3, 2).unwrap();
        r.submit().unwrap();
        assert_eq!(lit(&r, 8, 8), vec![(2, 1), (3, 1), (4, 1), (2, 2), (3, 2), (4, 2)]);
        assert_eq!(r.backend().pixel_rgba8(3, 1), Some([255, 0, 0, 255]));
    }

    #[test]
    fn geometry_near_the_coordinate_limit_is_clipped() {
        let mut r = renderer(8, 8);
        r.fill_rect(i32::MAX - 4, 0, 16, 4).unwrap();
        r.draw_rect(i32::MAX - 2, 0, 8, 8).unwrap();
        r.draw_line(i32::MAX - 3, 2, i32::MAX, 2).unwrap();
        r.draw_line(i32::MAX, 0, i32::MAX - 5, 3).unwrap();
        r.draw_scanlines(&[i32::MAX - 1, i32::MAX, i32::MAX]).unwrap();
        r.draw_poly(&[0, 4], &[5, 5], false, i32::MAX, 0).unwrap();
        r.enable_mask_cache().unwrap();
        r.mask_fill(i32::MAX - 40, 0, 64, 8, 0, 0, None).unwrap();
        r.disable_mask_cache().unwrap();
        r.fill_rect(1, 1, 2, 2).unwrap();
        r.submit().unwrap();

        assert_eq!(lit(&r, 8, 8), vec![(1, 1), (2, 1), (1, 2), (2, 2)]);
    }

    #[test]
    fn mask_offsets_are_clamped() {
        assert_eq!(offset_clamped(i32::MAX - 8, 32), i32::MAX);
        assert_eq!(offset_clamped(-4, 32), 28);
        assert_eq!(offset_clamped(i32::MIN, u32::MAX), i32::MAX);
    }

    #[test]
    fn draw_rect_outlines_inclusive_bounds() {
        let mut r = renderer(8, 8);
        r.draw_rect(1, 1, 3, 2).unwrap();
        r.submit().unwrap();
        let px = lit(&r, 8, 8);
        assert_eq!(px.len(), 10);
        assert!(px.contains(&(4, 3)) && px.contains(&(1, 1)));
        assert!(!px.contains(&(2, 2)));
        assert_eq!(r.backend().draws().len(), 1);
    }

    #[test]
    fn diagonal_line_covers_both_endpoints() {
        let mut r = renderer(8, 8);
        r.draw_line(0, 0, 4, 2).unwrap();
        r.submit().unwrap();
        let px = lit(&r, 8, 8);
        assert!(px.contains(&(0, 0)) && px.contains(&(4, 2)));
        assert_eq!(px.len(), 5);
        assert_eq!(r.backend().draws()[0].kind, PrimitiveKind::Lines);
    }

    #[test]
    fn closed_poly_touches_every_vertex_once() {
        let mut r = renderer(8, 8);
        r.set_color(Color::from_premul(0.5, 0.0, 0.0, 0.5));
        r.draw_poly(&[1, 5, 5, 1], &[1, 1, 5, 5], true, 0, 0).unwrap();
        r.submit().unwrap();
        // Any double coverage would push alpha above 128.
        let px = lit(&r, 8, 8);
        assert_eq!(px.len(), 16);
        assert!(px.iter().all(|&(x, y)| alpha(&r, x, y) == 128));
    }

    #[test]
    fn scanlines_and_spans_batch_together() {
        let mut r = renderer(8, 8);
        r.draw_scanlines(&[0, 2, 0, 4, 4, 1]).unwrap();
        r.fill_spans(&[0, 3, 2, 5, 6, 6, 6, 7]).unwrap();
        r.submit().unwrap();
        assert_eq!(r.backend().draws().len(), 1);
        assert_eq!(r.backend().draws()[0].vertex_count, 18);
        assert_eq!(lit(&r, 8, 8).len(), 3 + 1 + 4);
    }

    #[test]
    fn thin_parallelogram_stroke_leaves_interior_empty() {
        let mut r = renderer(16, 16);
        r.draw_parallelogram(2.0, 2.0, 10.0, 0.0, 0.0, 10.0, 0.2, 0.2).unwrap();
        r.submit().unwrap();
        assert_eq!(alpha(&r, 1, 1), 255);
        assert_eq!(alpha(&r, 7, 7), 0);
        assert_eq!(alpha(&r, 12, 7), 255);
        assert_eq!(r.backend().draws()[0].vertex_count, 24);
    }

    #[test]
    fn fill_parallelogram_is_two_triangles() {
        let mut r = renderer(8, 8);
        r.fill_parallelogram(1.0, 1.0, 4.0, 0.0, 2.0, 4.0).unwrap();
        r.submit().unwrap();
        assert_eq!(r.backend().draws()[0].vertex_count, 6);
        assert_eq!(alpha(&r, 4, 3), 255);
        assert_eq!(alpha(&r, 1, 4), 0);
    }

    // ── antialiased parallelograms ────────────────────────────────────────

    #[test]
    fn aa_program_must_be_paired() {
        let mut r = renderer(8, 8);
        assert!(matches!(
            r.fill_aa_parallelogram(0.0, 0.0, 1.0, 0.0, 0.0, 1.0),
            Err(RenderError::InvalidStateTransition(UsageError::AaProgramInactive))
        ));
        r.enable_aa_parallelogram_program().unwrap();
        assert!(matches!(
            r.enable_aa_parallelogram_program(),
            Err(RenderError::InvalidStateTransition(UsageError::AaProgramActive))
        ));
        r.disable_aa_parallelogram_program().unwrap();
        assert!(r.disable_aa_parallelogram_program().is_err());
    }

    #[test]
    fn aa_fill_has_partial_edge_coverage() {
        let mut r = renderer(12, 12);
        r.enable_aa_parallelogram_program().unwrap();
        r.fill_aa_parallelogram(2.5, 2.0, 4.0, 0.0, 0.0, 4.0).unwrap();
        r.disable_aa_parallelogram_program().unwrap();
        r.submit().unwrap();
        assert_eq!(alpha(&r, 4, 3), 255);
        let edge = alpha(&r, 2, 3);
        assert!((127..=128).contains(&edge), "edge alpha {edge}");
        assert_eq!(alpha(&r, 9, 9), 0);
        let draw = &r.backend().draws()[0];
        assert!(draw.state.aa_program);
        assert_eq!(draw.kind, PrimitiveKind::AaParallelograms);
    }

    #[test]
    fn aa_stroke_subtracts_inner_coverage() {
        let mut r = renderer(12, 12);
        r.enable_aa_parallelogram_program().unwrap();
        r.draw_aa_parallelogram(1.0, 1.0, 10.0, 0.0, 0.0, 10.0, 0.2, 0.2).unwrap();
        r.disable_aa_parallelogram_program().unwrap();
        r.submit().unwrap();
        assert_eq!(alpha(&r, 6, 6), 0);
        assert_eq!(alpha(&r, 1, 6), 255);
        assert_eq!(alpha(&r, 6, 0), 255);
    }

    // ── masks and glyphs ──────────────────────────────────────────────────

    #[test]
    fn mask_fill_tiles_large_masks() {
        let mut r = renderer(48, 48);
        r.enable_mask_cache().unwrap();
        let mask = vec![0xffu8; 2 + 40 * 36];
        r.mask_fill(4, 4, 40, 36, 2, 40, Some(mask.as_slice())).unwrap();
        r.disable_mask_cache().unwrap();
        r.submit().unwrap();
        let uploads = r.backend().uploads();
        assert_eq!(uploads.len(), 4);
        assert_eq!(lit(&r, 48, 48).len(), 40 * 36);
        assert_eq!(alpha(&r, 43, 39), 255);
    }

    #[test]
    fn mask_fill_requires_enabled_cache() {
        let mut r = renderer(8, 8);
        assert!(matches!(
            r.mask_fill(0, 0, 4, 4, 0, 4, None),
            Err(RenderError::InvalidStateTransition(UsageError::MaskCacheDisabled))
        ));
    }

    #[test]
    fn mask_coverage_scales_color() {
        let mut r = renderer(8, 8);
        r.set_color(RED);
        r.enable_mask_cache().unwrap();
        let mask: [u8; 4] = [0x00, 0x80, 0xff, 0x40];
        r.add_mask_quad(0, 0, 1, 1, 2, 2, 2, Some(&mask[..])).unwrap();
        r.disable_mask_cache().unwrap();
        r.submit().unwrap();
        assert_eq!(r.backend().pixel_rgba8(1, 1), Some([0, 0, 0, 0]));
        assert_eq!(r.backend().pixel_rgba8(2, 1), Some([128, 0, 0, 128]));
        assert_eq!(r.backend().pixel_rgba8(1, 2), Some([255, 0, 0, 255]));
    }

    #[test]
    fn full_atlas_cycle_flushes_once() {
        let mut r = renderer(8, 8);
        r.enable_mask_cache().unwrap();
        let mask = [1u8; 4];
        for _ in 0..=MASK_CACHE_MAX_INDEX {
            r.add_mask_quad(0, 0, 0, 0, 2, 2, 2, Some(&mask[..])).unwrap();
        }
        assert_eq!(r.batcher().flush_count(), 1);
        r.disable_mask_cache().unwrap();
        r.submit().unwrap();
        assert_eq!(r.backend().draws().len(), 2);
    }

    #[test]
    fn glyph_quads_sample_their_texture() {
        let mut r = renderer(8, 8);
        let glyph = r.backend_mut().add_coverage(2, 1, &[255, 0]).unwrap();
        r.draw_glyph_quad(glyph, 0.0, 0.0, 2.0, 1.0, 3.0, 3.0, 5.0, 4.0).unwrap();
        r.submit().unwrap();
        assert_eq!(alpha(&r, 3, 3), 255);
        assert_eq!(alpha(&r, 4, 3), 0);
        assert_eq!(r.backend().draws()[0].state.glyph_source, Some(glyph));
    }

    // ── image ops ─────────────────────────────────────────────────────────

    #[test]
    fn identity_rescale_reproduces_source() {
        let mut r = renderer(4, 4);
        let (src, rgba) = checker(r.backend_mut());
        r.enable_rescale_op(src, false, &[1.0, 1.0, 1.0, 1.0], &[0.0, 0.0, 0.0, 0.0]).unwrap();
        r.blit_image(src, 0.0, 0.0, 4.0, 4.0, 0.0, 0.0, 4.0, 4.0).unwrap();
        r.disable_rescale_op().unwrap();
        r.submit().unwrap();
        for (i, expected) in rgba.chunks_exact(4).enumerate() {
            let (x, y) = (i as u32 % 4, i as u32 / 4);
            assert_eq!(r.backend().pixel_rgba8(x, y).unwrap(), expected, "texel {x},{y}");
        }
    }

    #[test]
    fn identity_convolve_zero_fills_edges() {
        let mut r = renderer(4, 4);
        let (src, rgba) = checker(r.backend_mut());
        let kernel = [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        r.enable_convolve_op(src, true, 3, 3, &kernel).unwrap();
        r.blit_image(src, 0.0, 0.0, 4.0, 4.0, 0.0, 0.0, 4.0, 4.0).unwrap();
        r.disable_current_op().unwrap();
        r.submit().unwrap();
        for y in 0..4u32 {
            for x in 0..4u32 {
                let px = r.backend().pixel_rgba8(x, y).unwrap();
                let interior = (1..3).contains(&x) && (1..3).contains(&y);
                if interior {
                    let i = ((y * 4 + x) * 4) as usize;
                    assert_eq!(px, rgba[i..i + 4], "interior {x},{y}");
                } else {
                    assert_eq!(px, [0; 4], "edge {x},{y}");
                }
            }
        }
    }

    #[test]
    fn lookup_remaps_channels() {
        let mut r = renderer(1, 1);
        let src = r.backend_mut().add_image_rgba8(1, 1, &[10, 20, 30, 255]).unwrap();
        let table: Vec<u8> = (0..=255u8).map(|v| 255 - v).collect();
        r.enable_lookup_op(src, false, 1, 256, 0, LookupTable::Bytes(table)).unwrap();
        r.blit_image(src, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0).unwrap();
        r.disable_lookup_op().unwrap();
        r.submit().unwrap();
        assert_eq!(r.backend().pixel_rgba8(0, 0), Some([245, 235, 225, 255]));
    }

    #[test]
    fn second_image_op_is_rejected_without_side_effects() {
        let mut r = renderer(4, 4);
        let (src, _) = checker(r.backend_mut());
        r.enable_rescale_op(src, false, &[1.0], &[0.0]).unwrap();
        let err = r.enable_convolve_op(src, false, 1, 1, &[1.0]).unwrap_err();
        assert!(matches!(err, RenderError::InvalidStateTransition(_)));
        assert_eq!(r.image_op(), FilterKind::Rescale);
        assert!(r.disable_convolve_op().is_err());
        r.disable_rescale_op().unwrap();
    }

    #[test]
    fn oversized_kernel_is_an_invalid_kernel() {
        let mut r = renderer(4, 4);
        let (src, _) = checker(r.backend_mut());
        assert!(matches!(
            r.enable_convolve_op(src, false, 65536, 65537, &[]),
            Err(RenderError::InvalidStateTransition(UsageError::InvalidKernel { .. }))
        ));
        assert_eq!(r.image_op(), FilterKind::None);
    }

    #[test]
    fn blit_source_must_match_active_op() {
        let mut r = renderer(4, 4);
        let (src, _) = checker(r.backend_mut());
        let (other, _) = checker(r.backend_mut());
        r.enable_rescale_op(src, false, &[1.0], &[0.0]).unwrap();
        assert!(matches!(
            r.blit_image(other, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0),
            Err(RenderError::InvalidStateTransition(UsageError::SourceMismatch))
        ));
        r.disable_current_op().unwrap();
        r.blit_image(other, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0).unwrap();
    }

    #[test]
    fn plain_blit_switches_sources_between_batches() {
        let mut r = renderer(8, 4);
        let (a, _) = checker(r.backend_mut());
        let (b, _) = checker(r.backend_mut());
        r.blit_image(a, 0.0, 0.0, 4.0, 4.0, 0.0, 0.0, 4.0, 4.0).unwrap();
        r.blit_image(b, 0.0, 0.0, 4.0, 4.0, 4.0, 0.0, 8.0, 4.0).unwrap();
        r.submit().unwrap();
        let sources: Vec<_> = r
            .backend()
            .draws()
            .iter()
            .map(|d| d.state.image_source.map(|s| s.id))
            .collect();
        assert_eq!(sources, vec![Some(a.id), Some(b.id)]);
    }

    // ── failures ──────────────────────────────────────────────────────────

    #[test]
    fn exhausted_flush_abandons_the_frame() {
        let mut r = renderer(8, 8);
        r.fill_rect(0, 0, 4, 4).unwrap();
        r.backend_mut().inject_fault(Fault::Exhausted);
        assert!(matches!(r.submit(), Err(RenderError::ResourceExhausted(_))));
        assert!(r.batcher().is_empty());
        r.submit().unwrap();
        assert!(r.backend().draws().is_empty());
    }

    #[test]
    fn device_loss_requires_recovery() {
        let mut r = renderer(8, 8);
        r.enable_mask_cache().unwrap();
        r.add_mask_quad(0, 0, 0, 0, 1, 1, 1, Some(&[9u8][..])).unwrap();
        r.backend_mut().inject_fault(Fault::DeviceLost);
        assert!(matches!(r.submit(), Err(RenderError::DeviceLost)));
        assert!(matches!(r.begin_frame((8, 8)), Err(RenderError::DeviceLost)));

        r.recover().unwrap();
        assert_eq!(r.backend().resets(), 1);
        r.begin_frame((8, 8)).unwrap();
        r.add_mask_quad(0, 0, 0, 0, 1, 1, 1, Some(&[9u8][..])).unwrap();
        r.disable_mask_cache().unwrap();
        r.submit().unwrap();
        assert_eq!(r.backend().uploads()[0].slot.index(), 0);
    }
}
