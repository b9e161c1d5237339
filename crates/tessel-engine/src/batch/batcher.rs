use crate::backend::RenderBackend;
use crate::config::caps::MAX_INDEX;
use crate::device::DeviceContext;
use crate::error::{Result, UsageError};

use super::{PrimitiveKind, Vertex};

/// Fixed-capacity vertex batch of a single primitive kind.
///
/// Vertices are stamped with the context's current color when appended. A
/// full batch is flushed before the next vertex goes in, so the pending length
/// never exceeds [`MAX_INDEX`].
#[derive(Debug)]
pub struct VertexBatcher {
    kind: Option<PrimitiveKind>,
    vertices: Vec<Vertex>,
    flushes: u64,
}

impl Default for VertexBatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl VertexBatcher {
    pub fn new() -> Self {
        Self {
            kind: None,
            vertices: Vec::with_capacity(MAX_INDEX),
            flushes: 0,
        }
    }

    /// Kind of the open batch.
    #[inline]
    pub fn kind(&self) -> Option<PrimitiveKind> {
        self.kind
    }

    #[inline]
    pub fn pending(&self) -> &[Vertex] {
        &self.vertices
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Number of non-empty flushes so far.
    #[inline]
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    /// Opens a batch of `kind`, flushing an open batch of another kind first.
    pub fn begin_batch<B: RenderBackend>(
        &mut self,
        ctx: &mut DeviceContext<B>,
        kind: PrimitiveKind,
    ) -> Result<()> {
        if self.kind != Some(kind) {
            self.flush(ctx)?;
            self.kind = Some(kind);
        }
        Ok(())
    }

    /// Appends one vertex to the open batch, flushing first when full.
    pub fn add_vertex<B: RenderBackend>(
        &mut self,
        ctx: &mut DeviceContext<B>,
        mut vertex: Vertex,
    ) -> Result<()> {
        if self.kind.is_none() {
            return Err(UsageError::NoOpenBatch.into());
        }
        if self.vertices.len() == MAX_INDEX {
            self.flush(ctx)?;
        }
        vertex.color = ctx.packed_color();
        self.vertices.push(vertex);
        Ok(())
    }

    /// Appends a whole primitive group of `kind`. The group is never split
    /// across draw calls: the batch is flushed first when it would not fit.
    pub fn add_vertices<B: RenderBackend>(
        &mut self,
        ctx: &mut DeviceContext<B>,
        kind: PrimitiveKind,
        group: &[Vertex],
    ) -> Result<()> {
        if group.len() > MAX_INDEX {
            return Err(UsageError::GroupTooLarge {
                len: group.len(),
                capacity: MAX_INDEX,
            }
            .into());
        }
        self.begin_batch(ctx, kind)?;
        if self.vertices.len() + group.len() > MAX_INDEX {
            self.flush(ctx)?;
        }
        let color = ctx.packed_color();
        self.vertices
            .extend(group.iter().map(|v| Vertex { color, ..*v }));
        Ok(())
    }

    /// Appends an axis-aligned quad (two triangles) spanning `dst` and mapped
    /// to `tex`; both are `[x1, y1, x2, y2]`.
    pub fn add_quad<B: RenderBackend>(
        &mut self,
        ctx: &mut DeviceContext<B>,
        kind: PrimitiveKind,
        dst: [f32; 4],
        tex: [f32; 4],
    ) -> Result<()> {
        let [dx1, dy1, dx2, dy2] = dst;
        let [tx1, ty1, tx2, ty2] = tex;
        let a = Vertex::at(dx1, dy1).with_tex(tx1, ty1);
        let b = Vertex::at(dx2, dy1).with_tex(tx2, ty1);
        let c = Vertex::at(dx2, dy2).with_tex(tx2, ty2);
        let d = Vertex::at(dx1, dy2).with_tex(tx1, ty2);
        self.add_vertices(ctx, kind, &[a, b, c, a, c, d])
    }

    /// Appends a glyph quad sampling the bound glyph texture.
    #[allow(clippy::too_many_arguments)]
    pub fn add_glyph_quad<B: RenderBackend>(
        &mut self,
        ctx: &mut DeviceContext<B>,
        tx1: f32,
        ty1: f32,
        tx2: f32,
        ty2: f32,
        dx1: f32,
        dy1: f32,
        dx2: f32,
        dy2: f32,
    ) -> Result<()> {
        self.add_quad(
            ctx,
            PrimitiveKind::GlyphQuads,
            [dx1, dy1, dx2, dy2],
            [tx1, ty1, tx2, ty2],
        )
    }

    /// Submits all pending vertices as one draw call and clears the batch.
    /// The batch kind stays open.
    pub fn flush<B: RenderBackend>(&mut self, ctx: &mut DeviceContext<B>) -> Result<()> {
        let Some(kind) = self.kind else {
            return Ok(());
        };
        if self.vertices.is_empty() {
            return Ok(());
        }
        let result = ctx.draw(kind, &self.vertices);
        self.vertices.clear();
        self.flushes += 1;
        result
    }

    /// Drops pending vertices and closes the batch without drawing.
    pub fn discard(&mut self) {
        if !self.vertices.is_empty() {
            log::debug!("discarding {} batched vertices", self.vertices.len());
        }
        self.vertices.clear();
        self.kind = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::paint::Color;

    fn context() -> DeviceContext<SoftwareBackend> {
        let mut ctx = DeviceContext::new(SoftwareBackend::new());
        ctx.init().unwrap();
        ctx.begin_frame((16, 16)).unwrap();
        ctx
    }

    fn flushed_counts(ctx: &mut DeviceContext<SoftwareBackend>) -> Vec<usize> {
        ctx.submit().unwrap();
        ctx.backend().draws().iter().map(|d| d.vertex_count).collect()
    }

    // ── capacity ──────────────────────────────────────────────────────────

    #[test]
    fn vertex_past_capacity_starts_a_new_batch() {
        let mut ctx = context();
        let mut batcher = VertexBatcher::new();
        batcher.begin_batch(&mut ctx, PrimitiveKind::Triangles).unwrap();
        for i in 0..=MAX_INDEX {
            batcher.add_vertex(&mut ctx, Vertex::at(i as f32, 0.0)).unwrap();
            assert!(batcher.len() <= MAX_INDEX);
        }
        assert_eq!(batcher.len(), 1);
        batcher.flush(&mut ctx).unwrap();
        assert_eq!(flushed_counts(&mut ctx), vec![1024, 1]);
    }

    #[test]
    fn groups_are_not_split_across_draws() {
        let mut ctx = context();
        let mut batcher = VertexBatcher::new();
        let quad = [Vertex::default(); 6];
        for _ in 0..171 {
            batcher.add_vertices(&mut ctx, PrimitiveKind::Triangles, &quad).unwrap();
        }
        // 170 quads fill 1020 vertices; the 171st does not fit.
        assert_eq!(batcher.len(), 6);
        batcher.flush(&mut ctx).unwrap();
        assert_eq!(flushed_counts(&mut ctx), vec![1020, 6]);
    }

    #[test]
    fn oversized_group_is_rejected() {
        let mut ctx = context();
        let mut batcher = VertexBatcher::new();
        let group = vec![Vertex::default(); MAX_INDEX + 1];
        let err = batcher.add_vertices(&mut ctx, PrimitiveKind::Triangles, &group);
        assert!(matches!(
            err,
            Err(crate::RenderError::InvalidStateTransition(UsageError::GroupTooLarge { .. }))
        ));
    }

    // ── kinds and ordering ────────────────────────────────────────────────

    #[test]
    fn kind_change_flushes_previous_batch() {
        let mut ctx = context();
        let mut batcher = VertexBatcher::new();
        batcher.add_quad(&mut ctx, PrimitiveKind::Triangles, [0.0, 0.0, 1.0, 1.0], [0.0; 4]).unwrap();
        batcher.begin_batch(&mut ctx, PrimitiveKind::Lines).unwrap();
        batcher.add_vertex(&mut ctx, Vertex::at(0.0, 0.0)).unwrap();
        batcher.add_vertex(&mut ctx, Vertex::at(4.0, 0.0)).unwrap();
        batcher.flush(&mut ctx).unwrap();
        ctx.submit().unwrap();
        let kinds: Vec<_> = ctx.backend().draws().iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![PrimitiveKind::Triangles, PrimitiveKind::Lines]);
    }

    #[test]
    fn add_vertex_requires_open_batch() {
        let mut ctx = context();
        let mut batcher = VertexBatcher::new();
        assert!(batcher.add_vertex(&mut ctx, Vertex::default()).is_err());
    }

    #[test]
    fn empty_flush_issues_no_draw() {
        let mut ctx = context();
        let mut batcher = VertexBatcher::new();
        batcher.begin_batch(&mut ctx, PrimitiveKind::Triangles).unwrap();
        batcher.flush(&mut ctx).unwrap();
        assert_eq!(batcher.flush_count(), 0);
        assert!(flushed_counts(&mut ctx).is_empty());
    }

    #[test]
    fn color_is_sampled_at_append_time() {
        let mut ctx = context();
        let mut batcher = VertexBatcher::new();
        batcher.begin_batch(&mut ctx, PrimitiveKind::Triangles).unwrap();
        ctx.set_color(Color::from_premul(1.0, 0.0, 0.0, 1.0));
        batcher.add_vertex(&mut ctx, Vertex::default()).unwrap();
        ctx.set_color(Color::from_premul(0.0, 0.0, 1.0, 1.0));
        batcher.add_vertex(&mut ctx, Vertex::default()).unwrap();
        assert_eq!(batcher.pending()[0].color, [255, 0, 0, 255]);
        assert_eq!(batcher.pending()[1].color, [0, 0, 255, 255]);
    }

    #[test]
    fn glyph_quad_is_two_triangles() {
        let mut ctx = context();
        let mut batcher = VertexBatcher::new();
        batcher
            .add_glyph_quad(&mut ctx, 0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 6.0, 6.0)
            .unwrap();
        assert_eq!(batcher.kind(), Some(PrimitiveKind::GlyphQuads));
        assert_eq!(batcher.len(), 6);
        assert_eq!(batcher.pending()[2].position, [6.0, 6.0]);
        assert_eq!(batcher.pending()[2].tex_coord, [1.0, 1.0]);
    }

    #[test]
    fn discard_drops_pending_vertices() {
        let mut ctx = context();
        let mut batcher = VertexBatcher::new();
        batcher.add_quad(&mut ctx, PrimitiveKind::Triangles, [0.0; 4], [0.0; 4]).unwrap();
        batcher.discard();
        assert!(batcher.is_empty());
        assert_eq!(batcher.kind(), None);
    }
}
