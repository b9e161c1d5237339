use crate::backend::{DrawCall, ImageId};
use crate::batch::{PrimitiveKind, Vertex};
use crate::config::caps::{MASK_TILE_HEIGHT, MASK_TILE_WIDTH};
use crate::imageop::{FilterKind, FilterUniforms};
use crate::mask::TileSlot;

use super::pipelines::PipelineKey;

/// Row pitch of staged tile uploads.
pub(super) const STAGING_ROW_PITCH: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

/// Bytes of one staged tile.
pub(super) const STAGED_TILE_BYTES: u64 = (STAGING_ROW_PITCH * MASK_TILE_HEIGHT) as u64;

/// Stride between uniform blocks; dynamic offsets must be 256-byte aligned.
pub(super) const UNIFORM_STRIDE: u64 = FilterUniforms::SIZE.next_multiple_of(256);

const PLAIN_UNIFORM_OFFSET: u32 = 0;

#[derive(Debug, Copy, Clone, PartialEq)]
pub(super) enum Op {
    /// Copy one staged tile into the atlas.
    Upload { slot: TileSlot, staging_offset: u64 },
    Draw(DrawOp),
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub(super) struct DrawOp {
    pub key: PipelineKey,
    pub source: Option<ImageId>,
    pub first_vertex: u32,
    pub vertex_count: u32,
    pub uniform_offset: u32,
}

/// One command buffer's worth of work, kept on the CPU until commit.
///
/// Vertices, uniform blocks and staged tiles are appended to arenas that are
/// uploaded in one write each; `ops` replays them in recording order.
#[derive(Debug)]
pub(super) struct Recording {
    pub vertices: Vec<Vertex>,
    pub uniforms: Vec<u8>,
    pub staging: Vec<u8>,
    pub ops: Vec<Op>,
    current_uniform: u32,
}

impl Recording {
    /// Starts with a plain-sampling block at offset 0, bound by every draw
    /// without an image op.
    pub fn new() -> Self {
        let mut rec = Self {
            vertices: Vec::new(),
            uniforms: Vec::new(),
            staging: Vec::new(),
            ops: Vec::new(),
            current_uniform: 0,
        };
        rec.push_uniforms(&FilterUniforms::plain());
        rec
    }

    pub fn push_uniforms(&mut self, uniforms: &FilterUniforms) {
        let offset = self.uniforms.len();
        self.uniforms.extend_from_slice(bytemuck::bytes_of(uniforms));
        self.uniforms.resize(offset + UNIFORM_STRIDE as usize, 0);
        self.current_uniform = offset as u32;
    }

    /// Stages `texels` (one row-major tile) with rows padded to the copy pitch.
    pub fn push_upload(&mut self, slot: TileSlot, texels: &[u8]) {
        let staging_offset = self.staging.len() as u64;
        for row in texels
            .chunks(MASK_TILE_WIDTH as usize)
            .take(MASK_TILE_HEIGHT as usize)
        {
            let start = self.staging.len();
            self.staging.extend_from_slice(row);
            self.staging.resize(start + STAGING_ROW_PITCH as usize, 0);
        }
        self.staging
            .resize(staging_offset as usize + STAGED_TILE_BYTES as usize, 0);
        self.ops.push(Op::Upload { slot, staging_offset });
    }

    pub fn push_draw(&mut self, call: &DrawCall<'_>) {
        if call.vertices.is_empty() {
            return;
        }
        let source = match call.kind {
            PrimitiveKind::ImageQuads => call.state.image_source.map(|s| s.id),
            PrimitiveKind::GlyphQuads => call.state.glyph_source,
            _ => None,
        };
        let filter = if call.kind == PrimitiveKind::ImageQuads {
            call.state.filter
        } else {
            FilterKind::None
        };
        let uniform_offset = if filter == FilterKind::None {
            PLAIN_UNIFORM_OFFSET
        } else {
            self.current_uniform
        };
        let first_vertex = self.vertices.len() as u32;
        self.vertices.extend_from_slice(call.vertices);
        self.ops.push(Op::Draw(DrawOp {
            key: PipelineKey::new(call.kind, filter),
            source,
            first_vertex,
            vertex_count: call.vertices.len() as u32,
            uniform_offset,
        }));
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn draws(&self) -> impl Iterator<Item = &DrawOp> {
        self.ops.iter().filter_map(|op| match op {
            Op::Draw(d) => Some(d),
            Op::Upload { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{PipelineState, SourceImage};
    use crate::config::caps::MASK_TILE_SIZE;

    fn call<'a>(kind: PrimitiveKind, state: &'a PipelineState, vertices: &'a [Vertex]) -> DrawCall<'a> {
        DrawCall { kind, state, vertices }
    }

    #[test]
    fn uniform_blocks_are_aligned_for_dynamic_offsets() {
        assert_eq!(UNIFORM_STRIDE % 256, 0);
        assert!(UNIFORM_STRIDE >= FilterUniforms::SIZE);

        let mut rec = Recording::new();
        assert_eq!(rec.uniforms.len() as u64, UNIFORM_STRIDE);
        rec.push_uniforms(&FilterUniforms::plain());
        assert_eq!(rec.uniforms.len() as u64, 2 * UNIFORM_STRIDE);

        let state = PipelineState {
            filter: FilterKind::Convolve,
            image_source: Some(SourceImage { id: ImageId::new(1), width: 1, height: 1 }),
            ..PipelineState::default()
        };
        rec.push_draw(&call(PrimitiveKind::ImageQuads, &state, &[Vertex::default(); 6]));
        let draw = rec.draws().next().copied();
        assert_eq!(draw.map(|d| d.uniform_offset as u64), Some(UNIFORM_STRIDE));
    }

    #[test]
    fn cleared_filter_binds_the_plain_block() {
        let image = SourceImage { id: ImageId::new(2), width: 4, height: 4 };
        let filtered = PipelineState {
            filter: FilterKind::Lookup,
            image_source: Some(image),
            ..PipelineState::default()
        };
        let cleared = PipelineState { filter: FilterKind::None, ..filtered.clone() };
        let verts = [Vertex::default(); 6];

        let mut rec = Recording::new();
        rec.push_uniforms(&FilterUniforms::plain());
        rec.push_draw(&call(PrimitiveKind::ImageQuads, &filtered, &verts));
        rec.push_draw(&call(PrimitiveKind::ImageQuads, &cleared, &verts));
        rec.push_draw(&call(PrimitiveKind::Triangles, &filtered, &verts));

        let offsets: Vec<u64> = rec.draws().map(|d| d.uniform_offset as u64).collect();
        assert_eq!(offsets, vec![UNIFORM_STRIDE, 0, 0]);
    }

    #[test]
    fn staged_tiles_use_padded_rows() {
        let mut rec = Recording::new();
        let texels: Vec<u8> = (0..MASK_TILE_SIZE).map(|i| (i / 32) as u8).collect();
        rec.push_upload(TileSlot::FIRST, &texels);
        rec.push_upload(TileSlot::FIRST, &texels);
        assert_eq!(rec.staging.len() as u64, 2 * STAGED_TILE_BYTES);

        let pitch = STAGING_ROW_PITCH as usize;
        assert_eq!(rec.staging[pitch * 5], 5);
        assert_eq!(rec.staging[pitch * 5 + 31], 5);
        assert_eq!(rec.staging[pitch * 5 + 32], 0);
        assert_eq!(
            rec.ops[1],
            Op::Upload { slot: TileSlot::FIRST, staging_offset: STAGED_TILE_BYTES }
        );
    }

    #[test]
    fn draws_select_their_texture_source() {
        let image = SourceImage { id: ImageId::new(3), width: 1, height: 1 };
        let state = PipelineState {
            filter: FilterKind::Rescale,
            image_source: Some(image),
            glyph_source: Some(ImageId::new(9)),
            ..PipelineState::default()
        };
        let verts = [Vertex::default(); 6];
        let mut rec = Recording::new();
        rec.push_draw(&call(PrimitiveKind::ImageQuads, &state, &verts));
        rec.push_draw(&call(PrimitiveKind::GlyphQuads, &state, &verts));
        rec.push_draw(&call(PrimitiveKind::MaskQuads, &state, &verts));
        rec.push_draw(&call(PrimitiveKind::MaskQuads, &state, &[]));

        let draws: Vec<DrawOp> = rec.draws().copied().collect();
        assert_eq!(draws.len(), 3);
        assert_eq!(draws[0].source, Some(ImageId::new(3)));
        assert_eq!(draws[0].key, PipelineKey::new(PrimitiveKind::ImageQuads, FilterKind::Rescale));
        assert_eq!(draws[1].source, Some(ImageId::new(9)));
        assert_eq!(draws[2].source, None);
        assert_eq!(draws[2].key, PipelineKey::new(PrimitiveKind::MaskQuads, FilterKind::None));
        assert_eq!(draws[2].first_vertex, 12);
        assert_eq!(rec.vertex_bytes().len() as u64, 18 * Vertex::SIZE);
    }
}
