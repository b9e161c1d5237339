use bytemuck::{Pod, Zeroable};

/// Primitive kind of a batch. Batches never mix kinds.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PrimitiveKind {
    /// Line list, two vertices per segment.
    Lines,
    /// Solid triangle list.
    Triangles,
    /// Triangles sampling the mask atlas.
    MaskQuads,
    /// Triangles sampling an external glyph coverage texture.
    GlyphQuads,
    /// Triangles sampling the image source through the active image op.
    ImageQuads,
    /// Triangles shaded by the antialiased parallelogram program.
    AaParallelograms,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 6] = [
        PrimitiveKind::Lines,
        PrimitiveKind::Triangles,
        PrimitiveKind::MaskQuads,
        PrimitiveKind::GlyphQuads,
        PrimitiveKind::ImageQuads,
        PrimitiveKind::AaParallelograms,
    ];

    #[inline]
    pub const fn vertices_per_primitive(self) -> usize {
        match self {
            PrimitiveKind::Lines => 2,
            _ => 3,
        }
    }

    #[inline]
    pub const fn topology(self) -> wgpu::PrimitiveTopology {
        match self {
            PrimitiveKind::Lines => wgpu::PrimitiveTopology::LineList,
            _ => wgpu::PrimitiveTopology::TriangleList,
        }
    }
}

/// Batched vertex.
///
/// `aux_coord` is only read by the antialiased parallelogram program, where it
/// holds the inner parallelogram's coordinates. `color` is premultiplied RGBA8
/// and is stamped by the batcher from the context's current color.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
    pub aux_coord: [f32; 2],
    pub color: [u8; 4],
}

impl Vertex {
    const ATTRS: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        0 => Float32x2,
        1 => Float32x2,
        2 => Float32x2,
        3 => Unorm8x4,
    ];

    pub const SIZE: u64 = std::mem::size_of::<Vertex>() as u64;

    #[inline]
    pub const fn at(x: f32, y: f32) -> Self {
        Self {
            position: [x, y],
            tex_coord: [0.0, 0.0],
            aux_coord: [0.0, 0.0],
            color: [0; 4],
        }
    }

    #[inline]
    pub const fn with_tex(mut self, u: f32, v: f32) -> Self {
        self.tex_coord = [u, v];
        self
    }

    #[inline]
    pub const fn with_aux(mut self, u: f32, v: f32) -> Self {
        self.aux_coord = [u, v];
        self
    }

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: Self::SIZE,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(Vertex::SIZE, 28);
        assert_eq!(Vertex::layout().attributes.len(), 4);
    }

    #[test]
    fn builder_sets_coordinates() {
        let v = Vertex::at(1.0, 2.0).with_tex(0.5, 0.25).with_aux(-2.0, -2.0);
        assert_eq!(v.position, [1.0, 2.0]);
        assert_eq!(v.tex_coord, [0.5, 0.25]);
        assert_eq!(v.aux_coord, [-2.0, -2.0]);
        assert_eq!(v.color, [0; 4]);
    }

    #[test]
    fn only_lines_use_line_topology() {
        for kind in PrimitiveKind::ALL {
            let lines = kind == PrimitiveKind::Lines;
            assert_eq!(kind.topology() == wgpu::PrimitiveTopology::LineList, lines);
        }
    }
}
