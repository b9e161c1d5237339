use bytemuck::{Pod, Zeroable};

use crate::backend::SourceImage;
use crate::config::caps::{MAX_KERNEL_ENTRIES, MAX_LOOKUP_ENTRIES};

use super::{FilterKind, ImageOp};

/// `mode[1]` flag bits.
pub const EDGE_ZERO_FILL: u32 = 1;
pub const NON_PREMULTIPLIED: u32 = 2;
pub const LOOKUP_ALPHA: u32 = 4;

/// Uniform block shared by every image op. Mirrors `FilterUniforms` in the
/// WGSL source; field order and sizes must stay in sync.
///
/// - `mode`: variant index, flags, tap count or band length, unused.
/// - `image`: source width, height, unused, unused.
/// - `scale` / `offset`: rescale factors; lookup stores its index offset in `offset.x`.
/// - `kernel`: `(dx, dy, weight, 0)` per tap.
/// - `table`: lookup entries, one RGBA vector per index.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct FilterUniforms {
    pub mode: [u32; 4],
    pub image: [f32; 4],
    pub scale: [f32; 4],
    pub offset: [f32; 4],
    pub kernel: [[f32; 4]; MAX_KERNEL_ENTRIES],
    pub table: [[f32; 4]; MAX_LOOKUP_ENTRIES],
}

impl Default for FilterUniforms {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl FilterUniforms {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Uniforms for plain image sampling.
    pub fn plain() -> Self {
        Self::default()
    }

    /// Packs `op` applied to `source`.
    pub fn for_op(op: &ImageOp, source: &SourceImage) -> Self {
        let mut u = Self::zeroed();
        u.image = [source.width as f32, source.height as f32, 0.0, 0.0];
        u.mode[0] = op.kind().index();

        match op {
            ImageOp::Convolve(c) => {
                if c.edge_zero_fill {
                    u.mode[1] |= EDGE_ZERO_FILL;
                }
                u.mode[2] = c.values.len() as u32;
                for (slot, (dx, dy, w)) in u.kernel.iter_mut().zip(c.taps()) {
                    *slot = [dx as f32, dy as f32, w, 0.0];
                }
            }
            ImageOp::Rescale(r) => {
                if r.non_premultiplied {
                    u.mode[1] |= NON_PREMULTIPLIED;
                }
                let (scale, offset) = r.expanded();
                u.scale = scale;
                u.offset = offset;
            }
            ImageOp::Lookup(l) => {
                if l.non_premultiplied {
                    u.mode[1] |= NON_PREMULTIPLIED;
                }
                if l.affects_alpha() {
                    u.mode[1] |= LOOKUP_ALPHA;
                }
                u.mode[2] = l.band_length as u32;
                u.offset[0] = l.offset as f32;
                for (i, entry) in u.table.iter_mut().take(l.band_length).enumerate() {
                    let alpha = if l.affects_alpha() { l.entry(3, i) } else { 0.0 };
                    *entry = [l.entry(0, i), l.entry(1, i), l.entry(2, i), alpha];
                }
            }
        }
        u
    }

    #[inline]
    pub fn kind(&self) -> FilterKind {
        match self.mode[0] {
            1 => FilterKind::Convolve,
            2 => FilterKind::Rescale,
            3 => FilterKind::Lookup,
            _ => FilterKind::None,
        }
    }

    #[inline]
    pub fn has_flag(&self, flag: u32) -> bool {
        self.mode[1] & flag != 0
    }
}
