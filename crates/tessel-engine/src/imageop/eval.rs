//! CPU evaluation of the image-op pixel stage.
//!
//! Works from a packed [`FilterUniforms`] block so it computes exactly what the
//! `fs_image_*` shader entry points compute from the same data.

use super::{FilterKind, FilterUniforms, EDGE_ZERO_FILL, LOOKUP_ALPHA, NON_PREMULTIPLIED};

/// Premultiplied RGBA texels addressed in integer coordinates.
pub trait SampleSource {
    fn size(&self) -> (u32, u32);

    /// Texel at `(x, y)`; callers keep coordinates in bounds.
    fn texel(&self, x: u32, y: u32) -> [f32; 4];

    /// Texel with coordinates clamped to the nearest edge.
    fn texel_clamped(&self, x: i32, y: i32) -> [f32; 4] {
        let (w, h) = self.size();
        if w == 0 || h == 0 {
            return [0.0; 4];
        }
        let x = x.clamp(0, w as i32 - 1) as u32;
        let y = y.clamp(0, h as i32 - 1) as u32;
        self.texel(x, y)
    }
}

/// Filters the source texel at `(x, y)`.
pub fn filter_texel(u: &FilterUniforms, src: &dyn SampleSource, x: i32, y: i32) -> [f32; 4] {
    match u.kind() {
        FilterKind::None => src.texel_clamped(x, y),
        FilterKind::Convolve => convolve(u, src, x, y),
        FilterKind::Rescale => rescale(u, src.texel_clamped(x, y)),
        FilterKind::Lookup => lookup(u, src.texel_clamped(x, y)),
    }
}

fn convolve(u: &FilterUniforms, src: &dyn SampleSource, x: i32, y: i32) -> [f32; 4] {
    let (w, h) = src.size();
    let taps = &u.kernel[..(u.mode[2] as usize).min(u.kernel.len())];
    let mut sum = [0.0f32; 4];
    for tap in taps {
        let sx = x + tap[0] as i32;
        let sy = y + tap[1] as i32;
        let outside = sx < 0 || sy < 0 || sx >= w as i32 || sy >= h as i32;
        if outside && u.has_flag(EDGE_ZERO_FILL) {
            return [0.0; 4];
        }
        let t = src.texel_clamped(sx, sy);
        for (acc, c) in sum.iter_mut().zip(t) {
            *acc += c * tap[2];
        }
    }
    sum
}

fn rescale(u: &FilterUniforms, texel: [f32; 4]) -> [f32; 4] {
    let non_premul = u.has_flag(NON_PREMULTIPLIED);
    let mut c = if non_premul { unpremultiply(texel) } else { texel };
    for i in 0..4 {
        c[i] = (c[i] * u.scale[i] + u.offset[i]).clamp(0.0, 1.0);
    }
    if non_premul { premultiply(c) } else { c }
}

fn lookup(u: &FilterUniforms, texel: [f32; 4]) -> [f32; 4] {
    let non_premul = u.has_flag(NON_PREMULTIPLIED);
    let channels = if u.has_flag(LOOKUP_ALPHA) { 4 } else { 3 };
    let last = u.mode[2].max(1) as i32 - 1;
    let mut c = if non_premul { unpremultiply(texel) } else { texel };
    for i in 0..channels {
        let index = ((c[i] * 255.0).round() as i32 - u.offset[0] as i32).clamp(0, last);
        c[i] = u.table[index as usize][i];
    }
    if non_premul { premultiply(c) } else { c }
}

#[inline]
pub fn unpremultiply(c: [f32; 4]) -> [f32; 4] {
    if c[3] <= 0.0 {
        [0.0; 4]
    } else {
        [c[0] / c[3], c[1] / c[3], c[2] / c[3], c[3]]
    }
}

#[inline]
pub fn premultiply(c: [f32; 4]) -> [f32; 4] {
    [c[0] * c[3], c[1] * c[3], c[2] * c[3], c[3]]
}
