//! Scalar rasterization used by the software backend.
//!
//! Triangles follow the top-left fill rule with samples at pixel centers, lines
//! step half-open from the first endpoint. Both match what the GPU pipelines
//! produce for the vertices the renderer emits.

use crate::batch::Vertex;
use crate::paint::Color;

/// Premultiplied RGBA target.
#[derive(Debug, Clone)]
pub(super) struct Canvas {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[f32; 4]>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0.0; 4]; width as usize * height as usize],
        }
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> [f32; 4] {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Source-over with premultiplied color.
    #[inline]
    pub fn blend(&mut self, x: u32, y: u32, src: [f32; 4]) {
        let dst = &mut self.pixels[(y * self.width + x) as usize];
        let inv = 1.0 - src[3];
        for (d, s) in dst.iter_mut().zip(src) {
            *d = s + *d * inv;
        }
    }
}

/// Interpolated attributes at one pixel center.
#[derive(Debug, Copy, Clone)]
pub(super) struct Fragment {
    pub x: u32,
    pub y: u32,
    pub tex: [f32; 2],
    pub aux: [f32; 2],
    pub color: [f32; 4],
    pub tex_dx: [f32; 2],
    pub tex_dy: [f32; 2],
    pub aux_dx: [f32; 2],
    pub aux_dy: [f32; 2],
}

#[inline]
fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

#[inline]
fn is_top_left(a: [f32; 2], b: [f32; 2]) -> bool {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    (dy == 0.0 && dx > 0.0) || dy < 0.0
}

#[inline]
fn covers(w: f32, top_left: bool) -> bool {
    w > 0.0 || (w == 0.0 && top_left)
}

fn interpolate2(w: [f32; 3], a: [[f32; 2]; 3], inv_area: f32) -> [f32; 2] {
    [
        (w[0] * a[0][0] + w[1] * a[1][0] + w[2] * a[2][0]) * inv_area,
        (w[0] * a[0][1] + w[1] * a[1][1] + w[2] * a[2][1]) * inv_area,
    ]
}

/// Rasterizes one triangle, calling `shade` for each covered pixel in
/// row-major order.
pub(super) fn fill_triangle(
    width: u32,
    height: u32,
    tri: &[Vertex],
    mut shade: impl FnMut(&Fragment),
) {
    let (mut v0, mut v1, mut v2) = (tri[0], tri[1], tri[2]);
    let mut area = edge(v0.position, v1.position, v2.position);
    if area == 0.0 || !area.is_finite() {
        return;
    }
    if area < 0.0 {
        std::mem::swap(&mut v1, &mut v2);
        area = -area;
    }
    let (p0, p1, p2) = (v0.position, v1.position, v2.position);
    let inv_area = 1.0 / area;

    let tl0 = is_top_left(p1, p2);
    let tl1 = is_top_left(p2, p0);
    let tl2 = is_top_left(p0, p1);

    // Barycentric weights are affine in the pixel position.
    let dw_dx = [p1[1] - p2[1], p2[1] - p0[1], p0[1] - p1[1]];
    let dw_dy = [p2[0] - p1[0], p0[0] - p2[0], p1[0] - p0[0]];

    let tex = [v0.tex_coord, v1.tex_coord, v2.tex_coord];
    let aux = [v0.aux_coord, v1.aux_coord, v2.aux_coord];
    let colors = [
        Color::from_rgba8(v0.color).to_array(),
        Color::from_rgba8(v1.color).to_array(),
        Color::from_rgba8(v2.color).to_array(),
    ];

    let tex_dx = interpolate2(dw_dx, tex, inv_area);
    let tex_dy = interpolate2(dw_dy, tex, inv_area);
    let aux_dx = interpolate2(dw_dx, aux, inv_area);
    let aux_dy = interpolate2(dw_dy, aux, inv_area);

    let min_x = p0[0].min(p1[0]).min(p2[0]).floor().max(0.0) as u32;
    let min_y = p0[1].min(p1[1]).min(p2[1]).floor().max(0.0) as u32;
    let max_x = (p0[0].max(p1[0]).max(p2[0]).ceil().max(0.0) as u32).min(width);
    let max_y = (p0[1].max(p1[1]).max(p2[1]).ceil().max(0.0) as u32).min(height);

    for y in min_y..max_y {
        for x in min_x..max_x {
            let p = [x as f32 + 0.5, y as f32 + 0.5];
            let w = [edge(p1, p2, p), edge(p2, p0, p), edge(p0, p1, p)];
            if !(covers(w[0], tl0) && covers(w[1], tl1) && covers(w[2], tl2)) {
                continue;
            }
            let mut color = [0.0; 4];
            for (i, c) in color.iter_mut().enumerate() {
                *c = (w[0] * colors[0][i] + w[1] * colors[1][i] + w[2] * colors[2][i]) * inv_area;
            }
            shade(&Fragment {
                x,
                y,
                tex: interpolate2(w, tex, inv_area),
                aux: interpolate2(w, aux, inv_area),
                color,
                tex_dx,
                tex_dy,
                aux_dx,
                aux_dy,
            });
        }
    }
}

/// Steps a line from `a` toward `b`, excluding the pixel containing `b`.
///
/// Only the steps that can land on the target are visited.
pub(super) fn draw_line(width: u32, height: u32, a: &Vertex, b: &Vertex, mut plot: impl FnMut(u32, u32, [f32; 4])) {
    let x0 = f64::from(a.position[0]);
    let y0 = f64::from(a.position[1]);
    let dx = f64::from(b.position[0]) - x0;
    let dy = f64::from(b.position[1]) - y0;
    let steps = dx.abs().max(dy.abs()).round() as i64;
    if steps <= 0 {
        return;
    }
    let hi = [f64::from(width) + 1.0, f64::from(height) + 1.0];
    let Some((t0, t1)) = clip_range([x0, y0], [dx, dy], -1.0, hi) else {
        return;
    };
    let n = steps as f64;
    let first = ((t0 * n).floor() as i64 - 1).max(0);
    let last = ((t1 * n).ceil() as i64 + 1).min(steps);

    let color = Color::from_rgba8(a.color).to_array();
    for i in first..last {
        let t = i as f64 / n;
        let px = (x0 + dx * t).floor();
        let py = (y0 + dy * t).floor();
        if px < 0.0 || py < 0.0 || px >= f64::from(width) || py >= f64::from(height) {
            continue;
        }
        plot(px as u32, py as u32, color);
    }
}

/// Parameter interval of `p + t * d`, `t` in `[0, 1]`, that lies within
/// `[lo, hi]` on both axes.
fn clip_range(p: [f64; 2], d: [f64; 2], lo: f64, hi: [f64; 2]) -> Option<(f64, f64)> {
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for axis in 0..2 {
        if d[axis] == 0.0 {
            if p[axis] < lo || p[axis] > hi[axis] {
                return None;
            }
            continue;
        }
        let a = (lo - p[axis]) / d[axis];
        let b = (hi[axis] - p[axis]) / d[axis];
        t0 = t0.max(a.min(b));
        t1 = t1.min(a.max(b));
        if t0 > t1 {
            return None;
        }
    }
    Some((t0, t1))
}

/// Coverage of a pixel by the unit square in parallelogram space, given the
/// parallelogram coordinates at the pixel center and their screen derivatives.
pub(crate) fn parallelogram_coverage(uv: [f32; 2], duv_dx: [f32; 2], duv_dy: [f32; 2]) -> f32 {
    let mut cov = 1.0;
    for i in 0..2 {
        let h = ((duv_dx[i].abs() + duv_dy[i].abs()) * 0.5).max(1e-6);
        let c = ((uv[i] + h).min(1.0) - (uv[i] - h).max(0.0)) / (2.0 * h);
        cov *= c.clamp(0.0, 1.0);
    }
    cov
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(width: u32, height: u32, tris: &[Vertex]) -> Vec<u32> {
        let mut hits = vec![0u32; (width * height) as usize];
        for tri in tris.chunks_exact(3) {
            fill_triangle(width, height, tri, |f| hits[(f.y * width + f.x) as usize] += 1);
        }
        hits
    }

    #[test]
    fn quad_covers_each_pixel_once() {
        let a = Vertex::at(1.0, 1.0);
        let b = Vertex::at(5.0, 1.0);
        let c = Vertex::at(5.0, 4.0);
        let d = Vertex::at(1.0, 4.0);
        let hits = count(8, 8, &[a, b, c, a, c, d]);
        assert_eq!(hits.iter().filter(|&&h| h == 1).count(), 12);
        assert!(hits.iter().all(|&h| h <= 1));
        assert_eq!(hits[(8 + 1) as usize], 1);
        assert_eq!(hits[(4 * 8 + 1) as usize], 0);
    }

    #[test]
    fn winding_does_not_matter() {
        let cw = count(8, 8, &[Vertex::at(0.0, 0.0), Vertex::at(6.0, 0.0), Vertex::at(0.0, 6.0)]);
        let ccw = count(8, 8, &[Vertex::at(0.0, 0.0), Vertex::at(0.0, 6.0), Vertex::at(6.0, 0.0)]);
        assert_eq!(cw, ccw);
        assert!(cw.iter().sum::<u32>() > 0);
    }

    #[test]
    fn derivatives_follow_texture_mapping() {
        let tri = [
            Vertex::at(0.0, 0.0).with_tex(0.0, 0.0),
            Vertex::at(8.0, 0.0).with_tex(1.0, 0.0),
            Vertex::at(0.0, 8.0).with_tex(0.0, 1.0),
        ];
        let mut seen = None;
        fill_triangle(8, 8, &tri, |f| {
            if f.x == 1 && f.y == 1 {
                seen = Some(*f);
            }
        });
        let f = seen.unwrap();
        assert!((f.tex_dx[0] - 0.125).abs() < 1e-6 && f.tex_dx[1].abs() < 1e-6);
        assert!((f.tex_dy[1] - 0.125).abs() < 1e-6);
        assert!((f.tex[0] - 1.5 / 8.0).abs() < 1e-6);
    }

    #[test]
    fn lines_exclude_their_last_pixel() {
        let mut plotted = Vec::new();
        draw_line(8, 8, &Vertex::at(0.5, 2.5), &Vertex::at(4.5, 2.5), |x, y, _| plotted.push((x, y)));
        assert_eq!(plotted, vec![(0, 2), (1, 2), (2, 2), (3, 2)]);
    }

    #[test]
    fn far_off_target_lines_only_step_over_the_target() {
        let half = (1u32 << 30) as f32;
        let mut plotted = Vec::new();
        draw_line(8, 8, &Vertex::at(-half, 0.5), &Vertex::at(half, 0.5), |x, y, _| {
            plotted.push((x, y))
        });
        assert_eq!(plotted, (0..8).map(|x| (x, 0)).collect::<Vec<_>>());

        let mut hits = 0;
        draw_line(8, 8, &Vertex::at(-half, -half), &Vertex::at(half, -half + 4.0), |_, _, _| {
            hits += 1
        });
        assert_eq!(hits, 0);
    }

    #[test]
    fn coverage_is_full_inside_and_fractional_on_edges() {
        let d = [0.1, 0.0];
        let e = [0.0, 0.1];
        assert!((parallelogram_coverage([0.5, 0.5], d, e) - 1.0).abs() < 1e-5);
        assert!((parallelogram_coverage([0.0, 0.5], d, e) - 0.5).abs() < 1e-5);
        assert_eq!(parallelogram_coverage([1.5, 0.5], d, e), 0.0);
    }

    #[test]
    fn blend_is_source_over() {
        let mut canvas = Canvas::new(1, 1);
        canvas.blend(0, 0, [0.0, 0.0, 1.0, 1.0]);
        canvas.blend(0, 0, [0.5, 0.0, 0.0, 0.5]);
        assert_eq!(canvas.get(0, 0), [0.5, 0.0, 0.5, 1.0]);
    }
}
