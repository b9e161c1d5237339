//! Parallelogram geometry for the plain and antialiased fill/stroke paths.

use crate::batch::Vertex;

/// Inner coordinates that yield zero inner coverage.
const NO_INNER: [f32; 2] = [-2.0, -2.0];

/// Parallelogram with origin `(fx, fy)` and edge vectors `d21` and `d12`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Parallelogram {
    pub fx: f32,
    pub fy: f32,
    pub dx21: f32,
    pub dy21: f32,
    pub dx12: f32,
    pub dy12: f32,
}

/// Decomposition of a stroked parallelogram.
#[derive(Debug, Clone, PartialEq)]
pub enum Stroke {
    /// Line widths cover the interior; the outer shape is filled.
    Filled(Parallelogram),
    /// Four edge parallelograms around the uncovered interior.
    Edges([Parallelogram; 4]),
}

impl Parallelogram {
    pub const fn new(fx: f32, fy: f32, dx21: f32, dy21: f32, dx12: f32, dy12: f32) -> Self {
        Self { fx, fy, dx21, dy21, dx12, dy12 }
    }

    #[inline]
    pub fn det(&self) -> f32 {
        self.dx21 * self.dy12 - self.dx12 * self.dy21
    }

    /// Corners in order origin, +d21, +d21+d12, +d12.
    pub fn corners(&self) -> [[f32; 2]; 4] {
        let (x, y) = (self.fx, self.fy);
        [
            [x, y],
            [x + self.dx21, y + self.dy21],
            [x + self.dx21 + self.dx12, y + self.dy21 + self.dy12],
            [x + self.dx12, y + self.dy12],
        ]
    }

    pub fn triangles(&self) -> [Vertex; 6] {
        let [a, b, c, d] = self.corners().map(|[x, y]| Vertex::at(x, y));
        [a, b, c, a, c, d]
    }

    /// Parallelogram-space coordinates of `(x, y)`; the interior is `[0, 1]^2`.
    pub fn to_local(&self, x: f32, y: f32) -> Option<[f32; 2]> {
        let det = self.det();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let (rx, ry) = (x - self.fx, y - self.fy);
        Some([
            (rx * self.dy12 - ry * self.dx12) / det,
            (ry * self.dx21 - rx * self.dy21) / det,
        ])
    }

    /// Pixel-aligned bounds `[x1, y1, x2, y2]`.
    pub fn bounds(&self) -> [f32; 4] {
        let c = self.corners();
        let (mut x1, mut y1, mut x2, mut y2) = (c[0][0], c[0][1], c[0][0], c[0][1]);
        for [x, y] in &c[1..] {
            x1 = x1.min(*x);
            y1 = y1.min(*y);
            x2 = x2.max(*x);
            y2 = y2.max(*y);
        }
        [x1.floor(), y1.floor(), x2.ceil(), y2.ceil()]
    }

    /// Stroke with line widths given as fractions of each edge vector.
    pub fn stroke(&self, lw21: f32, lw12: f32) -> Stroke {
        let (ldx21, ldy21) = (self.dx21 * lw21, self.dy21 * lw21);
        let (ldx12, ldy12) = (self.dx12 * lw12, self.dy12 * lw12);
        let ox = self.fx - (ldx21 + ldx12) / 2.0;
        let oy = self.fy - (ldy21 + ldy12) / 2.0;

        if lw21 >= 1.0 || lw12 >= 1.0 {
            return Stroke::Filled(Self::new(
                ox,
                oy,
                self.dx21 + ldx21,
                self.dy21 + ldy21,
                self.dx12 + ldx12,
                self.dy12 + ldy12,
            ));
        }

        let (sx12, sy12) = (self.dx12 + ldx12, self.dy12 + ldy12);
        let (ix21, iy21) = (self.dx21 - ldx21, self.dy21 - ldy21);
        Stroke::Edges([
            Self::new(ox, oy, ldx21, ldy21, sx12, sy12),
            Self::new(ox + self.dx21, oy + self.dy21, ldx21, ldy21, sx12, sy12),
            Self::new(ox + ldx21, oy + ldy21, ix21, iy21, ldx12, ldy12),
            Self::new(
                ox + ldx21 + self.dx12,
                oy + ldy21 + self.dy12,
                ix21,
                iy21,
                ldx12,
                ldy12,
            ),
        ])
    }

    /// Outer and inner parallelograms of an antialiased stroke. The inner one
    /// is absent when the widths cover the interior.
    pub fn aa_stroke(&self, lw21: f32, lw12: f32) -> (Self, Option<Self>) {
        let (ldx21, ldy21) = (self.dx21 * lw21, self.dy21 * lw21);
        let (ldx12, ldy12) = (self.dx12 * lw12, self.dy12 * lw12);
        let (hx, hy) = ((ldx21 + ldx12) / 2.0, (ldy21 + ldy12) / 2.0);
        let outer = Self::new(
            self.fx - hx,
            self.fy - hy,
            self.dx21 + ldx21,
            self.dy21 + ldy21,
            self.dx12 + ldx12,
            self.dy12 + ldy12,
        );
        if lw21 >= 1.0 || lw12 >= 1.0 {
            return (outer, None);
        }
        let inner = Self::new(
            self.fx + hx,
            self.fy + hy,
            self.dx21 - ldx21,
            self.dy21 - ldy21,
            self.dx12 - ldx12,
            self.dy12 - ldy12,
        );
        (outer, Some(inner))
    }
}

/// Bounding quad of `outer` carrying outer coordinates in `tex_coord` and
/// inner coordinates in `aux_coord`. `None` for degenerate shapes.
pub(crate) fn aa_quad(outer: &Parallelogram, inner: Option<&Parallelogram>) -> Option<[Vertex; 6]> {
    outer.to_local(0.0, 0.0)?;
    let [x1, y1, x2, y2] = outer.bounds();
    let corner = |x: f32, y: f32| -> Option<Vertex> {
        let [u, v] = outer.to_local(x, y)?;
        let [iu, iv] = inner.and_then(|p| p.to_local(x, y)).unwrap_or(NO_INNER);
        Some(Vertex::at(x, y).with_tex(u, v).with_aux(iu, iv))
    };
    let a = corner(x1, y1)?;
    let b = corner(x2, y1)?;
    let c = corner(x2, y2)?;
    let d = corner(x1, y2)?;
    Some([a, b, c, a, c, d])
}
