//! Decomposition of single-pixel strokes into spans and line segments.
//!
//! Coordinates are integer pixel positions. Spans are half-open pixel
//! rectangles; line segments run between pixel centers.

use crate::batch::Vertex;

/// One batched piece of a stroke.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) enum Piece {
    /// Filled `[x1, x2) x [y1, y2)`.
    Span { x1: i32, y1: i32, x2: i32, y2: i32 },
    /// Line primitive between pixel centers; the end pixel is not covered.
    Segment { x1: f32, y1: f32, x2: f32, y2: f32 },
}

impl Piece {
    /// Span of `w`x`h` pixels at `(x, y)`, clipped at the edge of the
    /// coordinate space.
    #[inline]
    pub(crate) fn rect(x: i32, y: i32, w: i32, h: i32) -> Self {
        Piece::Span {
            x1: x,
            y1: y,
            x2: x.saturating_add(w),
            y2: y.saturating_add(h),
        }
    }
}

/// Pixels covered by a line including both endpoints.
pub(crate) fn line(x1: i32, y1: i32, x2: i32, y2: i32) -> Piece {
    if x1 == x2 || y1 == y2 {
        let (lx, hx) = (x1.min(x2), x1.max(x2));
        let (ly, hy) = (y1.min(y2), y1.max(y2));
        return Piece::Span { x1: lx, y1: ly, x2: hx.saturating_add(1), y2: hy.saturating_add(1) };
    }
    // Extend by one major-axis step so the end pixel is covered too.
    let (dx, dy) = (x2 as f32 - x1 as f32, y2 as f32 - y1 as f32);
    let major = dx.abs().max(dy.abs());
    Piece::Segment {
        x1: x1 as f32 + 0.5,
        y1: y1 as f32 + 0.5,
        x2: x2 as f32 + 0.5 + dx / major,
        y2: y2 as f32 + 0.5 + dy / major,
    }
}

/// Half-open segment: covers `(x1, y1)` but not `(x2, y2)`.
fn segment(x1: i32, y1: i32, x2: i32, y2: i32) -> Option<Piece> {
    if x1 == x2 && y1 == y2 {
        return None;
    }
    if y1 == y2 {
        let (lx, hx) = if x1 < x2 {
            (x1, x2)
        } else {
            (x2.saturating_add(1), x1.saturating_add(1))
        };
        return Some(Piece::Span { x1: lx, y1, x2: hx, y2: y1.saturating_add(1) });
    }
    if x1 == x2 {
        let (ly, hy) = if y1 < y2 {
            (y1, y2)
        } else {
            (y2.saturating_add(1), y1.saturating_add(1))
        };
        return Some(Piece::Span { x1, y1: ly, x2: x1.saturating_add(1), y2: hy });
    }
    Some(Piece::Segment {
        x1: x1 as f32 + 0.5,
        y1: y1 as f32 + 0.5,
        x2: x2 as f32 + 0.5,
        y2: y2 as f32 + 0.5,
    })
}

/// Outline of the rectangle `(x, y)`-`(x + w, y + h)`, both edges inclusive.
pub(crate) fn rect_outline(x: i32, y: i32, w: i32, h: i32) -> Vec<Piece> {
    if w < 0 || h < 0 {
        return Vec::new();
    }
    let (w1, h1) = (w.saturating_add(1), h.saturating_add(1));
    if w < 2 || h < 2 {
        return vec![Piece::rect(x, y, w1, h1)];
    }
    let (right, bottom, inner) = (x.saturating_add(w), y.saturating_add(h), y.saturating_add(1));
    vec![
        Piece::rect(x, y, w1, 1),
        Piece::rect(x, bottom, w1, 1),
        Piece::rect(x, inner, 1, h - 1),
        Piece::rect(right, inner, 1, h - 1),
    ]
}

/// Connected polyline through translated points; every covered pixel is
/// covered exactly once.
pub(crate) fn poly(xs: &[i32], ys: &[i32], closed: bool, trans_x: i32, trans_y: i32) -> Vec<Piece> {
    let points: Vec<(i32, i32)> = xs
        .iter()
        .zip(ys)
        .map(|(&x, &y)| (x.saturating_add(trans_x), y.saturating_add(trans_y)))
        .collect();
    let Some(&first) = points.first() else {
        return Vec::new();
    };

    let mut pieces: Vec<Piece> = points
        .windows(2)
        .filter_map(|w| segment(w[0].0, w[0].1, w[1].0, w[1].1))
        .collect();

    let last = points[points.len() - 1];
    if closed && last != first {
        pieces.extend(segment(last.0, last.1, first.0, first.1));
    } else if !closed || points.len() == 1 {
        // Half-open segments leave the final point uncovered.
        pieces.push(Piece::rect(last.0, last.1, 1, 1));
    }
    pieces
}

/// Scanline `[x1, x2]` on row `y`, both ends inclusive.
pub(crate) fn scanline(x1: i32, x2: i32, y: i32) -> Option<Piece> {
    (x2 >= x1).then(|| Piece::Span {
        x1,
        y1: y,
        x2: x2.saturating_add(1),
        y2: y.saturating_add(1),
    })
}

/// Two triangles covering `[x1, x2) x [y1, y2)`.
pub(crate) fn quad(x1: f32, y1: f32, x2: f32, y2: f32) -> [Vertex; 6] {
    let a = Vertex::at(x1, y1);
    let b = Vertex::at(x2, y1);
    let c = Vertex::at(x2, y2);
    let d = Vertex::at(x1, y2);
    [a, b, c, a, c, d]
}

pub(crate) fn segment_vertices(x1: f32, y1: f32, x2: f32, y2: f32) -> [Vertex; 2] {
    [Vertex::at(x1, y1), Vertex::at(x2, y2)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_lines_are_inclusive_spans() {
        assert_eq!(line(5, 2, 1, 2), Piece::Span { x1: 1, y1: 2, x2: 6, y2: 3 });
        assert_eq!(line(3, 7, 3, 4), Piece::Span { x1: 3, y1: 4, x2: 4, y2: 8 });
        assert_eq!(line(2, 2, 2, 2), Piece::Span { x1: 2, y1: 2, x2: 3, y2: 3 });
    }

    #[test]
    fn diagonal_line_is_extended_one_step() {
        assert_eq!(
            line(0, 0, 4, 2),
            Piece::Segment { x1: 0.5, y1: 0.5, x2: 5.5, y2: 3.0 }
        );
    }

    #[test]
    fn thin_rects_are_filled() {
        assert_eq!(rect_outline(1, 1, 1, 5), vec![Piece::rect(1, 1, 2, 6)]);
        assert_eq!(rect_outline(0, 0, 3, 2).len(), 4);
        assert!(rect_outline(0, 0, -1, 2).is_empty());
    }

    #[test]
    fn rect_sides_do_not_overlap() {
        let mut covered = std::collections::HashSet::new();
        let mut total = 0;
        for piece in rect_outline(2, 3, 4, 3) {
            let Piece::Span { x1, y1, x2, y2 } = piece else { panic!("unexpected segment") };
            for y in y1..y2 {
                for x in x1..x2 {
                    covered.insert((x, y));
                    total += 1;
                }
            }
        }
        // Perimeter of a 5x4 pixel box.
        assert_eq!(total, 14);
        assert_eq!(covered.len(), 14);
    }

    #[test]
    fn open_poly_plots_its_last_point() {
        let pieces = poly(&[0, 4, 4], &[0, 0, 3], false, 10, 10);
        assert_eq!(
            pieces,
            vec![
                Piece::Span { x1: 10, y1: 10, x2: 14, y2: 11 },
                Piece::Span { x1: 14, y1: 10, x2: 15, y2: 13 },
                Piece::Span { x1: 14, y1: 13, x2: 15, y2: 14 },
            ]
        );
    }

    #[test]
    fn closed_poly_adds_closing_segment() {
        let pieces = poly(&[0, 4, 4], &[0, 0, 4], true, 0, 0);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[2], Piece::Segment { x1: 4.5, y1: 4.5, x2: 0.5, y2: 0.5 });
    }

    #[test]
    fn reversed_spans_exclude_the_end_point() {
        assert_eq!(segment(5, 0, 2, 0), Some(Piece::Span { x1: 3, y1: 0, x2: 6, y2: 1 }));
        assert_eq!(segment(0, 5, 0, 2), Some(Piece::Span { x1: 0, y1: 3, x2: 1, y2: 6 }));
    }

    #[test]
    fn geometry_at_the_coordinate_limit_is_clipped() {
        let max = i32::MAX;
        assert_eq!(line(max, 0, max, 3), Piece::Span { x1: max, y1: 0, x2: max, y2: 4 });
        assert_eq!(segment(max, 2, max - 3, 2), Some(Piece::Span { x1: max - 2, y1: 2, x2: max, y2: 3 }));
        assert_eq!(scanline(max - 1, max, max), Some(Piece::Span { x1: max - 1, y1: max, x2: max, y2: max }));

        let outline = rect_outline(max - 2, 0, max, 4);
        assert_eq!(outline[0], Piece::Span { x1: max - 2, y1: 0, x2: max, y2: 1 });
        assert_eq!(outline[3], Piece::Span { x1: max, y1: 1, x2: max, y2: 4 });

        let pieces = poly(&[max - 1, max], &[0, 0], false, 8, 0);
        assert_eq!(pieces, vec![Piece::Span { x1: max, y1: 0, x2: max, y2: 1 }]);

        match line(i32::MIN, 0, i32::MAX, 1) {
            Piece::Segment { x1, x2, .. } => assert!(x2 > x1),
            span => panic!("expected a segment, got {span:?}"),
        }
    }

    #[test]
    fn scanlines_include_x2() {
        assert_eq!(scanline(2, 4, 1), Some(Piece::Span { x1: 2, y1: 1, x2: 5, y2: 2 }));
        assert_eq!(scanline(4, 2, 1), None);
    }
}
