// THEORY:
// Stateless planar geometry on closed integer polygons (contours). Everything a
// `Shape` derives from its contour and `imageproc::geometry` does not already
// provide lives here: moments, the closed outline simplification, convexity and
// the axis-aligned extent. Contours are treated as closed: the last point
// connects back to the first.

use imageproc::geometry::approximate_polygon_dp;
use imageproc::point::Point;
use serde::Serialize;

/// Axis-aligned bounding box with inclusive pixel extent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }
}

/// Spatial moments up to first order.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl Moments {
    pub fn of(contour: &[Point<i32>]) -> Self {
        let n = contour.len();
        if n == 0 {
            return Self::default();
        }
        let mut m = Self::default();
        for i in 0..n {
            let p = contour[i];
            let q = contour[(i + 1) % n];
            let (xi, yi, xj, yj) = (p.x as f64, p.y as f64, q.x as f64, q.y as f64);
            let a = xi * yj - xj * yi;
            m.m00 += a;
            m.m10 += a * (xi + xj);
            m.m01 += a * (yi + yj);
        }
        m.m00 /= 2.0;
        m.m10 /= 6.0;
        m.m01 /= 6.0;
        // Orientation-independent.
        if m.m00 < 0.0 {
            m.m00 = -m.m00;
            m.m10 = -m.m10;
            m.m01 = -m.m01;
        }
        m
    }

    /// `(M10 / M00, M01 / M00)`, or `None` when the area moment vanishes.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        if self.m00 == 0.0 {
            None
        } else {
            Some((self.m10 / self.m00, self.m01 / self.m00))
        }
    }
}

/// Minimal axis-aligned rectangle enclosing every point.
pub fn bounding_box(contour: &[Point<i32>]) -> BoundingBox {
    let Some(first) = contour.first() else {
        return BoundingBox::default();
    };
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in contour {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    BoundingBox {
        x: min_x,
        y: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    }
}

/// A polygon is convex when every turn goes the same way. Collinear runs are allowed.
pub fn is_convex(polygon: &[Point<i32>]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut orientation = 0i64;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        let c = polygon[(i + 2) % n];
        let cross = (b.x - a.x) as i64 * (c.y - b.y) as i64 - (b.y - a.y) as i64 * (c.x - b.x) as i64;
        if cross == 0 {
            continue;
        }
        let sign = cross.signum();
        if orientation == 0 {
            orientation = sign;
        } else if sign != orientation {
            return false;
        }
    }
    orientation != 0
}

fn distance_to_segment_line(p: Point<i32>, a: Point<i32>, b: Point<i32>) -> f64 {
    let (dx, dy) = ((b.x - a.x) as f64, (b.y - a.y) as f64);
    let (px, py) = ((p.x - a.x) as f64, (p.y - a.y) as f64);
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        (px * px + py * py).sqrt()
    } else {
        (dx * py - dy * px).abs() / len
    }
}

/// Ramer-Douglas-Peucker simplification of a closed contour.
///
/// The curve is split at the start point and at the point farthest from it, each
/// half is simplified independently, and finally those two forced split points are
/// dropped again if they turn out to lie on a straight run.
pub fn approximate_closed(contour: &[Point<i32>], epsilon: f64) -> Vec<Point<i32>> {
    let n = contour.len();
    if n < 3 || epsilon.is_nan() || epsilon <= 0.0 {
        return contour.to_vec();
    }

    let origin = contour[0];
    let far = (1..n)
        .max_by_key(|&i| {
            let (dx, dy) = ((contour[i].x - origin.x) as i64, (contour[i].y - origin.y) as i64);
            dx * dx + dy * dy
        })
        .unwrap_or(n / 2);
    if contour[far] == origin {
        return contour.to_vec();
    }

    // Origin to far point, then far point back around to the origin.
    let mut kept = approximate_polygon_dp(&contour[..=far], epsilon, false);
    kept.pop();
    let mut far_pos = kept.len();
    let back: Vec<Point<i32>> = contour[far..].iter().copied().chain([origin]).collect();
    let mut back = approximate_polygon_dp(&back, epsilon, false);
    back.pop();
    kept.extend(back);

    for at_far in [false, true] {
        if kept.len() <= 3 {
            break;
        }
        let pos = if at_far { far_pos } else { 0 };
        let prev = kept[(pos + kept.len() - 1) % kept.len()];
        let next = kept[(pos + 1) % kept.len()];
        if distance_to_segment_line(kept[pos], prev, next) <= epsilon {
            kept.remove(pos);
            far_pos -= 1;
        }
    }
    kept
}
