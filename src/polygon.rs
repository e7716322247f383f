//! Planar polygon predicates shared by the kernel, the boolean combiner
//! and the mesher. Contours are implicitly closed (last point connects to
//! the first) and must not repeat the first point at the end.

use nalgebra::Point2;

macro_rules! coord {
    ($p:expr) => {
        robust::Coord { x: $p.x, y: $p.y }
    };
}

/// Orientation of `c` relative to the directed line `a -> b`.
/// Positive = counter-clockwise, zero = collinear (exact).
#[inline]
pub fn orient(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> f64 {
    robust::orient2d(coord!(a), coord!(b), coord!(c))
}

/// Whether `d` lies strictly inside the circumcircle of the
/// counter-clockwise triangle `a, b, c` (exact)
#[inline]
pub fn in_circle(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>, d: &Point2<f64>) -> bool {
    robust::incircle(coord!(a), coord!(b), coord!(c), coord!(d)) > 0.0
}

/// Compute the signed area of a contour.
/// Positive = counter-clockwise, Negative = clockwise
pub fn signed_area(contour: &[Point2<f64>]) -> f64 {
    if contour.len() < 3 {
        return 0.0;
    }

    let n = contour.len();
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += contour[i].x * contour[j].y - contour[j].x * contour[i].y;
    }

    area * 0.5
}

/// Check if a point is inside a contour using ray casting
pub fn point_in_polygon(point: &Point2<f64>, contour: &[Point2<f64>]) -> bool {
    if contour.len() < 3 {
        return false;
    }

    let mut inside = false;
    let n = contour.len();
    let mut j = n - 1;
    for i in 0..n {
        let pi = &contour[i];
        let pj = &contour[j];

        if ((pi.y > point.y) != (pj.y > point.y))
            && (point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x)
        {
            inside = !inside;
        }
        j = i;
    }

    inside
}

#[inline]
fn within_box(a: &Point2<f64>, b: &Point2<f64>, p: &Point2<f64>) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// Whether the closed segments `a0-a1` and `b0-b1` share at least one point
pub fn segments_intersect(
    a0: &Point2<f64>,
    a1: &Point2<f64>,
    b0: &Point2<f64>,
    b1: &Point2<f64>,
) -> bool {
    let o1 = orient(a0, a1, b0);
    let o2 = orient(a0, a1, b1);
    let o3 = orient(b0, b1, a0);
    let o4 = orient(b0, b1, a1);

    if o1 * o2 < 0.0 && o3 * o4 < 0.0 {
        return true;
    }

    (o1 == 0.0 && within_box(a0, a1, b0))
        || (o2 == 0.0 && within_box(a0, a1, b1))
        || (o3 == 0.0 && within_box(b0, b1, a0))
        || (o4 == 0.0 && within_box(b0, b1, a1))
}

/// Euclidean distance from `p` to the segment `a-b`
pub fn point_segment_distance(p: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq == 0.0 {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

fn edges(contour: &[Point2<f64>]) -> impl Iterator<Item = (&Point2<f64>, &Point2<f64>)> + '_ {
    let n = contour.len();
    (0..n).map(move |i| (&contour[i], &contour[(i + 1) % n]))
}

/// Whether no two non-adjacent edges of the contour touch
pub fn is_simple(contour: &[Point2<f64>]) -> bool {
    let n = contour.len();
    if n < 3 {
        return false;
    }

    for i in 0..n {
        let (a0, a1) = (&contour[i], &contour[(i + 1) % n]);
        for j in (i + 2)..n {
            if i == 0 && j == n - 1 {
                continue; // adjacent through the closing edge
            }
            let (b0, b1) = (&contour[j], &contour[(j + 1) % n]);
            if segments_intersect(a0, a1, b0, b1) {
                return false;
            }
        }
    }

    true
}

/// Whether any edge of `a` touches any edge of `b`
pub fn boundaries_intersect(a: &[Point2<f64>], b: &[Point2<f64>]) -> bool {
    edges(a).any(|(a0, a1)| edges(b).any(|(b0, b1)| segments_intersect(a0, a1, b0, b1)))
}

/// Smallest distance between the boundaries of two non-intersecting contours
pub fn boundary_distance(a: &[Point2<f64>], b: &[Point2<f64>]) -> f64 {
    vertex_distance(a, b).min(vertex_distance(b, a))
}

fn vertex_distance(from: &[Point2<f64>], to: &[Point2<f64>]) -> f64 {
    let mut best = f64::INFINITY;
    for p in from {
        for (s0, s1) in edges(to) {
            best = best.min(point_segment_distance(p, s0, s1));
        }
    }
    best
}

/// Whether contour `inner` lies strictly inside contour `outer`
pub fn contains(outer: &[Point2<f64>], inner: &[Point2<f64>]) -> bool {
    !boundaries_intersect(outer, inner) && inner.iter().all(|p| point_in_polygon(p, outer))
}
