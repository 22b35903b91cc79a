//! Planar distance utilities.
//!
//! Inputs are projected coordinates, so plain Euclidean distance is exact in
//! CRS units. No geodesic correction is applied.

use geo::{EuclideanDistance, Line, LineString, Point};

/// Distance from a point to the nearest segment of a path.
///
/// An empty path is infinitely far away.
pub fn distance_to_path(point: Point, path: &LineString) -> f64 {
    if path.0.is_empty() {
        return f64::INFINITY;
    }
    point.euclidean_distance(path)
}

/// Squared distance from a point to a line segment.
pub fn segment_distance_2(point: [f64; 2], segment: &Line) -> f64 {
    let a = [segment.start.x, segment.start.y];
    let b = [segment.end.x, segment.end.y];

    let ab = [b[0] - a[0], b[1] - a[1]];
    let ap = [point[0] - a[0], point[1] - a[1]];

    let ab_ab = ab[0] * ab[0] + ab[1] * ab[1];

    if ab_ab == 0.0 {
        // Degenerate segment
        return ap[0] * ap[0] + ap[1] * ap[1];
    }

    let ab_ap = ab[0] * ap[0] + ab[1] * ap[1];
    let t = (ab_ap / ab_ab).clamp(0.0, 1.0);

    let closest = [a[0] + t * ab[0], a[1] + t * ab[1]];
    let dx = point[0] - closest[0];
    let dy = point[1] - closest[1];

    dx * dx + dy * dy
}
