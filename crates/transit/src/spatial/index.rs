//! R-tree nodes for proximity queries.
//!
//! Stops are indexed as points and line paths as individual segments, so a
//! `locate_within_distance` query returns exactly the entities within the
//! radius without a second filtering pass.

use std::collections::BTreeSet;

use geo::{Line, LineString};
use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::identifiers::{LineId, StopId};
use crate::models::entities::{Line as TransitLine, Stop};
use crate::spatial::queries::segment_distance_2;

// ============================================================================
// Stop Spatial Node
// ============================================================================

#[derive(Clone, Debug)]
pub struct StopNode {
    pub stop: StopId,
    point: [f64; 2],
}

impl StopNode {
    pub fn new(stop: &Stop) -> Self {
        Self {
            stop: stop.id,
            point: [stop.location.x(), stop.location.y()],
        }
    }
}

impl RTreeObject for StopNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

impl PointDistance for StopNode {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.point[0] - point[0];
        let dy = self.point[1] - point[1];
        dx * dx + dy * dy
    }
}

// ============================================================================
// Path Segment Spatial Node
// ============================================================================

#[derive(Clone, Debug)]
pub struct PathSegmentNode {
    pub line: LineId,
    pub segment: Line,
    aabb: AABB<[f64; 2]>,
}

impl PathSegmentNode {
    pub fn new(segment: Line, line: LineId) -> Self {
        let start = [segment.start.x, segment.start.y];
        let end = [segment.end.x, segment.end.y];

        Self {
            line,
            segment,
            aabb: AABB::from_corners(start, end),
        }
    }
}

impl RTreeObject for PathSegmentNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

impl PointDistance for PathSegmentNode {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        segment_distance_2(*point, &self.segment)
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn stop_tree<'a>(stops: impl IntoIterator<Item = &'a Stop>) -> RTree<StopNode> {
    RTree::bulk_load(stops.into_iter().map(StopNode::new).collect())
}

/// Index every segment of every line that has a path.
pub fn path_tree<'a>(lines: impl IntoIterator<Item = &'a TransitLine>) -> RTree<PathSegmentNode> {
    let mut segments = Vec::new();
    for line in lines {
        if let Some(path) = &line.path {
            for segment in path.line_string().lines() {
                segments.push(PathSegmentNode::new(segment, line.id));
            }
        }
    }
    RTree::bulk_load(segments)
}

// ============================================================================
// Queries
// ============================================================================

/// Stops within `radius` of any segment of `path`.
///
/// Each segment's bounding box, grown by `radius`, selects candidates from the
/// tree; candidates are then checked against the exact segment distance.
pub fn stops_near_path(tree: &RTree<StopNode>, path: &LineString, radius: f64) -> BTreeSet<StopId> {
    let radius_2 = radius * radius;
    let mut found = BTreeSet::new();

    for segment in path.lines() {
        let envelope = AABB::from_corners(
            [
                segment.start.x.min(segment.end.x) - radius,
                segment.start.y.min(segment.end.y) - radius,
            ],
            [
                segment.start.x.max(segment.end.x) + radius,
                segment.start.y.max(segment.end.y) + radius,
            ],
        );

        for node in tree.locate_in_envelope(&envelope) {
            if segment_distance_2(node.point, &segment) <= radius_2 {
                found.insert(node.stop);
            }
        }
    }

    found
}
