//! Planar geometry values and the adapter that builds them.
//!
//! All geometries handled by the engine share one projected coordinate
//! reference system, so distances are plain Euclidean distances in CRS units
//! (metres for UTM zones).

use std::fmt;

use geo::{Coord, LineString, Point};

use crate::models::types::{Result, TopologyError};
use crate::spatial::queries::distance_to_path;

/// EPSG code of UTM zone 21S, the projection the network is digitized in.
pub const DEFAULT_SRID: u32 = 32721;

/// Planar coordinate reference system, identified by its EPSG code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Crs {
    pub srid: u32,
}

impl Crs {
    pub const fn new(srid: u32) -> Self {
        Self { srid }
    }
}

impl Default for Crs {
    fn default() -> Self {
        Self::new(DEFAULT_SRID)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.srid)
    }
}

/// A point tagged with its CRS.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Location {
    point: Point,
    crs: Crs,
}

impl Location {
    pub fn point(&self) -> Point {
        self.point
    }

    pub fn x(&self) -> f64 {
        self.point.x()
    }

    pub fn y(&self) -> f64 {
        self.point.y()
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }
}

/// An immutable polyline tagged with its CRS. Vertices are kept exactly as
/// supplied; repeated or collinear vertices are not collapsed.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Polyline {
    line: LineString,
    crs: Crs,
}

impl Polyline {
    pub fn line_string(&self) -> &LineString {
        &self.line
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn vertex_count(&self) -> usize {
        self.line.0.len()
    }

    pub fn coords(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.line.coords().map(|c| (c.x, c.y))
    }
}

/// Builds and measures geometries in a single fixed CRS.
///
/// The adapter holds no state beyond the CRS and is meant to be created once
/// and handed to whatever needs geometry operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeometryAdapter {
    crs: Crs,
}

impl GeometryAdapter {
    pub fn new(crs: Crs) -> Self {
        Self { crs }
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn build_point(&self, x: f64, y: f64) -> Result<Location> {
        if !x.is_finite() || !y.is_finite() {
            return Err(TopologyError::InvalidGeometry(format!(
                "point coordinates must be finite, got ({}, {})",
                x, y
            )));
        }

        Ok(Location {
            point: Point::new(x, y),
            crs: self.crs,
        })
    }

    pub fn build_polyline(&self, coords: &[(f64, f64)]) -> Result<Polyline> {
        if coords.len() < 2 {
            return Err(TopologyError::InvalidGeometry(format!(
                "polyline needs at least 2 vertices, got {}",
                coords.len()
            )));
        }

        if let Some((i, (x, y))) = coords
            .iter()
            .enumerate()
            .find(|(_, (x, y))| !x.is_finite() || !y.is_finite())
        {
            return Err(TopologyError::InvalidGeometry(format!(
                "polyline vertex {} is not finite: ({}, {})",
                i, x, y
            )));
        }

        let line: LineString = coords.iter().map(|&(x, y)| Coord { x, y }).collect();

        Ok(Polyline {
            line,
            crs: self.crs,
        })
    }

    /// Minimum Euclidean distance from `location` to any segment of `path`.
    pub fn distance(&self, location: &Location, path: &Polyline) -> f64 {
        distance_to_path(location.point, &path.line)
    }

    /// Like [`distance`](Self::distance), but refuses to compare geometries
    /// that were not built in this adapter's CRS.
    pub fn checked_distance(&self, location: &Location, path: &Polyline) -> Result<f64> {
        if location.crs != self.crs || path.crs != self.crs {
            return Err(TopologyError::InvalidGeometry(format!(
                "CRS mismatch: adapter {}, point {}, path {}",
                self.crs, location.crs, path.crs
            )));
        }

        Ok(self.distance(location, path))
    }
}
