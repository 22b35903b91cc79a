//! Geometry construction, distance and proximity queries.

pub mod geometry;
pub mod index;
pub mod queries;

pub use geometry::{Crs, GeometryAdapter, Location, Polyline, DEFAULT_SRID};
pub use queries::distance_to_path;
