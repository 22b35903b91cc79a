//! # busnet-transit
//!
//! Consistency engine for a bus network made of lines, stops and the
//! associations between them.
//!
//! ## Features
//!
//! - **Transactional edits**: every create/edit/delete is all-or-nothing
//! - **Derived stop state**: `active` and `locked` are recomputed, never trusted
//! - **Proximity rule**: stops stay associated only while within range of the
//!   line path
//! - **Spatial queries**: R-tree backed lookups of nearby stops and lines
//! - **Pluggable storage**: implement the store traits for your backend
//!
//! ## Example
//!
//! ```
//! use busnet_transit::prelude::*;
//!
//! let engine = TopologyEngine::new(MemoryStorage::new());
//!
//! let a = engine.create_stop(StopDetails::named("Terminal"), Some((0.0, 0.0))).unwrap();
//! let b = engine.create_stop(StopDetails::named("Plaza"), Some((800.0, 10.0))).unwrap();
//!
//! let line = engine
//!     .create_line(
//!         LineDetails::described("Route 21"),
//!         &[a.id, b.id],
//!         Some(&[(0.0, 0.0), (800.0, 0.0)]),
//!     )
//!     .unwrap();
//!
//! let served = engine.stops_for_line(line.id).unwrap();
//! assert!(served.iter().all(|stop| stop.active && stop.locked));
//! assert!(engine.audit().unwrap().is_clean());
//! ```

pub mod engine;
pub mod identifiers;
pub mod models;
pub mod spatial;
pub mod store;

// Re-exports for convenience
pub mod prelude {
    pub use crate::engine::{
        AuditReport, EngineConfig, TopologyEngine, Violation, DEFAULT_LOCK_TIMEOUT,
        DEFAULT_MAX_DISTANCE,
    };
    pub use crate::identifiers::*;
    pub use crate::models::{entities::*, traits::*, types::*};
    pub use crate::spatial::{Crs, GeometryAdapter, Location, Polyline};
    pub use crate::store::MemoryStorage;
}

pub use prelude::*;
