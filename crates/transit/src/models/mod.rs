//! Network data models, types, and store traits.

pub mod entities;
pub mod traits;
pub mod types;

// Re-exports for convenience
pub use entities::{Association, Line, LineDraft, Stop, StopDraft, StopFlags};
pub use traits::{AssociationStore, LineStore, Storage, StopStore, Transaction};
pub use types::{ErrorKind, LineDetails, Result, StopDetails, Terminus, TopologyError};
