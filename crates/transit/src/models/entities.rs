//! Stored entities: stops, lines and the associations between them.

use crate::identifiers::*;
use crate::models::types::{LineDetails, StopDetails};
use crate::spatial::geometry::{Location, Polyline};

/// A point location servable by one or more lines.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Stop {
    pub id: StopId,
    pub details: StopDetails,
    pub location: Location,
    /// Derived: the stop has at least one association.
    pub active: bool,
    /// Derived: the stop is the endpoint of at least one line.
    pub locked: bool,
}

impl Stop {
    pub fn flags(&self) -> StopFlags {
        StopFlags {
            active: self.active,
            locked: self.locked,
        }
    }

    /// Overwrite the derived flags. Returns whether anything changed.
    pub fn apply_flags(&mut self, flags: StopFlags) -> bool {
        let changed = self.flags() != flags;
        self.active = flags.active;
        self.locked = flags.locked;
        changed
    }
}

/// A stop that has not been persisted yet and therefore has no id.
#[derive(Clone, Debug, PartialEq)]
pub struct StopDraft {
    pub details: StopDetails,
    pub location: Location,
}

/// A transit route with descriptive metadata and an optional path.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Line {
    pub id: LineId,
    pub details: LineDetails,
    pub path: Option<Polyline>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LineDraft {
    pub details: LineDetails,
    pub path: Option<Polyline>,
}

/// "Stop S is served by line L", optionally as one of L's endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Association {
    pub key: AssociationKey,
    pub is_endpoint: bool,
    /// Position of the stop in the line's creation-time stop list
    pub sequence: u32,
}

impl Association {
    pub fn new(line: LineId, stop: StopId, is_endpoint: bool, sequence: u32) -> Self {
        Self {
            key: AssociationKey::new(line, stop),
            is_endpoint,
            sequence,
        }
    }

    pub fn line(&self) -> LineId {
        self.key.line
    }

    pub fn stop(&self) -> StopId {
        self.key.stop
    }
}

/// The derived state of a stop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StopFlags {
    pub active: bool,
    pub locked: bool,
}

impl StopFlags {
    /// Derive flags from every association that references one stop.
    pub fn derive<'a>(associations: impl IntoIterator<Item = &'a Association>) -> Self {
        associations
            .into_iter()
            .fold(Self::default(), |flags, assoc| Self {
                active: true,
                locked: flags.locked || assoc.is_endpoint,
            })
    }
}
