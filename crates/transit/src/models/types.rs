//! Descriptive field types and errors for network data.

use crate::identifiers::*;

// ============================================================================
// Descriptive Fields
// ============================================================================

/// Caller-editable fields of a stop.
///
/// Derived state (`active`, `locked`) lives on [`Stop`](crate::models::Stop)
/// and is never taken from the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StopDetails {
    pub name: String,
    pub route_code: String,
    pub department: String,
    pub city: String,
    pub direction: String,
    pub shelter: bool,
    pub notes: String,
    /// Administrative switch, independent from whether any line serves the stop
    pub enabled: bool,
}

impl StopDetails {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for StopDetails {
    fn default() -> Self {
        Self {
            name: String::new(),
            route_code: String::new(),
            department: String::new(),
            city: String::new(),
            direction: String::new(),
            shelter: false,
            notes: String::new(),
            enabled: true,
        }
    }
}

/// One end of a line (department and city).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Terminus {
    pub department: String,
    pub city: String,
}

impl Terminus {
    pub fn new(department: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            department: department.into(),
            city: city.into(),
        }
    }
}

/// Caller-editable fields of a line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LineDetails {
    pub description: String,
    /// Free-form schedule text (e.g. "Mon-Fri 06:00-23:00, every 20 min")
    pub schedule: String,
    pub operator: String,
    pub origin: Terminus,
    pub destination: Terminus,
    pub notes: String,
}

impl LineDetails {
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Coarse classification of [`TopologyError`] for callers that map errors to
/// transport status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    /// Lock contention. Safe to retry.
    Conflict,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("Stop not found: {0}")]
    StopNotFound(StopId),

    #[error("Line not found: {0}")]
    LineNotFound(LineId),

    #[error("Association not found: {0}")]
    AssociationNotFound(AssociationKey),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Lock not acquired within {timeout_ms}ms")]
    Conflict { timeout_ms: u64 },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl TopologyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StopNotFound(_) | Self::LineNotFound(_) | Self::AssociationNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::InvalidGeometry(_) | Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

pub type Result<T> = std::result::Result<T, TopologyError>;
