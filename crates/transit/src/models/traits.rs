//! Store and transaction traits.
//!
//! These traits define the persistence interface the engine runs against.
//! Implementations can be in-memory, database-backed, or remote; the engine
//! only ever touches them through a [`Transaction`].
//!
//! Every method, reads included, may wait on a row held by another
//! transaction, so every method can fail with [`TopologyError::Conflict`].

use std::time::Duration;

use crate::identifiers::*;
use crate::models::entities::*;
use crate::models::types::*;

// ============================================================================
// Entity Stores
// ============================================================================

pub trait StopStore {
    /// Fails with [`TopologyError::StopNotFound`] if absent
    fn get_stop(&self, id: StopId) -> Result<Stop>;
    fn stop_exists(&self, id: StopId) -> Result<bool>;

    /// Persist a new stop and assign its id
    fn insert_stop(&mut self, draft: StopDraft) -> Result<Stop>;

    /// Upsert by id
    fn save_stop(&mut self, stop: Stop) -> Result<Stop>;
    fn delete_stop(&mut self, id: StopId) -> Result<()>;

    fn all_stops(&self) -> Result<Vec<Stop>>;
}

pub trait LineStore {
    /// Fails with [`TopologyError::LineNotFound`] if absent
    fn get_line(&self, id: LineId) -> Result<Line>;
    fn line_exists(&self, id: LineId) -> Result<bool>;

    /// Persist a new line and assign its id
    fn insert_line(&mut self, draft: LineDraft) -> Result<Line>;

    /// Upsert by id
    fn save_line(&mut self, line: Line) -> Result<Line>;
    fn delete_line(&mut self, id: LineId) -> Result<()>;

    fn all_lines(&self) -> Result<Vec<Line>>;
}

pub trait AssociationStore {
    // ---- Single rows ----
    fn get_association(&self, key: AssociationKey) -> Result<Association>;
    fn association_exists(&self, key: AssociationKey) -> Result<bool>;

    /// Upsert by key. Both ends must exist.
    fn save_association(&mut self, association: Association) -> Result<Association>;
    fn delete_association(&mut self, key: AssociationKey) -> Result<()>;

    // ---- Bulk queries ----
    fn associations_for_line(&self, line: LineId) -> Result<Vec<Association>>;
    fn associations_for_stop(&self, stop: StopId) -> Result<Vec<Association>>;
    fn all_associations(&self) -> Result<Vec<Association>>;

    fn count_for_stop(&self, stop: StopId) -> Result<usize> {
        Ok(self.associations_for_stop(stop)?.len())
    }

    /// Is `stop` an endpoint of any line other than `excluding`?
    fn is_endpoint_elsewhere(&self, stop: StopId, excluding: LineId) -> Result<bool> {
        Ok(self
            .associations_for_stop(stop)?
            .iter()
            .any(|a| a.is_endpoint && a.line() != excluding))
    }

    fn delete_associations(&mut self, associations: &[Association]) -> Result<()> {
        for association in associations {
            self.delete_association(association.key)?;
        }
        Ok(())
    }
}

// ============================================================================
// Transactions
// ============================================================================

/// A unit of work over all three stores.
///
/// A transaction holds an exclusive lock on every stop and line it touches
/// until it ends. Writes become visible to other transactions only on
/// [`commit`](Self::commit); dropping an uncommitted transaction discards
/// every write it made.
pub trait Transaction: StopStore + LineStore + AssociationStore {
    fn commit(self) -> Result<()>;
}

/// Transaction manager.
pub trait Storage: Send + Sync {
    type Tx<'a>: Transaction
    where
        Self: 'a;

    /// Start a transaction. Each row lock it later takes waits at most
    /// `timeout` for the current holder before failing with
    /// [`TopologyError::Conflict`].
    fn begin(&self, timeout: Duration) -> Result<Self::Tx<'_>>;
}
