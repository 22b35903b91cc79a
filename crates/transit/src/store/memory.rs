//! In-memory storage with row-level locking.
//!
//! Table data sits behind a short-lived mutex that is only held for the
//! duration of a single store call. Isolation comes from exclusive row locks:
//! a transaction locks every stop and line it reads or writes and keeps those
//! locks until it commits or is dropped, so transactions over disjoint rows
//! never wait on each other. Each write journals the previous value of its
//! row, and an uncommitted transaction is undone in reverse order before its
//! locks are released.
//!
//! An association row is guarded by the locks of both its line and its stop.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::identifiers::*;
use crate::models::{entities::*, traits::*, types::*};

type TxId = u64;

// ============================================================================
// Tables
// ============================================================================

#[derive(Debug, Default)]
struct Tables {
    stops: BTreeMap<StopId, Stop>,
    lines: BTreeMap<LineId, Line>,
    associations: BTreeMap<AssociationKey, Association>,
    // Secondary index for lookups by stop
    by_stop: BTreeSet<(StopId, LineId)>,

    // Id sequences are not rolled back, so ids are never reused
    next_stop: u64,
    next_line: u64,
}

/// Previous value of a row touched by an open transaction.
#[derive(Debug)]
enum Undo {
    Stop(StopId, Option<Stop>),
    Line(LineId, Option<Line>),
    Association(AssociationKey, Option<Association>),
}

impl Tables {
    fn put_association(&mut self, association: Association) -> Option<Association> {
        let key = association.key;
        self.by_stop.insert((key.stop, key.line));
        self.associations.insert(key, association)
    }

    fn remove_association(&mut self, key: AssociationKey) -> Option<Association> {
        self.by_stop.remove(&(key.stop, key.line));
        self.associations.remove(&key)
    }

    fn restore(&mut self, entry: Undo) {
        match entry {
            Undo::Stop(id, Some(stop)) => {
                self.stops.insert(id, stop);
            }
            Undo::Stop(id, None) => {
                self.stops.remove(&id);
            }
            Undo::Line(id, Some(line)) => {
                self.lines.insert(id, line);
            }
            Undo::Line(id, None) => {
                self.lines.remove(&id);
            }
            Undo::Association(_, Some(association)) => {
                self.put_association(association);
            }
            Undo::Association(key, None) => {
                self.remove_association(key);
            }
        }
    }
}

// ============================================================================
// Row locks
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum RowKey {
    Stop(StopId),
    Line(LineId),
}

/// Exclusive locks keyed by row, owned by a transaction until it ends.
#[derive(Debug, Default)]
struct RowLocks {
    owners: Mutex<HashMap<RowKey, TxId>>,
    released: Condvar,
}

impl RowLocks {
    /// Returns `false` if `key` is still held by another transaction after
    /// `timeout`. Re-acquiring a row the caller already holds is a no-op.
    fn acquire(&self, key: RowKey, tx: TxId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut owners = self.owners.lock();
        loop {
            match owners.get(&key).copied() {
                None => {
                    owners.insert(key, tx);
                    return true;
                }
                Some(owner) if owner == tx => return true,
                Some(_) if Instant::now() >= deadline => return false,
                Some(_) => {
                    self.released.wait_until(&mut owners, deadline);
                }
            }
        }
    }

    fn release_all(&self, tx: TxId) {
        let mut owners = self.owners.lock();
        owners.retain(|_, owner| *owner != tx);
        drop(owners);
        self.released.notify_all();
    }

    #[cfg(test)]
    fn held(&self) -> usize {
        self.owners.lock().len()
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Process-local storage. Cheap to share behind an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
    locks: RowLocks,
    next_tx: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    type Tx<'a> = MemoryTransaction<'a>
    where
        Self: 'a;

    fn begin(&self, timeout: Duration) -> Result<Self::Tx<'_>> {
        Ok(MemoryTransaction {
            storage: self,
            id: self.next_tx.fetch_add(1, Ordering::Relaxed) + 1,
            timeout,
            undo: Vec::new(),
            committed: false,
        })
    }
}

// ============================================================================
// Transaction
// ============================================================================

pub struct MemoryTransaction<'a> {
    storage: &'a MemoryStorage,
    id: TxId,
    timeout: Duration,
    undo: Vec<Undo>,
    committed: bool,
}

impl MemoryTransaction<'_> {
    /// Number of row writes journaled so far.
    pub fn pending_writes(&self) -> usize {
        self.undo.len()
    }

    // Never call `lock` while holding the guard returned by `tables`: the
    // holder of the row may need the tables to finish.
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.storage.tables.lock()
    }

    fn lock(&self, key: RowKey) -> Result<()> {
        if self.storage.locks.acquire(key, self.id, self.timeout) {
            return Ok(());
        }
        let timeout_ms = self.timeout.as_millis() as u64;
        warn!(tx = self.id, row = ?key, timeout_ms, "Row lock wait timed out");
        Err(TopologyError::Conflict { timeout_ms })
    }

    fn lock_association(&self, key: AssociationKey) -> Result<()> {
        self.lock(RowKey::Line(key.line))?;
        self.lock(RowKey::Stop(key.stop))
    }

    /// Lock every stop present when the scan starts, in id order.
    fn lock_all_stops(&self) -> Result<BTreeSet<StopId>> {
        let ids: BTreeSet<StopId> = self.tables().stops.keys().copied().collect();
        for id in &ids {
            self.lock(RowKey::Stop(*id))?;
        }
        Ok(ids)
    }

    /// Lock every line present when the scan starts, in id order.
    fn lock_all_lines(&self) -> Result<BTreeSet<LineId>> {
        let ids: BTreeSet<LineId> = self.tables().lines.keys().copied().collect();
        for id in &ids {
            self.lock(RowKey::Line(*id))?;
        }
        Ok(ids)
    }

    fn rollback(&mut self) {
        let writes = self.undo.len();
        let mut tables = self.storage.tables.lock();
        while let Some(entry) = self.undo.pop() {
            tables.restore(entry);
        }
        debug!(tx = self.id, writes, "Rolled back transaction");
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.undo.is_empty() {
            self.rollback();
        }
        self.storage.locks.release_all(self.id);
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn commit(mut self) -> Result<()> {
        debug!(tx = self.id, writes = self.undo.len(), "Committed transaction");
        self.undo.clear();
        self.committed = true;
        Ok(())
    }
}

impl StopStore for MemoryTransaction<'_> {
    fn get_stop(&self, id: StopId) -> Result<Stop> {
        self.lock(RowKey::Stop(id))?;
        self.tables()
            .stops
            .get(&id)
            .cloned()
            .ok_or(TopologyError::StopNotFound(id))
    }

    fn stop_exists(&self, id: StopId) -> Result<bool> {
        self.lock(RowKey::Stop(id))?;
        Ok(self.tables().stops.contains_key(&id))
    }

    fn insert_stop(&mut self, draft: StopDraft) -> Result<Stop> {
        let id = {
            let mut tables = self.tables();
            tables.next_stop += 1;
            StopId::new(tables.next_stop)
        };
        let stop = Stop {
            id,
            details: draft.details,
            location: draft.location,
            active: false,
            locked: false,
        };
        self.save_stop(stop)
    }

    fn save_stop(&mut self, stop: Stop) -> Result<Stop> {
        self.lock(RowKey::Stop(stop.id))?;
        let previous = self.tables().stops.insert(stop.id, stop.clone());
        self.undo.push(Undo::Stop(stop.id, previous));
        Ok(stop)
    }

    fn delete_stop(&mut self, id: StopId) -> Result<()> {
        let referenced = self.count_for_stop(id)?;
        if referenced > 0 {
            return Err(TopologyError::Storage(format!(
                "stop {} is still referenced by {} associations",
                id, referenced
            )));
        }

        let previous = self
            .tables()
            .stops
            .remove(&id)
            .ok_or(TopologyError::StopNotFound(id))?;
        self.undo.push(Undo::Stop(id, Some(previous)));
        Ok(())
    }

    fn all_stops(&self) -> Result<Vec<Stop>> {
        let ids = self.lock_all_stops()?;
        let tables = self.tables();
        let stops = ids.iter().filter_map(|id| tables.stops.get(id).cloned()).collect();
        Ok(stops)
    }
}

impl LineStore for MemoryTransaction<'_> {
    fn get_line(&self, id: LineId) -> Result<Line> {
        self.lock(RowKey::Line(id))?;
        self.tables()
            .lines
            .get(&id)
            .cloned()
            .ok_or(TopologyError::LineNotFound(id))
    }

    fn line_exists(&self, id: LineId) -> Result<bool> {
        self.lock(RowKey::Line(id))?;
        Ok(self.tables().lines.contains_key(&id))
    }

    fn insert_line(&mut self, draft: LineDraft) -> Result<Line> {
        let id = {
            let mut tables = self.tables();
            tables.next_line += 1;
            LineId::new(tables.next_line)
        };
        let line = Line {
            id,
            details: draft.details,
            path: draft.path,
        };
        self.save_line(line)
    }

    fn save_line(&mut self, line: Line) -> Result<Line> {
        self.lock(RowKey::Line(line.id))?;
        let previous = self.tables().lines.insert(line.id, line.clone());
        self.undo.push(Undo::Line(line.id, previous));
        Ok(line)
    }

    fn delete_line(&mut self, id: LineId) -> Result<()> {
        let referenced = self.associations_for_line(id)?.len();
        if referenced > 0 {
            return Err(TopologyError::Storage(format!(
                "line {} is still referenced by {} associations",
                id, referenced
            )));
        }

        let previous = self
            .tables()
            .lines
            .remove(&id)
            .ok_or(TopologyError::LineNotFound(id))?;
        self.undo.push(Undo::Line(id, Some(previous)));
        Ok(())
    }

    fn all_lines(&self) -> Result<Vec<Line>> {
        let ids = self.lock_all_lines()?;
        let tables = self.tables();
        let lines = ids.iter().filter_map(|id| tables.lines.get(id).cloned()).collect();
        Ok(lines)
    }
}

impl AssociationStore for MemoryTransaction<'_> {
    fn get_association(&self, key: AssociationKey) -> Result<Association> {
        self.lock_association(key)?;
        self.tables()
            .associations
            .get(&key)
            .copied()
            .ok_or(TopologyError::AssociationNotFound(key))
    }

    fn association_exists(&self, key: AssociationKey) -> Result<bool> {
        self.lock_association(key)?;
        Ok(self.tables().associations.contains_key(&key))
    }

    fn save_association(&mut self, association: Association) -> Result<Association> {
        let key = association.key;
        self.lock_association(key)?;

        let mut tables = self.tables();
        if !tables.lines.contains_key(&key.line) {
            return Err(TopologyError::LineNotFound(key.line));
        }
        if !tables.stops.contains_key(&key.stop) {
            return Err(TopologyError::StopNotFound(key.stop));
        }
        let previous = tables.put_association(association);
        drop(tables);

        self.undo.push(Undo::Association(key, previous));
        Ok(association)
    }

    fn delete_association(&mut self, key: AssociationKey) -> Result<()> {
        self.lock_association(key)?;
        let previous = self
            .tables()
            .remove_association(key)
            .ok_or(TopologyError::AssociationNotFound(key))?;
        self.undo.push(Undo::Association(key, Some(previous)));
        Ok(())
    }

    fn associations_for_line(&self, line: LineId) -> Result<Vec<Association>> {
        self.lock(RowKey::Line(line))?;
        let from = AssociationKey::new(line, StopId::new(u64::MIN));
        let to = AssociationKey::new(line, StopId::new(u64::MAX));
        Ok(self
            .tables()
            .associations
            .range(from..=to)
            .map(|(_, a)| *a)
            .collect())
    }

    fn associations_for_stop(&self, stop: StopId) -> Result<Vec<Association>> {
        self.lock(RowKey::Stop(stop))?;
        let tables = self.tables();
        let associations = tables
            .by_stop
            .range((stop, LineId::new(u64::MIN))..=(stop, LineId::new(u64::MAX)))
            .filter_map(|(stop, line)| {
                tables
                    .associations
                    .get(&AssociationKey::new(*line, *stop))
                    .copied()
            })
            .collect();
        Ok(associations)
    }

    fn all_associations(&self) -> Result<Vec<Association>> {
        let lines = self.lock_all_lines()?;
        let stops = self.lock_all_stops()?;
        let tables = self.tables();
        let associations = tables
            .associations
            .values()
            .filter(|a| lines.contains(&a.line()) && stops.contains(&a.stop()))
            .copied()
            .collect();
        Ok(associations)
    }
}
