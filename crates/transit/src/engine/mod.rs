//! Topology consistency engine.
//!
//! Every public operation runs in exactly one storage transaction. Derived
//! stop state (`active`, `locked`) and the proximity rule between stops and
//! line paths are recomputed inside that transaction, so callers never observe
//! a half-applied change:
//!
//! 1. `stop.active` iff the stop has at least one association
//! 2. `stop.locked` iff the stop is an endpoint of at least one association
//! 3. every associated stop lies within `max_distance` of its line's path
//! 4. at most one association per (line, stop) pair

pub mod audit;
pub mod config;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::identifiers::*;
use crate::models::{entities::*, traits::*, types::*};
use crate::spatial::geometry::{GeometryAdapter, Location, Polyline};
use crate::spatial::index;

pub use audit::{AuditReport, Violation};
pub use config::{EngineConfig, DEFAULT_LOCK_TIMEOUT, DEFAULT_MAX_DISTANCE};

pub struct TopologyEngine<S> {
    storage: S,
    geometry: GeometryAdapter,
    config: EngineConfig,
}

impl<S: Storage> TopologyEngine<S> {
    pub fn new(storage: S) -> Self {
        let config = EngineConfig::default();
        Self {
            storage,
            geometry: GeometryAdapter::new(config.crs),
            config,
        }
    }

    pub fn with_config(storage: S, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            geometry: GeometryAdapter::new(config.crs),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn geometry(&self) -> &GeometryAdapter {
        &self.geometry
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn begin(&self) -> Result<S::Tx<'_>> {
        self.storage.begin(self.config.lock_timeout)
    }

    fn out_of_range(&self, location: &Location, path: &Polyline) -> bool {
        self.geometry.distance(location, path) > self.config.max_distance
    }

    // ========================================================================
    // Lines
    // ========================================================================

    /// Create a line serving `stop_ids` in route order.
    ///
    /// The first and last stop become endpoints. A stop listed more than once
    /// gets a single association, flagged as endpoint if any occurrence is.
    pub fn create_line(
        &self,
        details: LineDetails,
        stop_ids: &[StopId],
        path: Option<&[(f64, f64)]>,
    ) -> Result<Line> {
        let mut tx = self.begin()?;
        let line = self.create_line_in(&mut tx, details, stop_ids, path)?;
        tx.commit()?;

        info!(line = %line.id, stops = stop_ids.len(), "Created line");
        Ok(line)
    }

    fn create_line_in<T: Transaction>(
        &self,
        tx: &mut T,
        details: LineDetails,
        stop_ids: &[StopId],
        path: Option<&[(f64, f64)]>,
    ) -> Result<Line> {
        // Rows are locked in id order so concurrent creations over shared
        // stops cannot wait on each other in a cycle
        let unique: BTreeSet<StopId> = stop_ids.iter().copied().collect();
        let stops = unique
            .iter()
            .map(|id| tx.get_stop(*id))
            .collect::<Result<Vec<_>>>()?;

        let path = path
            .map(|coords| self.geometry.build_polyline(coords))
            .transpose()?;

        if let Some(path) = &path {
            if let Some(stop) = stops.iter().find(|s| self.out_of_range(&s.location, path)) {
                return Err(TopologyError::InvalidArgument(format!(
                    "stop {} is {:.2} from the line path, limit is {}",
                    stop.id,
                    self.geometry.distance(&stop.location, path),
                    self.config.max_distance
                )));
            }
        }

        let line = tx.insert_line(LineDraft { details, path })?;

        let last = stop_ids.len().saturating_sub(1);
        let mut planned: BTreeMap<StopId, Association> = BTreeMap::new();
        for (i, stop) in stop_ids.iter().enumerate() {
            let is_endpoint = i == 0 || i == last;
            let sequence = route_sequence(i)?;
            planned
                .entry(*stop)
                .and_modify(|a| a.is_endpoint |= is_endpoint)
                .or_insert_with(|| Association::new(line.id, *stop, is_endpoint, sequence));
        }

        for association in planned.values() {
            tx.save_association(*association)?;
        }
        for stop in planned.keys() {
            refresh_stop(tx, *stop)?;
        }

        Ok(line)
    }

    /// Replace a line's descriptive fields and, optionally, its path.
    ///
    /// A new path drops every association whose stop ends up farther than
    /// `max_distance` from it.
    pub fn edit_line(
        &self,
        id: LineId,
        details: LineDetails,
        new_path: Option<&[(f64, f64)]>,
    ) -> Result<Line> {
        let new_path = new_path
            .map(|coords| self.geometry.build_polyline(coords))
            .transpose()?;

        let mut tx = self.begin()?;
        let mut line = tx.get_line(id)?;
        line.details = details;

        let path_replaced = new_path.is_some();
        if new_path.is_some() {
            line.path = new_path;
        }
        let line = tx.save_line(line)?;

        if path_replaced {
            let detached = self.revalidate_line(&mut tx, &line)?;
            if !detached.is_empty() {
                info!(line = %id, detached = detached.len(), "Path change detached stops");
            }
        }

        tx.commit()?;
        debug!(line = %id, path_replaced, "Edited line");
        Ok(line)
    }

    /// Drop associations of `line` whose stop is out of range of its path and
    /// recompute the flags of those stops. Returns the detached stop ids.
    fn revalidate_line<T: Transaction>(&self, tx: &mut T, line: &Line) -> Result<Vec<StopId>> {
        let Some(path) = &line.path else {
            return Ok(Vec::new());
        };

        let mut detached = Vec::new();
        for association in tx.associations_for_line(line.id)? {
            let stop = tx.get_stop(association.stop())?;
            if self.out_of_range(&stop.location, path) {
                tx.delete_association(association.key)?;
                detached.push(stop.id);
            }
        }

        for stop in &detached {
            refresh_stop(tx, *stop)?;
        }
        Ok(detached)
    }

    pub fn delete_line(&self, id: LineId) -> Result<()> {
        let mut tx = self.begin()?;
        tx.get_line(id)?;

        let associations = tx.associations_for_line(id)?;
        tx.delete_associations(&associations)?;
        tx.delete_line(id)?;

        for association in &associations {
            let mut stop = tx.get_stop(association.stop())?;
            stop.active = tx.count_for_stop(stop.id)? > 0;
            if association.is_endpoint {
                stop.locked = tx.is_endpoint_elsewhere(stop.id, id)?;
            }
            tx.save_stop(stop)?;
        }

        tx.commit()?;
        info!(line = %id, released = associations.len(), "Deleted line");
        Ok(())
    }

    // ========================================================================
    // Stops
    // ========================================================================

    /// Create a stop. The location is mandatory; a new stop serves no line.
    pub fn create_stop(&self, details: StopDetails, point: Option<(f64, f64)>) -> Result<Stop> {
        let (x, y) = point.ok_or_else(|| {
            TopologyError::InvalidArgument("a stop requires a location".to_string())
        })?;
        let location = self.geometry.build_point(x, y)?;

        let mut tx = self.begin()?;
        let stop = tx.insert_stop(StopDraft { details, location })?;
        tx.commit()?;

        debug!(stop = %stop.id, "Created stop");
        Ok(stop)
    }

    /// Replace a stop's descriptive fields and, optionally, move it.
    ///
    /// Moving a stop drops its associations with every line whose path ends up
    /// out of range. Derived flags are always recomputed.
    pub fn edit_stop(
        &self,
        id: StopId,
        details: StopDetails,
        new_point: Option<(f64, f64)>,
    ) -> Result<Stop> {
        let new_location = new_point
            .map(|(x, y)| self.geometry.build_point(x, y))
            .transpose()?;

        let mut tx = self.begin()?;
        let mut stop = tx.get_stop(id)?;
        stop.details = details;

        if let Some(location) = new_location {
            stop.location = location;

            for association in tx.associations_for_stop(id)? {
                let line = tx.get_line(association.line())?;
                let Some(path) = &line.path else {
                    continue;
                };
                if self.out_of_range(&stop.location, path) {
                    tx.delete_association(association.key)?;
                    info!(stop = %id, line = %line.id, "Moved stop out of range of line");
                }
            }
        }

        stop.apply_flags(StopFlags::derive(&tx.associations_for_stop(id)?));
        let stop = tx.save_stop(stop)?;
        tx.commit()?;

        debug!(stop = %id, active = stop.active, locked = stop.locked, "Edited stop");
        Ok(stop)
    }

    pub fn delete_stop(&self, id: StopId) -> Result<()> {
        let mut tx = self.begin()?;
        tx.get_stop(id)?;

        let associations = tx.associations_for_stop(id)?;
        tx.delete_associations(&associations)?;
        tx.delete_stop(id)?;
        tx.commit()?;

        debug!(stop = %id, released = associations.len(), "Deleted stop");
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn stop(&self, id: StopId) -> Result<Stop> {
        self.begin()?.get_stop(id)
    }

    pub fn line(&self, id: LineId) -> Result<Line> {
        self.begin()?.get_line(id)
    }

    pub fn stops(&self) -> Result<Vec<Stop>> {
        self.begin()?.all_stops()
    }

    pub fn lines(&self) -> Result<Vec<Line>> {
        self.begin()?.all_lines()
    }

    pub fn associations_for_line(&self, id: LineId) -> Result<Vec<Association>> {
        let tx = self.begin()?;
        tx.get_line(id)?;
        let mut associations = tx.associations_for_line(id)?;
        associations.sort_by_key(|a| (a.sequence, a.stop()));
        Ok(associations)
    }

    /// Stops served by a line, in route order.
    pub fn stops_for_line(&self, id: LineId) -> Result<Vec<Stop>> {
        let tx = self.begin()?;
        tx.get_line(id)?;

        let mut associations = tx.associations_for_line(id)?;
        associations.sort_by_key(|a| (a.sequence, a.stop()));
        associations
            .iter()
            .map(|a| tx.get_stop(a.stop()))
            .collect()
    }

    pub fn lines_for_stop(&self, id: StopId) -> Result<Vec<Line>> {
        let tx = self.begin()?;
        tx.get_stop(id)?;
        tx.associations_for_stop(id)?
            .iter()
            .map(|a| tx.get_line(a.line()))
            .collect()
    }

    // ========================================================================
    // Proximity
    // ========================================================================

    /// Stops within `radius` of an arbitrary path, nearest first.
    pub fn stops_near_path(&self, coords: &[(f64, f64)], radius: f64) -> Result<Vec<(Stop, f64)>> {
        if !radius.is_finite() || radius < 0.0 {
            return Err(TopologyError::InvalidArgument(format!(
                "radius must be a non-negative finite number, got {}",
                radius
            )));
        }
        let path = self.geometry.build_polyline(coords)?;

        let tx = self.begin()?;
        self.stops_near(&tx, &path, radius)
    }

    /// Stops close enough to be served by a line, nearest first. Empty when
    /// the line has no path.
    pub fn stops_near_line(&self, id: LineId) -> Result<Vec<(Stop, f64)>> {
        let tx = self.begin()?;
        let line = tx.get_line(id)?;
        match &line.path {
            Some(path) => self.stops_near(&tx, path, self.config.max_distance),
            None => Ok(Vec::new()),
        }
    }

    fn stops_near<T: StopStore>(&self, tx: &T, path: &Polyline, radius: f64) -> Result<Vec<(Stop, f64)>> {
        let stops: BTreeMap<StopId, Stop> = tx.all_stops()?.into_iter().map(|s| (s.id, s)).collect();
        let tree = index::stop_tree(stops.values());

        let mut found: Vec<(Stop, f64)> = index::stops_near_path(&tree, path.line_string(), radius)
            .into_iter()
            .filter_map(|id| stops.get(&id).cloned())
            .map(|stop| {
                let distance = self.geometry.distance(&stop.location, path);
                (stop, distance)
            })
            .collect();
        found.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.id.cmp(&b.0.id)));
        Ok(found)
    }

    /// Lines whose path passes within `max_distance` of a stop, nearest first.
    pub fn lines_near_stop(&self, id: StopId) -> Result<Vec<(Line, f64)>> {
        let tx = self.begin()?;
        let stop = tx.get_stop(id)?;
        let lines: BTreeMap<LineId, Line> = tx.all_lines()?.into_iter().map(|l| (l.id, l)).collect();
        let tree = index::path_tree(lines.values());

        let max = self.config.max_distance;
        let hits: BTreeSet<LineId> = tree
            .locate_within_distance([stop.location.x(), stop.location.y()], max * max)
            .map(|node| node.line)
            .collect();

        let mut found: Vec<(Line, f64)> = hits
            .into_iter()
            .filter_map(|id| lines.get(&id).cloned())
            .filter_map(|line| {
                let distance = self.geometry.distance(&stop.location, line.path.as_ref()?);
                Some((line, distance))
            })
            .collect();
        found.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.id.cmp(&b.0.id)));
        Ok(found)
    }

    // ========================================================================
    // Audit
    // ========================================================================

    /// Check every invariant against the stored network.
    pub fn audit(&self) -> Result<AuditReport> {
        let tx = self.begin()?;
        audit::audit(&tx, &self.geometry, self.config.max_distance)
    }
}

/// Position of a stop in a line's route, as stored on its association.
fn route_sequence(index: usize) -> Result<u32> {
    u32::try_from(index).map_err(|_| {
        TopologyError::InvalidArgument(format!("stop position {} exceeds the route limit", index))
    })
}

/// Recompute and persist the derived flags of one stop.
fn refresh_stop<T: StopStore + AssociationStore>(tx: &mut T, id: StopId) -> Result<Stop> {
    let mut stop = tx.get_stop(id)?;
    let flags = StopFlags::derive(&tx.associations_for_stop(id)?);
    if stop.apply_flags(flags) {
        return tx.save_stop(stop);
    }
    Ok(stop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStorage;

    // Horizontal path along y = 0 from x = 0 to x = 1000
    const PATH: &[(f64, f64)] = &[(0.0, 0.0), (500.0, 0.0), (1000.0, 0.0)];

    fn engine() -> TopologyEngine<MemoryStorage> {
        TopologyEngine::new(MemoryStorage::new())
    }

    fn stop_at(engine: &TopologyEngine<MemoryStorage>, name: &str, x: f64, y: f64) -> StopId {
        engine
            .create_stop(StopDetails::named(name), Some((x, y)))
            .unwrap()
            .id
    }

    fn assert_clean(engine: &TopologyEngine<MemoryStorage>) {
        let report = engine.audit().unwrap();
        assert!(report.is_clean(), "violations: {:?}", report.violations);
    }

    #[test]
    fn test_create_stop_starts_inactive() {
        let engine = engine();
        let stop = engine
            .create_stop(StopDetails::named("Terminal"), Some((10.0, 20.0)))
            .unwrap();

        assert!(!stop.active);
        assert!(!stop.locked);
        assert!(stop.details.enabled);
        assert_eq!(engine.stop(stop.id).unwrap(), stop);
    }

    #[test]
    fn test_create_stop_requires_location() {
        let engine = engine();
        let err = engine.create_stop(StopDetails::named("x"), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = engine
            .create_stop(StopDetails::named("x"), Some((f64::NAN, 1.0)))
            .unwrap_err();
        assert!(matches!(err, TopologyError::InvalidGeometry(_)));
        assert!(engine.stops().unwrap().is_empty());
    }

    #[test]
    fn test_endpoint_assignment() {
        let engine = engine();
        let a = stop_at(&engine, "A", 0.0, 5.0);
        let b = stop_at(&engine, "B", 300.0, -5.0);
        let c = stop_at(&engine, "C", 600.0, 5.0);
        let d = stop_at(&engine, "D", 1000.0, 0.0);

        let line = engine
            .create_line(LineDetails::described("L1"), &[a, b, c, d], Some(PATH))
            .unwrap();

        let endpoints: Vec<(StopId, bool)> = engine
            .associations_for_line(line.id)
            .unwrap()
            .iter()
            .map(|a| (a.stop(), a.is_endpoint))
            .collect();
        assert_eq!(endpoints, vec![(a, true), (b, false), (c, false), (d, true)]);

        for id in [a, b, c, d] {
            assert!(engine.stop(id).unwrap().active);
        }
        assert!(engine.stop(a).unwrap().locked);
        assert!(!engine.stop(b).unwrap().locked);
        assert!(!engine.stop(c).unwrap().locked);
        assert!(engine.stop(d).unwrap().locked);
        assert_clean(&engine);
    }

    #[test]
    fn test_create_line_without_stops_or_path() {
        let engine = engine();
        let line = engine
            .create_line(LineDetails::described("empty"), &[], None)
            .unwrap();
        assert!(line.path.is_none());
        assert!(engine.stops_for_line(line.id).unwrap().is_empty());
    }

    #[test]
    fn test_single_stop_line_is_endpoint() {
        let engine = engine();
        let a = stop_at(&engine, "A", 0.0, 0.0);
        let line = engine
            .create_line(LineDetails::described("shuttle"), &[a], None)
            .unwrap();

        let associations = engine.associations_for_line(line.id).unwrap();
        assert_eq!(associations.len(), 1);
        assert!(associations[0].is_endpoint);
        assert!(engine.stop(a).unwrap().locked);
    }

    #[test]
    fn test_create_line_missing_stop_rolls_back() {
        let engine = engine();
        let a = stop_at(&engine, "A", 0.0, 0.0);
        let b = stop_at(&engine, "B", 10.0, 0.0);
        let d = stop_at(&engine, "D", 30.0, 0.0);

        let err = engine
            .create_line(
                LineDetails::described("broken"),
                &[a, b, StopId::new(999), d],
                Some(PATH),
            )
            .unwrap_err();

        assert!(matches!(err, TopologyError::StopNotFound(id) if id == StopId::new(999)));
        assert!(engine.lines().unwrap().is_empty());
        assert_eq!(engine.audit().unwrap().associations, 0);
        assert!(!engine.stop(a).unwrap().active);
    }

    #[test]
    fn test_create_line_rejects_stop_out_of_range() {
        let engine = engine();
        let a = stop_at(&engine, "A", 0.0, 0.0);
        let far = stop_at(&engine, "far", 500.0, 40.0);

        let err = engine
            .create_line(LineDetails::described("L"), &[a, far], Some(PATH))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(engine.lines().unwrap().is_empty());
    }

    #[test]
    fn test_create_line_rejects_degenerate_path() {
        let engine = engine();
        let err = engine
            .create_line(LineDetails::described("L"), &[], Some(&[(1.0, 1.0)]))
            .unwrap_err();
        assert!(matches!(err, TopologyError::InvalidGeometry(_)));
        assert!(engine.lines().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_stop_yields_single_association() {
        let engine = engine();
        let a = stop_at(&engine, "A", 0.0, 0.0);
        let b = stop_at(&engine, "B", 500.0, 0.0);

        // Circular route: A appears at both ends
        let line = engine
            .create_line(LineDetails::described("loop"), &[a, b, a], Some(PATH))
            .unwrap();

        let associations = engine.associations_for_line(line.id).unwrap();
        assert_eq!(associations.len(), 2);
        let a_assoc = associations.iter().find(|x| x.stop() == a).unwrap();
        assert!(a_assoc.is_endpoint);
        assert_eq!(a_assoc.sequence, 0);

        // Interior repeat does not make a non-endpoint into one
        let line = engine
            .create_line(LineDetails::described("zigzag"), &[a, b, b, a], Some(PATH))
            .unwrap();
        let associations = engine.associations_for_line(line.id).unwrap();
        let b_assoc = associations.iter().find(|x| x.stop() == b).unwrap();
        assert!(!b_assoc.is_endpoint);
        assert_clean(&engine);
    }

    #[test]
    fn test_stops_for_line_in_route_order() {
        let engine = engine();
        let c = stop_at(&engine, "C", 900.0, 0.0);
        let a = stop_at(&engine, "A", 100.0, 0.0);
        let b = stop_at(&engine, "B", 500.0, 0.0);

        let line = engine
            .create_line(LineDetails::described("L"), &[a, b, c], Some(PATH))
            .unwrap();

        let names: Vec<String> = engine
            .stops_for_line(line.id)
            .unwrap()
            .into_iter()
            .map(|s| s.details.name)
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);

        assert!(matches!(
            engine.stops_for_line(LineId::new(404)),
            Err(TopologyError::LineNotFound(_))
        ));
    }

    #[test]
    fn test_delete_line_cascade() {
        let engine = engine();
        let a = stop_at(&engine, "A", 0.0, 0.0);
        let b = stop_at(&engine, "B", 1000.0, 0.0);
        let line = engine
            .create_line(LineDetails::described("L"), &[a, b], Some(PATH))
            .unwrap();

        engine.delete_line(line.id).unwrap();

        for id in [a, b] {
            let stop = engine.stop(id).unwrap();
            assert!(!stop.active);
            assert!(!stop.locked);
        }
        assert!(engine.lines().unwrap().is_empty());
        assert_clean(&engine);
    }

    #[test]
    fn test_delete_line_keeps_endpoint_of_other_line() {
        let engine = engine();
        let a = stop_at(&engine, "A", 0.0, 0.0);
        let b = stop_at(&engine, "B", 500.0, 0.0);
        let c = stop_at(&engine, "C", 1000.0, 0.0);

        let first = engine
            .create_line(LineDetails::described("first"), &[a, b], Some(PATH))
            .unwrap();
        // B is interior here, A is an endpoint on both
        engine
            .create_line(LineDetails::described("second"), &[a, b, c], Some(PATH))
            .unwrap();

        engine.delete_line(first.id).unwrap();

        let a = engine.stop(a).unwrap();
        assert!(a.active && a.locked);
        let b = engine.stop(b).unwrap();
        assert!(b.active);
        assert!(!b.locked);
        assert_clean(&engine);
    }

    #[test]
    fn test_delete_missing_line() {
        let engine = engine();
        let err = engine.delete_line(LineId::new(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_edit_stop_distance_invalidation() {
        let engine = engine();
        let s = stop_at(&engine, "S", 500.0, 10.0);
        let line = engine
            .create_line(LineDetails::described("L"), &[s], Some(PATH))
            .unwrap();
        assert!(engine.stop(s).unwrap().active);

        let moved = engine
            .edit_stop(s, StopDetails::named("S"), Some((500.0, 30.0)))
            .unwrap();

        assert!(!moved.active);
        assert!(!moved.locked);
        assert!(engine.associations_for_line(line.id).unwrap().is_empty());
        assert_clean(&engine);
    }

    #[test]
    fn test_edit_stop_within_range_keeps_association() {
        let engine = engine();
        let s = stop_at(&engine, "S", 500.0, 10.0);
        engine
            .create_line(LineDetails::described("L"), &[s], Some(PATH))
            .unwrap();

        let moved = engine
            .edit_stop(s, StopDetails::named("S"), Some((520.0, -24.0)))
            .unwrap();
        assert!(moved.active);
        assert!(moved.locked);
        assert_eq!(moved.location.y(), -24.0);
    }

    #[test]
    fn test_edit_stop_keeps_other_lines() {
        let engine = engine();
        let s = stop_at(&engine, "S", 500.0, 0.0);
        let horizontal = engine
            .create_line(LineDetails::described("h"), &[s], Some(PATH))
            .unwrap();
        let vertical = engine
            .create_line(
                LineDetails::described("v"),
                &[s],
                Some(&[(500.0, -1000.0), (500.0, 1000.0)]),
            )
            .unwrap();

        let moved = engine
            .edit_stop(s, StopDetails::named("S"), Some((500.0, 300.0)))
            .unwrap();

        assert!(moved.active);
        let lines: Vec<LineId> = engine.lines_for_stop(s).unwrap().iter().map(|l| l.id).collect();
        assert_eq!(lines, vec![vertical.id]);
        assert!(engine.associations_for_line(horizontal.id).unwrap().is_empty());
        assert_clean(&engine);
    }

    #[test]
    fn test_edit_stop_fields_only() {
        let engine = engine();
        let s = stop_at(&engine, "old", 1.0, 2.0);

        let mut details = StopDetails::named("new");
        details.shelter = true;
        details.enabled = false;
        let edited = engine.edit_stop(s, details.clone(), None).unwrap();

        assert_eq!(edited.details, details);
        assert_eq!((edited.location.x(), edited.location.y()), (1.0, 2.0));
        assert!(matches!(
            engine.edit_stop(StopId::new(77), details, None),
            Err(TopologyError::StopNotFound(_))
        ));
    }

    #[test]
    fn test_edit_line_path_revalidates() {
        let engine = engine();
        let a = stop_at(&engine, "A", 0.0, 0.0);
        let b = stop_at(&engine, "B", 500.0, 20.0);
        let c = stop_at(&engine, "C", 1000.0, 0.0);
        let line = engine
            .create_line(LineDetails::described("L"), &[a, b, c], Some(PATH))
            .unwrap();

        // Straight path now misses B by 20 + 15
        let shifted: &[(f64, f64)] = &[(0.0, -15.0), (1000.0, -15.0)];
        let edited = engine
            .edit_line(line.id, LineDetails::described("L'"), Some(shifted))
            .unwrap();

        assert_eq!(edited.details.description, "L'");
        assert_eq!(edited.path.as_ref().unwrap().vertex_count(), 2);
        let remaining: Vec<StopId> = engine
            .associations_for_line(line.id)
            .unwrap()
            .iter()
            .map(|a| a.stop())
            .collect();
        assert_eq!(remaining, vec![a, c]);
        assert!(!engine.stop(b).unwrap().active);
        assert_clean(&engine);
    }

    #[test]
    fn test_edit_line_detaching_endpoint_unlocks() {
        let engine = engine();
        let a = stop_at(&engine, "A", 0.0, 0.0);
        let b = stop_at(&engine, "B", 1000.0, 0.0);
        let line = engine
            .create_line(LineDetails::described("L"), &[a, b], Some(PATH))
            .unwrap();

        engine
            .edit_line(line.id, LineDetails::described("L"), Some(&[(0.0, 0.0), (0.0, 900.0)]))
            .unwrap();

        let b = engine.stop(b).unwrap();
        assert!(!b.active);
        assert!(!b.locked);
        assert!(engine.stop(a).unwrap().locked);
        assert_clean(&engine);
    }

    #[test]
    fn test_edit_line_sets_first_path() {
        let engine = engine();
        let near = stop_at(&engine, "near", 100.0, 5.0);
        let far = stop_at(&engine, "far", 100.0, 500.0);
        let line = engine
            .create_line(LineDetails::described("draft"), &[near, far], None)
            .unwrap();
        assert_clean(&engine);

        engine
            .edit_line(line.id, LineDetails::described("draft"), Some(PATH))
            .unwrap();

        let stops: Vec<StopId> = engine.stops_for_line(line.id).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(stops, vec![near]);
        assert_clean(&engine);
    }

    #[test]
    fn test_edit_line_without_path_keeps_geometry() {
        let engine = engine();
        let line = engine
            .create_line(LineDetails::described("L"), &[], Some(PATH))
            .unwrap();
        let edited = engine
            .edit_line(line.id, LineDetails::described("renamed"), None)
            .unwrap();
        assert_eq!(edited.path, line.path);
        assert!(matches!(
            engine.edit_line(LineId::new(9), LineDetails::default(), None),
            Err(TopologyError::LineNotFound(_))
        ));
    }

    #[test]
    fn test_delete_stop_removes_associations() {
        let engine = engine();
        let a = stop_at(&engine, "A", 0.0, 0.0);
        let b = stop_at(&engine, "B", 500.0, 0.0);
        let line = engine
            .create_line(LineDetails::described("L"), &[a, b], Some(PATH))
            .unwrap();

        engine.delete_stop(a).unwrap();

        assert!(matches!(engine.stop(a), Err(TopologyError::StopNotFound(_))));
        let remaining = engine.stops_for_line(line.id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b);
        assert!(engine.line(line.id).is_ok());
        assert_clean(&engine);

        assert!(matches!(engine.delete_stop(a), Err(TopologyError::StopNotFound(_))));
    }

    #[test]
    fn test_stops_near_path() {
        let engine = engine();
        let on = stop_at(&engine, "on", 200.0, 0.0);
        let near = stop_at(&engine, "near", 700.0, -20.0);
        stop_at(&engine, "far", 700.0, 60.0);
        stop_at(&engine, "past end", 1030.0, 0.0);

        let found = engine.stops_near_path(PATH, 25.0).unwrap();
        let ids: Vec<StopId> = found.iter().map(|(s, _)| s.id).collect();
        assert_eq!(ids, vec![on, near]);
        assert!((found[1].1 - 20.0).abs() < 1e-9);

        assert!(engine.stops_near_path(PATH, -1.0).is_err());
        assert!(engine.stops_near_path(&[(0.0, 0.0)], 1.0).is_err());
    }

    #[test]
    fn test_stops_near_line_uses_max_distance() {
        let engine = engine();
        let inside = stop_at(&engine, "inside", 10.0, 24.0);
        stop_at(&engine, "outside", 10.0, 26.0);

        let line = engine
            .create_line(LineDetails::described("L"), &[], Some(PATH))
            .unwrap();
        let found: Vec<StopId> = engine
            .stops_near_line(line.id)
            .unwrap()
            .iter()
            .map(|(s, _)| s.id)
            .collect();
        assert_eq!(found, vec![inside]);

        let pathless = engine
            .create_line(LineDetails::described("draft"), &[], None)
            .unwrap();
        assert!(engine.stops_near_line(pathless.id).unwrap().is_empty());
    }

    #[test]
    fn test_lines_near_stop() {
        let engine = engine();
        let s = stop_at(&engine, "S", 500.0, 10.0);
        let horizontal = engine
            .create_line(LineDetails::described("h"), &[], Some(PATH))
            .unwrap();
        let vertical = engine
            .create_line(
                LineDetails::described("v"),
                &[],
                Some(&[(505.0, -100.0), (505.0, 100.0)]),
            )
            .unwrap();
        engine
            .create_line(LineDetails::described("far"), &[], Some(&[(0.0, 400.0), (1000.0, 400.0)]))
            .unwrap();

        let found: Vec<LineId> = engine
            .lines_near_stop(s)
            .unwrap()
            .iter()
            .map(|(l, _)| l.id)
            .collect();
        assert_eq!(found, vec![vertical.id, horizontal.id]);
    }

    #[test]
    fn test_custom_max_distance() {
        let config = EngineConfig::default().with_max_distance(50.0);
        let engine = TopologyEngine::with_config(MemoryStorage::new(), config).unwrap();
        let s = stop_at(&engine, "S", 500.0, 40.0);

        let line = engine
            .create_line(LineDetails::described("L"), &[s], Some(PATH))
            .unwrap();
        assert_eq!(engine.stops_for_line(line.id).unwrap().len(), 1);

        assert!(TopologyEngine::with_config(
            MemoryStorage::new(),
            EngineConfig::default().with_max_distance(-5.0)
        )
        .is_err());
    }

    #[test]
    fn test_route_sequence_bounds() {
        assert_eq!(route_sequence(0).unwrap(), 0);
        assert_eq!(route_sequence(u32::MAX as usize).unwrap(), u32::MAX);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_route_sequence_overflow_is_rejected() {
        let err = route_sequence(u32::MAX as usize + 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_open_transaction_only_blocks_its_rows() {
        let config = EngineConfig::default().with_lock_timeout(std::time::Duration::from_millis(20));
        let engine = TopologyEngine::with_config(MemoryStorage::new(), config).unwrap();
        let a = stop_at(&engine, "A", 0.0, 0.0);
        let b = stop_at(&engine, "B", 100.0, 0.0);

        let held = engine.storage().begin(engine.config().lock_timeout).unwrap();
        held.get_stop(a).unwrap();

        let edited = engine.edit_stop(b, StopDetails::named("B2"), Some((110.0, 0.0))).unwrap();
        assert_eq!(edited.details.name, "B2");
        engine.create_line(LineDetails::described("L"), &[b], Some(PATH)).unwrap();

        let err = engine.edit_stop(a, StopDetails::named("A2"), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        drop(held);
        assert_eq!(engine.edit_stop(a, StopDetails::named("A2"), None).unwrap().details.name, "A2");
        assert_clean(&engine);
    }
}
