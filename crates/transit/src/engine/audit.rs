//! Consistency audit over a whole network.
//!
//! Recomputes every derived value from scratch and reports where stored state
//! disagrees. A healthy network always produces an empty report.

use std::collections::BTreeMap;

use crate::identifiers::*;
use crate::models::{entities::*, traits::*, types::Result};
use crate::spatial::geometry::GeometryAdapter;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Violation {
    #[error("stop {stop}: active is {stored}, expected {expected}")]
    ActiveMismatch { stop: StopId, stored: bool, expected: bool },

    #[error("stop {stop}: locked is {stored}, expected {expected}")]
    LockedMismatch { stop: StopId, stored: bool, expected: bool },

    #[error("{key}: stop is {distance:.2} from the path, limit {limit}")]
    OutOfRange { key: AssociationKey, distance: f64, limit: f64 },

    #[error("{key}: references a missing line or stop")]
    Dangling { key: AssociationKey },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuditReport {
    pub stops: usize,
    pub lines: usize,
    pub associations: usize,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

pub fn audit<T>(store: &T, geometry: &GeometryAdapter, max_distance: f64) -> Result<AuditReport>
where
    T: StopStore + LineStore + AssociationStore,
{
    let stops: BTreeMap<StopId, Stop> = store.all_stops()?.into_iter().map(|s| (s.id, s)).collect();
    let lines: BTreeMap<LineId, Line> = store.all_lines()?.into_iter().map(|l| (l.id, l)).collect();
    let associations = store.all_associations()?;

    let mut violations = Vec::new();
    let mut by_stop: BTreeMap<StopId, Vec<Association>> = BTreeMap::new();

    for association in &associations {
        let (Some(stop), Some(line)) = (stops.get(&association.stop()), lines.get(&association.line()))
        else {
            violations.push(Violation::Dangling { key: association.key });
            continue;
        };

        by_stop.entry(stop.id).or_default().push(*association);

        if let Some(path) = &line.path {
            let distance = geometry.distance(&stop.location, path);
            if distance > max_distance {
                violations.push(Violation::OutOfRange {
                    key: association.key,
                    distance,
                    limit: max_distance,
                });
            }
        }
    }

    for stop in stops.values() {
        let expected = StopFlags::derive(by_stop.get(&stop.id).into_iter().flatten());

        if stop.active != expected.active {
            violations.push(Violation::ActiveMismatch {
                stop: stop.id,
                stored: stop.active,
                expected: expected.active,
            });
        }
        if stop.locked != expected.locked {
            violations.push(Violation::LockedMismatch {
                stop: stop.id,
                stored: stop.locked,
                expected: expected.locked,
            });
        }
    }

    Ok(AuditReport {
        stops: stops.len(),
        lines: lines.len(),
        associations: associations.len(),
        violations,
    })
}
