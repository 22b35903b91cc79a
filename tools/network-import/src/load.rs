use anyhow::{Context, Result};
use busnet_transit::{Storage, StopId, TopologyEngine};
use std::collections::HashMap;

use crate::input::NetworkInput;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImportStats {
    pub stops_created: usize,
    pub stops_failed: usize,
    pub lines_created: usize,
    pub lines_failed: usize,
    pub associations: usize,
}

impl ImportStats {
    pub fn log_summary(&self) {
        log::info!("=== Import Statistics ===");
        log::info!("Stops created: {}", self.stops_created);
        log::info!("Lines created: {}", self.lines_created);
        log::info!("Associations: {}", self.associations);
        if self.stops_failed > 0 {
            log::warn!("Stops rejected: {}", self.stops_failed);
        }
        if self.lines_failed > 0 {
            log::warn!("Lines rejected: {}", self.lines_failed);
        }
    }
}

/// Feed parsed records through the engine: every stop first, then every line.
///
/// A record the engine rejects is logged and skipped; the remaining records
/// are still imported. Fails only if the loaded network cannot be read back.
pub fn load_network<S: Storage>(engine: &TopologyEngine<S>, input: NetworkInput) -> Result<ImportStats> {
    let mut stats = ImportStats::default();
    let mut keys: HashMap<String, StopId> = HashMap::with_capacity(input.stops.len());

    for record in input.stops {
        if keys.contains_key(&record.key) {
            log::warn!("  Duplicate stop ref '{}', keeping the first one", record.key);
            stats.stops_failed += 1;
            continue;
        }

        match engine.create_stop(record.details, Some(record.point)) {
            Ok(stop) => {
                log::debug!("  Stop '{}' -> {}", record.key, stop.id);
                keys.insert(record.key, stop.id);
                stats.stops_created += 1;
            }
            Err(err) => {
                log::warn!("  Stop '{}' rejected: {}", record.key, err);
                stats.stops_failed += 1;
            }
        }
    }

    for record in input.lines {
        let unknown: Vec<&str> = record
            .stops
            .iter()
            .filter(|key| !keys.contains_key(key.as_str()))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            log::warn!(
                "  Line '{}' skipped: unknown stop refs {}",
                record.label,
                unknown.join(", ")
            );
            stats.lines_failed += 1;
            continue;
        }

        let stop_ids: Vec<StopId> = record.stops.iter().map(|key| keys[key.as_str()]).collect();

        match engine.create_line(record.details, &stop_ids, record.path.as_deref()) {
            Ok(line) => {
                log::debug!("  Line '{}' -> {} ({} stops)", record.label, line.id, stop_ids.len());
                stats.lines_created += 1;
            }
            Err(err) => {
                log::warn!("  Line '{}' rejected: {}", record.label, err);
                stats.lines_failed += 1;
            }
        }
    }

    for line in engine.lines().context("Failed to read lines")? {
        stats.associations += engine
            .associations_for_line(line.id)
            .with_context(|| format!("Failed to read stops of line {}", line.id))?
            .len();
    }

    Ok(stats)
}
