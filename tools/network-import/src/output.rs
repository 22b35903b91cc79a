use anyhow::{Context, Result};
use busnet_transit::{Line, Stop, StopId, Storage, TopologyEngine};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, Value};
use serde_json::json;
use std::path::Path;

/// Key written as a stop's `ref` and used in line `stops` lists, so the
/// output can be read back by the importer
pub fn stop_ref(id: StopId) -> String {
    format!("stop-{}", id)
}

fn stop_to_feature(stop: &Stop) -> Feature {
    let details = &stop.details;

    let mut properties = serde_json::Map::new();
    properties.insert("feature_type".to_string(), json!("stop"));
    properties.insert("id".to_string(), json!(stop.id.get()));
    properties.insert("ref".to_string(), json!(stop_ref(stop.id)));
    properties.insert("name".to_string(), json!(details.name));
    properties.insert("route_code".to_string(), json!(details.route_code));
    properties.insert("department".to_string(), json!(details.department));
    properties.insert("city".to_string(), json!(details.city));
    properties.insert("direction".to_string(), json!(details.direction));
    properties.insert("shelter".to_string(), json!(details.shelter));
    properties.insert("notes".to_string(), json!(details.notes));
    properties.insert("enabled".to_string(), json!(details.enabled));
    // Derived state, ignored on import
    properties.insert("active".to_string(), json!(stop.active));
    properties.insert("locked".to_string(), json!(stop.locked));

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Point(vec![
            stop.location.x(),
            stop.location.y(),
        ]))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Lines without a path are written with a null geometry
fn line_to_feature(line: &Line, stops: &[StopId]) -> Feature {
    let details = &line.details;
    let refs: Vec<String> = stops.iter().map(|id| stop_ref(*id)).collect();

    let mut properties = serde_json::Map::new();
    properties.insert("feature_type".to_string(), json!("line"));
    properties.insert("id".to_string(), json!(line.id.get()));
    properties.insert("description".to_string(), json!(details.description));
    properties.insert("schedule".to_string(), json!(details.schedule));
    properties.insert("operator".to_string(), json!(details.operator));
    properties.insert("origin_department".to_string(), json!(details.origin.department));
    properties.insert("origin_city".to_string(), json!(details.origin.city));
    properties.insert("destination_department".to_string(), json!(details.destination.department));
    properties.insert("destination_city".to_string(), json!(details.destination.city));
    properties.insert("notes".to_string(), json!(details.notes));
    properties.insert("stops".to_string(), json!(refs));

    let geometry = line.path.as_ref().map(|path| {
        let coords: Vec<Vec<f64>> = path.coords().map(|(x, y)| vec![x, y]).collect();
        Geometry::new(Value::LineString(coords))
    });

    Feature {
        bbox: None,
        geometry,
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Build a FeatureCollection with every stop followed by every line
pub fn network_to_geojson<S: Storage>(engine: &TopologyEngine<S>) -> Result<FeatureCollection> {
    let stops = engine.stops().context("Failed to read stops")?;
    let lines = engine.lines().context("Failed to read lines")?;

    let mut features: Vec<Feature> = stops.iter().map(stop_to_feature).collect();

    for line in &lines {
        let stop_ids: Vec<StopId> = engine
            .associations_for_line(line.id)
            .with_context(|| format!("Failed to read stops of line {}", line.id))?
            .iter()
            .map(|association| association.stop())
            .collect();
        features.push(line_to_feature(line, &stop_ids));
    }

    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

/// Write the resulting network to a GeoJSON file
pub fn write_network_geojson<S: Storage>(engine: &TopologyEngine<S>, output_path: &Path) -> Result<()> {
    let feature_collection = network_to_geojson(engine)?;

    log::info!(
        "Writing {} features to {}",
        feature_collection.features.len(),
        output_path.display()
    );

    let geojson = GeoJson::from(feature_collection);
    let json_string = serde_json::to_string_pretty(&geojson)
        .context("Failed to serialize GeoJSON")?;

    std::fs::write(output_path, json_string)
        .with_context(|| format!("Failed to write GeoJSON to {}", output_path.display()))?;

    Ok(())
}
