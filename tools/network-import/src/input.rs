use anyhow::{bail, Context, Result};
use busnet_transit::{LineDetails, StopDetails, Terminus};
use geojson::{feature::Id, Feature, GeoJson, Value};
use serde::Deserialize;
use std::path::Path;

/// Properties of a `Point` feature describing a stop
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StopProperties {
    #[serde(rename = "ref")]
    key: Option<String>,
    name: Option<String>,
    route_code: Option<String>,
    department: Option<String>,
    city: Option<String>,
    direction: Option<String>,
    shelter: Option<bool>,
    notes: Option<String>,
    enabled: Option<bool>,
}

/// Properties of a `LineString` (or geometry-less) feature describing a line
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LineProperties {
    description: Option<String>,
    schedule: Option<String>,
    operator: Option<String>,
    origin_department: Option<String>,
    origin_city: Option<String>,
    destination_department: Option<String>,
    destination_city: Option<String>,
    notes: Option<String>,
    stops: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct StopRecord {
    /// Key other features use to reference this stop
    pub key: String,
    pub details: StopDetails,
    pub point: (f64, f64),
}

#[derive(Debug, Clone)]
pub struct LineRecord {
    /// Human readable label for log messages
    pub label: String,
    pub details: LineDetails,
    /// Stop keys in route order
    pub stops: Vec<String>,
    pub path: Option<Vec<(f64, f64)>>,
}

#[derive(Debug, Default)]
pub struct NetworkInput {
    pub stops: Vec<StopRecord>,
    pub lines: Vec<LineRecord>,
    pub skipped: usize,
}

enum Record {
    Stop(StopRecord),
    Line(LineRecord),
}

/// Read a network description from a GeoJSON file
pub fn read_network(path: &Path) -> Result<NetworkInput> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;

    parse_network(&content).with_context(|| format!("Failed to load network from: {}", path.display()))
}

/// Parse a FeatureCollection into stop and line records.
///
/// Features that cannot be interpreted are logged and counted in
/// [`NetworkInput::skipped`] rather than failing the whole import.
pub fn parse_network(content: &str) -> Result<NetworkInput> {
    let geojson: GeoJson = content.parse().context("Failed to parse GeoJSON")?;

    let GeoJson::FeatureCollection(collection) = geojson else {
        bail!("Expected a FeatureCollection");
    };

    let mut input = NetworkInput::default();

    for (index, feature) in collection.features.into_iter().enumerate() {
        match feature_to_record(feature, index) {
            Ok(Record::Stop(stop)) => input.stops.push(stop),
            Ok(Record::Line(line)) => input.lines.push(line),
            Err(err) => {
                log::warn!("  Skipping feature #{}: {:#}", index, err);
                input.skipped += 1;
            }
        }
    }

    log::debug!(
        "  Parsed {} stops, {} lines ({} skipped)",
        input.stops.len(),
        input.lines.len(),
        input.skipped
    );

    Ok(input)
}

fn feature_label(feature: &Feature, index: usize) -> String {
    match &feature.id {
        Some(Id::String(id)) => id.clone(),
        Some(Id::Number(id)) => id.to_string(),
        None => format!("#{}", index),
    }
}

fn feature_to_record(feature: Feature, index: usize) -> Result<Record> {
    let label = feature_label(&feature, index);
    let properties = serde_json::Value::Object(feature.properties.unwrap_or_default());

    match feature.geometry.map(|geometry| geometry.value) {
        Some(Value::Point(position)) => {
            let props: StopProperties =
                serde_json::from_value(properties).context("Invalid stop properties")?;
            let point = position_to_tuple(&position)?;
            Ok(Record::Stop(stop_record(props, label, point)))
        }
        Some(Value::LineString(positions)) => {
            let props: LineProperties =
                serde_json::from_value(properties).context("Invalid line properties")?;
            let path = positions
                .iter()
                .map(|position| position_to_tuple(position))
                .collect::<Result<Vec<_>>>()?;
            Ok(Record::Line(line_record(props, label, Some(path))))
        }
        // A line that has not been digitized yet
        None => {
            let props: LineProperties =
                serde_json::from_value(properties).context("Invalid line properties")?;
            if props.stops.is_none() {
                bail!("Feature has no geometry and no stop list");
            }
            Ok(Record::Line(line_record(props, label, None)))
        }
        Some(other) => bail!("Unsupported geometry type: {}", geometry_kind(&other)),
    }
}

fn geometry_kind(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}

fn position_to_tuple(position: &[f64]) -> Result<(f64, f64)> {
    match position {
        [x, y, ..] => Ok((*x, *y)),
        _ => bail!("Position has {} coordinates, expected at least 2", position.len()),
    }
}

fn stop_record(props: StopProperties, label: String, point: (f64, f64)) -> StopRecord {
    let key = props.key.unwrap_or_else(|| label.clone());
    let details = StopDetails {
        name: props.name.unwrap_or_else(|| key.clone()),
        route_code: props.route_code.unwrap_or_default(),
        department: props.department.unwrap_or_default(),
        city: props.city.unwrap_or_default(),
        direction: props.direction.unwrap_or_default(),
        shelter: props.shelter.unwrap_or(false),
        notes: props.notes.unwrap_or_default(),
        enabled: props.enabled.unwrap_or(true),
    };

    StopRecord { key, details, point }
}

fn line_record(props: LineProperties, label: String, path: Option<Vec<(f64, f64)>>) -> LineRecord {
    let details = LineDetails {
        description: props.description.unwrap_or_else(|| label.clone()),
        schedule: props.schedule.unwrap_or_default(),
        operator: props.operator.unwrap_or_default(),
        origin: Terminus::new(
            props.origin_department.unwrap_or_default(),
            props.origin_city.unwrap_or_default(),
        ),
        destination: Terminus::new(
            props.destination_department.unwrap_or_default(),
            props.destination_city.unwrap_or_default(),
        ),
        notes: props.notes.unwrap_or_default(),
    };

    LineRecord {
        label,
        details,
        stops: props.stops.unwrap_or_default(),
        path,
    }
}
