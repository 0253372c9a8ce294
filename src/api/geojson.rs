//! GeoJSON output for areas. Geometries come from PostGIS already in EPSG:4326.

use crate::domain::model::{ForestArea, Picture};
use serde_json::{json, Map, Value};

fn area_properties(area: &ForestArea) -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert("id".to_string(), json!(area.id));
    properties.insert("layer_id".to_string(), json!(area.layer_id));
    properties.insert("name".to_string(), json!(area.name));
    properties.insert("description".to_string(), json!(area.description));
    properties.insert("municipality".to_string(), json!(area.municipality));
    properties.insert("region".to_string(), json!(area.region));
    properties.insert("area_ha".to_string(), json!(area.area_ha));
    properties.insert("date".to_string(), json!(area.date));
    properties.insert("owner".to_string(), json!(area.owner));
    properties.insert(
        "person_responsible".to_string(),
        json!(area.person_responsible),
    );
    properties.insert("original_id".to_string(), json!(area.original_id));
    properties.insert("created_ts".to_string(), json!(area.created_ts));
    properties.insert("updated_ts".to_string(), json!(area.updated_ts));
    properties
}

/// Area outline feature with the urls of its pictures.
pub fn area_feature(area: &ForestArea, picture_urls: &[&str]) -> Value {
    let mut properties = area_properties(area);
    properties.insert("pictures".to_string(), json!(picture_urls));
    json!({
        "type": "Feature",
        "id": area.id,
        "geometry": area.geometry.clone().unwrap_or(Value::Null),
        "properties": properties,
    })
}

/// Centroid point feature.
pub fn centroid_feature(area: &ForestArea, picture_urls: &[&str]) -> Value {
    let mut properties = area_properties(area);
    properties.insert("pictures".to_string(), json!(picture_urls));
    json!({
        "type": "Feature",
        "id": area.id,
        "geometry": area.centroid.clone().unwrap_or(Value::Null),
        "properties": properties,
    })
}

/// Single area with full picture records.
pub fn area_detail_feature(area: &ForestArea, pictures: &[Picture]) -> Value {
    let mut properties = area_properties(area);
    properties.insert("pictures".to_string(), json!(pictures));
    properties.insert(
        "original_properties".to_string(),
        area.original_properties.clone(),
    );
    properties.insert(
        "centroid".to_string(),
        area.centroid.clone().unwrap_or(Value::Null),
    );
    json!({
        "type": "Feature",
        "id": area.id,
        "geometry": area.geometry.clone().unwrap_or(Value::Null),
        "properties": properties,
    })
}

pub fn feature_collection(features: Vec<Value>) -> Value {
    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}
