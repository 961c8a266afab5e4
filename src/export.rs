//! GeoJSON layers: the normalized edge layer, the intermediate lixel layer
//! and the final density layer.

use crate::error::{StageFailure, io_err};
use crate::lixel::Lixel;
use crate::result_mapper::DensityLixel;
use crate::road_graph::RoadGraph;
use geo::{Coord, LineString};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, JsonValue};
use serde_json::json;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Display name of a density layer, e.g. `nkdv_b500_crashes`.
pub fn layer_name(bandwidth: f64, input_name: &str) -> String {
    format!("nkdv_b{}_{}", bandwidth as i64, input_name)
}

fn feature(geometry: Geometry, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geometry),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn collection(features: Vec<Feature>, name: Option<&str>) -> FeatureCollection {
    let foreign_members = name.map(|n| {
        let mut members = JsonObject::new();
        members.insert("name".to_string(), JsonValue::String(n.to_string()));
        members
    });
    FeatureCollection {
        bbox: None,
        features,
        foreign_members,
    }
}

fn to_input_crs(graph: &RoadGraph, ls: &LineString) -> LineString {
    ls.0.iter()
        .map(|c| {
            let (x, y) = graph.to_input_crs(*c);
            Coord { x, y }
        })
        .collect()
}

fn lixel_properties(lixel: &Lixel) -> JsonObject {
    let mut properties = JsonObject::new();
    properties.insert("edge_u".to_string(), json!(lixel.edge_u));
    properties.insert("edge_v".to_string(), json!(lixel.edge_v));
    properties.insert("start_offset".to_string(), json!(lixel.start_offset));
    properties.insert("end_offset".to_string(), json!(lixel.end_offset));
    properties
}

/// Normalized edges in the input CRS.
pub fn edges_layer(graph: &RoadGraph) -> FeatureCollection {
    let features = graph
        .edges()
        .iter()
        .map(|edge| {
            let mut properties = JsonObject::new();
            properties.insert("u".to_string(), json!(edge.u));
            properties.insert("v".to_string(), json!(edge.v));
            properties.insert("length".to_string(), json!(edge.length));
            feature(
                Geometry::from(&to_input_crs(graph, &edge.geometry)),
                properties,
            )
        })
        .collect();
    collection(features, Some("edges"))
}

/// Lixels in the graph's plane, in emission order.
pub fn lixel_layer(lixels: &[Lixel]) -> FeatureCollection {
    let features = lixels
        .iter()
        .map(|lixel| feature(Geometry::from(&lixel.geometry), lixel_properties(lixel)))
        .collect();
    collection(features, Some("lixels"))
}

/// Rebuild lixels from [`lixel_layer`] output, keeping feature order.
pub fn lixels_from_layer(layer: FeatureCollection) -> Result<Vec<Lixel>, String> {
    layer
        .features
        .into_iter()
        .enumerate()
        .map(|(i, feature)| {
            let id = |key: &str| {
                feature
                    .property(key)
                    .and_then(JsonValue::as_u64)
                    .map(|v| v as usize)
                    .ok_or_else(|| format!("feature {}: missing integer '{}'", i, key))
            };
            let offset = |key: &str| {
                feature
                    .property(key)
                    .and_then(JsonValue::as_f64)
                    .ok_or_else(|| format!("feature {}: missing number '{}'", i, key))
            };
            let edge_u = id("edge_u")?;
            let edge_v = id("edge_v")?;
            let start_offset = offset("start_offset")?;
            let end_offset = offset("end_offset")?;
            let geometry = feature
                .geometry
                .clone()
                .ok_or_else(|| format!("feature {}: no geometry", i))?;
            let geometry = LineString::<f64>::try_from(geometry.value)
                .map_err(|e| format!("feature {}: {}", i, e))?;
            Ok(Lixel {
                edge_u,
                edge_v,
                start_offset,
                end_offset,
                geometry,
            })
        })
        .collect()
}

/// Final density layer in the input CRS, one feature per lixel with its
/// `value`.
pub fn density_layer(graph: &RoadGraph, mapped: &[DensityLixel], name: &str) -> FeatureCollection {
    let features = mapped
        .iter()
        .map(|d| {
            let mut properties = lixel_properties(&d.lixel);
            properties.insert("value".to_string(), json!(d.value));
            feature(
                Geometry::from(&to_input_crs(graph, &d.lixel.geometry)),
                properties,
            )
        })
        .collect();
    collection(features, Some(name))
}

pub fn write_layer(path: &Path, layer: FeatureCollection) -> Result<(), StageFailure> {
    let file = File::create(path).map_err(|e| io_err!(StageFailure, path, e))?;
    serde_json::to_writer(BufWriter::new(file), &GeoJson::from(layer)).map_err(|source| {
        StageFailure::Layer {
            path: path.to_path_buf(),
            source,
        }
    })
}

pub fn read_layer(path: &Path) -> Result<FeatureCollection, StageFailure> {
    let text = std::fs::read_to_string(path).map_err(|e| io_err!(StageFailure, path, e))?;
    let bad = |reason: String| StageFailure::BadLayer {
        path: path.to_path_buf(),
        reason,
    };
    let geojson = text.parse::<GeoJson>().map_err(|e| bad(e.to_string()))?;
    FeatureCollection::try_from(geojson).map_err(|e| bad(e.to_string()))
}
