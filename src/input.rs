//! Loading the raw road graph and the query points from disk.

use crate::error::{InputError, io_err};
use crate::road_graph::RawGraph;
use geo::Coord;
use geojson::{FeatureCollection, GeoJson, JsonValue, Value};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct PointRow {
    #[serde(alias = "x", alias = "longitude", alias = "nkdv_x")]
    lon: f64,
    #[serde(alias = "y", alias = "latitude", alias = "nkdv_y")]
    lat: f64,
}

fn read_collection(path: &Path) -> Result<FeatureCollection, InputError> {
    let text = std::fs::read_to_string(path).map_err(|e| io_err!(InputError, path, e))?;
    let geo_err = |source: geojson::Error| InputError::GeoJson {
        path: path.to_path_buf(),
        source: Box::new(source),
    };
    let geojson = text.parse::<GeoJson>().map_err(geo_err)?;
    FeatureCollection::try_from(geojson).map_err(geo_err)
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

fn int_property(feature: &geojson::Feature, index: usize, key: &str) -> Result<i64, InputError> {
    feature
        .property(key)
        .and_then(JsonValue::as_i64)
        .ok_or_else(|| InputError::BadFeature {
            index,
            reason: format!("missing integer property '{}'", key),
        })
}

/// Read a road graph from a GeoJSON FeatureCollection.
///
/// Point features with an integer `id` are nodes. LineString features with
/// integer `u` and `v` (and optionally `key`) are directed edges whose
/// geometry runs from `u` to `v`, though it may be stored reversed.
pub fn load_graph_geojson(path: &Path) -> Result<RawGraph, InputError> {
    let collection = read_collection(path)?;
    let mut graph = RawGraph::new();

    for (index, feature) in collection.features.iter().enumerate() {
        let Some(geometry) = &feature.geometry else {
            return Err(InputError::BadFeature {
                index,
                reason: "feature has no geometry".to_string(),
            });
        };
        match &geometry.value {
            Value::Point(position) if position.len() >= 2 => {
                let id = int_property(feature, index, "id")?;
                graph.add_node(id, position[0], position[1]);
            }
            Value::LineString(positions) => {
                let u = int_property(feature, index, "u")?;
                let v = int_property(feature, index, "v")?;
                let coords: Vec<Coord> = positions
                    .iter()
                    .filter(|p| p.len() >= 2)
                    .map(|p| Coord { x: p[0], y: p[1] })
                    .collect();
                match feature.property("key").and_then(JsonValue::as_u64) {
                    Some(key) => graph.add_keyed_edge(u, v, key as u32, coords),
                    None => graph.add_edge(u, v, coords),
                };
            }
            other => {
                return Err(InputError::BadFeature {
                    index,
                    reason: format!("unsupported geometry type {}", geometry_kind(other)),
                });
            }
        }
    }

    info!(
        path = %path.display(),
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "Loaded road graph"
    );
    Ok(graph)
}

/// Read query points from CSV (`lon,lat` or `x,y` columns) or from a
/// GeoJSON collection of Point features, depending on the extension.
pub fn load_points(path: &Path) -> Result<Vec<Coord>, InputError> {
    let is_geojson = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("geojson") || e.eq_ignore_ascii_case("json"));

    let points = if is_geojson {
        let collection = read_collection(path)?;
        collection
            .features
            .iter()
            .enumerate()
            .map(|(index, feature)| match feature.geometry.as_ref().map(|g| &g.value) {
                Some(Value::Point(p)) if p.len() >= 2 => Ok(Coord { x: p[0], y: p[1] }),
                _ => Err(InputError::BadFeature {
                    index,
                    reason: "expected a Point geometry".to_string(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?
    } else {
        let csv_err = |source: csv::Error| InputError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
        reader
            .deserialize::<PointRow>()
            .map(|row| row.map(|r| Coord { x: r.lon, y: r.lat }).map_err(csv_err))
            .collect::<Result<Vec<_>, _>>()?
    };

    info!(path = %path.display(), points = points.len(), "Loaded query points");
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn graph_features_become_nodes_and_edges() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "graph.geojson",
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"id":7},"geometry":{"type":"Point","coordinates":[0.0,0.0]}},
                {"type":"Feature","properties":{"id":9},"geometry":{"type":"Point","coordinates":[1.0,0.0]}},
                {"type":"Feature","properties":{"u":7,"v":9},"geometry":{"type":"LineString","coordinates":[[0.0,0.0],[0.5,0.1],[1.0,0.0]]}},
                {"type":"Feature","properties":{"u":7,"v":9,"key":4},"geometry":{"type":"LineString","coordinates":[[0.0,0.0],[1.0,0.0]]}}
            ]}"#,
        );

        let graph = load_graph_geojson(&path).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.nodes[1].id, 9);
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.edges[0].geometry.len(), 3);
        assert_eq!(graph.edges[0].key, 0);
        assert_eq!(graph.edges[1].key, 4);
    }

    #[test]
    fn edge_without_endpoints_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "graph.geojson",
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"u":1},"geometry":{"type":"LineString","coordinates":[[0.0,0.0],[1.0,0.0]]}}
            ]}"#,
        );
        assert!(matches!(
            load_graph_geojson(&path),
            Err(InputError::BadFeature { index: 0, .. })
        ));
    }

    #[test]
    fn csv_points_accept_either_header_style() {
        let dir = tempfile::tempdir().unwrap();
        let lonlat = write(&dir, "a.csv", "lon,lat\n13.4,52.5\n13.5,52.6\n");
        let xy = write(&dir, "b.csv", "x,y,weight\n100,200,1\n");

        assert_eq!(
            load_points(&lonlat).unwrap(),
            vec![Coord { x: 13.4, y: 52.5 }, Coord { x: 13.5, y: 52.6 }]
        );
        assert_eq!(load_points(&xy).unwrap(), vec![Coord { x: 100.0, y: 200.0 }]);
    }

    #[test]
    fn geojson_points_are_read_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "points.geojson",
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{},"geometry":{"type":"Point","coordinates":[3.0,4.0]}},
                {"type":"Feature","properties":{},"geometry":{"type":"Point","coordinates":[1.0,2.0]}}
            ]}"#,
        );
        assert_eq!(
            load_points(&path).unwrap(),
            vec![Coord { x: 3.0, y: 4.0 }, Coord { x: 1.0, y: 2.0 }]
        );
    }
}
