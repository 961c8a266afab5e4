//! Road graph normalization: reprojection, intersection consolidation,
//! conversion to a simple undirected graph and edge orientation.

use crate::config::{InputCrs, NkdvConfig};
use crate::error::GraphError;
use crate::geometry::{LocalTangentPlane, coord_distance, polyline_length};
use crate::road_graph::{Edge, Node, NodeId, RawGraph, RoadGraph};
use ahash::{AHashMap, AHashSet};
use geo::{Coord, LineString};
use rstar::RTree;
use rstar::primitives::GeomWithData;
use tracing::{debug, info};

/// Edge geometry whose first vertex is further than this from node `u`
/// (in either axis) is reversed.
pub const ORIENTATION_EPSILON: f64 = 1e-5;

const MIN_EDGE_LENGTH: f64 = 1e-9;

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // lower index wins so cluster roots are stable across runs
            let (keep, drop) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[drop] = keep;
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphNormalizer {
    tolerance: f64,
    input_crs: InputCrs,
}

impl GraphNormalizer {
    pub fn new(tolerance: f64, input_crs: InputCrs) -> Self {
        Self {
            tolerance,
            input_crs,
        }
    }

    pub fn from_config(config: &NkdvConfig) -> Self {
        Self::new(config.consolidation_tolerance, config.input_crs)
    }

    pub fn normalize(&self, raw: &RawGraph) -> Result<RoadGraph, GraphError> {
        if raw.nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index_of: AHashMap<i64, usize> = AHashMap::with_capacity(raw.nodes.len());
        for (i, node) in raw.nodes.iter().enumerate() {
            if index_of.insert(node.id, i).is_some() {
                return Err(GraphError::DuplicateNode(node.id));
            }
        }

        let plane = match self.input_crs {
            InputCrs::Geographic => {
                let coords: Vec<Coord> = raw
                    .nodes
                    .iter()
                    .map(|n| Coord { x: n.x, y: n.y })
                    .collect();
                LocalTangentPlane::centred_on(&coords)
            }
            InputCrs::Projected => None,
        };
        let reproject = |c: Coord| -> Result<Coord, GraphError> {
            let out = match &plane {
                Some(p) => p.project(c.x, c.y),
                None => c,
            };
            if out.x.is_finite() && out.y.is_finite() {
                Ok(out)
            } else {
                Err(GraphError::NonFiniteCoordinate { x: c.x, y: c.y })
            }
        };

        let positions: Vec<Coord> = raw
            .nodes
            .iter()
            .map(|n| reproject(Coord { x: n.x, y: n.y }))
            .collect::<Result<_, _>>()?;

        // (raw u index, raw v index, projected geometry)
        let mut raw_edges: Vec<(usize, usize, Vec<Coord>)> = Vec::with_capacity(raw.edges.len());
        for edge in &raw.edges {
            let ui = *index_of.get(&edge.u).ok_or(GraphError::UnknownNode {
                u: edge.u,
                v: edge.v,
                missing: edge.u,
            })?;
            let vi = *index_of.get(&edge.v).ok_or(GraphError::UnknownNode {
                u: edge.u,
                v: edge.v,
                missing: edge.v,
            })?;
            let geometry = match edge.geometry.len() {
                0 => vec![positions[ui], positions[vi]],
                1 => return Err(GraphError::DegenerateGeometry { u: edge.u, v: edge.v }),
                _ => edge
                    .geometry
                    .iter()
                    .map(|c| reproject(*c))
                    .collect::<Result<_, _>>()?,
            };
            raw_edges.push((ui, vi, geometry));
        }

        let (cluster_of, nodes) = self.consolidate(&positions, &raw_edges);
        info!(
            raw_nodes = positions.len(),
            nodes = nodes.len(),
            tolerance = self.tolerance,
            "Consolidated intersections"
        );

        let mut graph_edges = simplify_undirected(&cluster_of, &nodes, raw_edges);
        let reversed = orient_edges(&mut graph_edges, &nodes);
        info!(
            raw_edges = raw.edges.len(),
            edges = graph_edges.len(),
            reversed,
            "Built simple undirected graph"
        );

        Ok(RoadGraph::from_parts(nodes, graph_edges, plane))
    }

    /// Merge nodes whose tolerance buffers overlap and which are joined by an
    /// edge inside the merged area. Returns the dense cluster id of every raw
    /// node and the consolidated nodes, numbered in order of first member.
    fn consolidate(
        &self,
        positions: &[Coord],
        raw_edges: &[(usize, usize, Vec<Coord>)],
    ) -> (Vec<NodeId>, Vec<Node>) {
        let n = positions.len();
        let mut spatial = DisjointSet::new(n);

        if self.tolerance > 0.0 {
            let items: Vec<GeomWithData<[f64; 2], usize>> = positions
                .iter()
                .enumerate()
                .map(|(i, c)| GeomWithData::new([c.x, c.y], i))
                .collect();
            let tree = RTree::bulk_load(items);
            // buffers of radius `tolerance` overlap when centres are 2*tolerance apart
            let reach = 2.0 * self.tolerance;
            for (i, c) in positions.iter().enumerate() {
                for near in tree.locate_within_distance([c.x, c.y], reach * reach) {
                    if near.data != i {
                        spatial.union(i, near.data);
                    }
                }
            }
        }

        // split spatial clusters that are not connected by an edge inside them
        let mut connected = DisjointSet::new(n);
        for (ui, vi, _) in raw_edges {
            if ui != vi && spatial.find(*ui) == spatial.find(*vi) {
                connected.union(*ui, *vi);
            }
        }

        let mut dense: AHashMap<usize, NodeId> = AHashMap::new();
        let mut sums: Vec<(f64, f64, usize)> = Vec::new();
        let mut cluster_of = Vec::with_capacity(n);
        for (i, c) in positions.iter().enumerate() {
            let root = connected.find(i);
            let id = *dense.entry(root).or_insert_with(|| {
                sums.push((0.0, 0.0, 0));
                sums.len() - 1
            });
            sums[id].0 += c.x;
            sums[id].1 += c.y;
            sums[id].2 += 1;
            cluster_of.push(id);
        }

        let nodes = sums
            .into_iter()
            .enumerate()
            .map(|(id, (sx, sy, count))| Node {
                id,
                x: sx / count as f64,
                y: sy / count as f64,
            })
            .collect();
        (cluster_of, nodes)
    }
}

/// Rebuild edges on consolidated nodes, keeping one edge per unordered node
/// pair (first in input order) with `u <= v`, sorted by `(u, v)`.
fn simplify_undirected(
    cluster_of: &[NodeId],
    nodes: &[Node],
    raw_edges: Vec<(usize, usize, Vec<Coord>)>,
) -> Vec<Edge> {
    let mut seen: AHashSet<(NodeId, NodeId)> = AHashSet::new();
    let mut edges = Vec::new();
    let mut collapsed = 0usize;

    for (ui, vi, mut coords) in raw_edges {
        let (cu, cv) = (cluster_of[ui], cluster_of[vi]);
        if cu == cv && ui != vi {
            collapsed += 1;
            continue;
        }

        // snap geometry ends onto the consolidated node positions
        let first = coords[0];
        let last = coords[coords.len() - 1];
        let u_pos = nodes[cu].coord();
        let (start_node, end_node) =
            if coord_distance(first, u_pos) <= coord_distance(last, u_pos) {
                (cu, cv)
            } else {
                (cv, cu)
            };
        let end = coords.len() - 1;
        coords[0] = nodes[start_node].coord();
        coords[end] = nodes[end_node].coord();

        let geometry = LineString::new(coords);
        let length = polyline_length(&geometry);
        if length <= MIN_EDGE_LENGTH {
            collapsed += 1;
            continue;
        }

        let key = (cu.min(cv), cu.max(cv));
        if !seen.insert(key) {
            continue;
        }
        edges.push(Edge {
            u: key.0,
            v: key.1,
            length,
            geometry,
        });
    }

    if collapsed > 0 {
        debug!(collapsed, "Dropped edges collapsed by consolidation");
    }
    edges.sort_by_key(|e| (e.u, e.v));
    edges
}

/// Reverse every edge geometry that does not start at node `u`.
/// Returns how many geometries were reversed.
pub fn orient_edges(edges: &mut [Edge], nodes: &[Node]) -> usize {
    let mut reversed = 0;
    for edge in edges.iter_mut() {
        let Some(start) = edge.geometry.0.first().copied() else {
            continue;
        };
        let u = &nodes[edge.u];
        if (start.x - u.x).abs() > ORIENTATION_EPSILON || (start.y - u.y).abs() > ORIENTATION_EPSILON
        {
            edge.geometry.0.reverse();
            reversed += 1;
        }
    }
    reversed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projected() -> GraphNormalizer {
        GraphNormalizer::new(0.5, InputCrs::Projected)
    }

    fn starts_at_u(graph: &RoadGraph) -> bool {
        graph.edges().iter().all(|e| {
            let start = e.geometry.0[0];
            let u = &graph.nodes()[e.u];
            (start.x - u.x).abs() <= ORIENTATION_EPSILON && (start.y - u.y).abs() <= ORIENTATION_EPSILON
        })
    }

    #[test]
    fn directed_pair_becomes_one_undirected_edge() {
        let mut raw = RawGraph::new();
        raw.add_node(10, 0.0, 0.0)
            .add_node(20, 100.0, 0.0)
            .add_edge(10, 20, vec![])
            .add_edge(20, 10, vec![])
            .add_edge(10, 20, vec![]);

        let graph = projected().normalize(&raw).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        let edge = &graph.edges()[0];
        assert_eq!((edge.u, edge.v), (0, 1));
        assert!((edge.length - 100.0).abs() < 1e-9);
    }

    #[test]
    fn reversed_geometry_is_corrected() {
        let mut raw = RawGraph::new();
        raw.add_node(1, 0.0, 0.0).add_node(2, 50.0, 10.0).add_edge(
            1,
            2,
            vec![
                Coord { x: 50.0, y: 10.0 },
                Coord { x: 25.0, y: 30.0 },
                Coord { x: 0.0, y: 0.0 },
            ],
        );

        let graph = projected().normalize(&raw).unwrap();
        assert!(starts_at_u(&graph));
        let coords = &graph.edges()[0].geometry.0;
        assert_eq!(coords[1], Coord { x: 25.0, y: 30.0 });
        assert_eq!(coords[2], Coord { x: 50.0, y: 10.0 });
    }

    #[test]
    fn orient_edges_handles_vertical_edges() {
        let nodes = vec![
            Node {
                id: 0,
                x: 5.0,
                y: 0.0,
            },
            Node {
                id: 1,
                x: 5.0,
                y: 40.0,
            },
        ];
        let mut edges = vec![Edge {
            u: 0,
            v: 1,
            length: 40.0,
            geometry: LineString::from(vec![(5.0, 40.0), (5.0, 0.0)]),
        }];
        assert_eq!(orient_edges(&mut edges, &nodes), 1);
        assert_eq!(edges[0].geometry.0[0], Coord { x: 5.0, y: 0.0 });
        // already oriented edges are left alone
        assert_eq!(orient_edges(&mut edges, &nodes), 0);
    }

    #[test]
    fn near_duplicate_intersections_merge() {
        let mut raw = RawGraph::new();
        raw.add_node(1, 0.0, 0.0)
            .add_node(2, 100.0, 0.0)
            .add_node(3, 100.4, 0.0)
            .add_node(4, 200.0, 0.0)
            .add_edge(1, 2, vec![])
            .add_edge(2, 3, vec![])
            .add_edge(3, 4, vec![]);

        let graph = projected().normalize(&raw).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert!((graph.nodes()[1].x - 100.2).abs() < 1e-9);
        assert!(starts_at_u(&graph));
        let total: f64 = graph.edges().iter().map(|e| e.length).sum();
        assert!((total - 200.0).abs() < 1e-9);
    }

    #[test]
    fn close_but_unconnected_nodes_stay_apart() {
        let mut raw = RawGraph::new();
        raw.add_node(1, 0.0, 0.0)
            .add_node(2, 0.3, 0.0)
            .add_node(3, 0.0, 50.0)
            .add_node(4, 0.3, -50.0)
            .add_edge(1, 3, vec![])
            .add_edge(2, 4, vec![]);

        let graph = projected().normalize(&raw).unwrap();
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn edges_sorted_and_lookup_is_symmetric() {
        let mut raw = RawGraph::new();
        raw.add_node(1, 0.0, 0.0)
            .add_node(2, 10.0, 0.0)
            .add_node(3, 20.0, 0.0)
            .add_edge(3, 2, vec![])
            .add_edge(2, 1, vec![]);

        let graph = projected().normalize(&raw).unwrap();
        let pairs: Vec<_> = graph.edges().iter().map(|e| (e.u, e.v)).collect();
        assert_eq!(pairs, vec![(0, 1), (1, 2)]);
        assert_eq!(graph.edge_index(2, 1), Some(1));
        assert_eq!(graph.edge_index(1, 2), Some(1));
        assert_eq!(graph.edge_index(0, 2), None);
        assert!(starts_at_u(&graph));
    }

    #[test]
    fn geographic_input_is_reprojected_to_metres() {
        let mut raw = RawGraph::new();
        raw.add_node(1, 13.40, 52.52)
            .add_node(2, 13.40, 52.53)
            .add_edge(1, 2, vec![]);

        let graph = GraphNormalizer::new(0.5, InputCrs::Geographic)
            .normalize(&raw)
            .unwrap();
        assert!(graph.plane().is_some());
        assert!((graph.edges()[0].length - 1111.95).abs() < 1.0);
    }

    #[test]
    fn dangling_edge_is_fatal() {
        let mut raw = RawGraph::new();
        raw.add_node(1, 0.0, 0.0).add_edge(1, 9, vec![]);
        assert!(matches!(
            projected().normalize(&raw),
            Err(GraphError::UnknownNode { missing: 9, .. })
        ));
    }
}
