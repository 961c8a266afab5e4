use crate::geometry::LocalTangentPlane;
use ahash::AHashMap;
use geo_types::{Coord, LineString};

/// Node as delivered by the graph source, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawNode {
    pub id: i64,
    pub x: f64,
    pub y: f64,
}

/// Possibly directed, possibly parallel edge as delivered by the graph source.
///
/// An empty geometry means a straight line between the two nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEdge {
    pub u: i64,
    pub v: i64,
    pub key: u32,
    pub geometry: Vec<Coord>,
}

#[derive(Debug, Clone, Default)]
pub struct RawGraph {
    pub nodes: Vec<RawNode>,
    pub edges: Vec<RawEdge>,
    /// Next free key per directed `(u, v)` pair.
    next_key: AHashMap<(i64, i64), u32>,
}

impl RawGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: i64, x: f64, y: f64) -> &mut Self {
        self.nodes.push(RawNode { id, x, y });
        self
    }

    /// Add an edge, keyed after the edges already joining `u` to `v`.
    pub fn add_edge(&mut self, u: i64, v: i64, geometry: Vec<Coord>) -> &mut Self {
        let key = self.next_key.get(&(u, v)).copied().unwrap_or(0);
        self.add_keyed_edge(u, v, key, geometry)
    }

    /// Add an edge whose key the source already assigned.
    pub fn add_keyed_edge(&mut self, u: i64, v: i64, key: u32, geometry: Vec<Coord>) -> &mut Self {
        let next = self.next_key.entry((u, v)).or_insert(0);
        *next = (*next).max(key.saturating_add(1));
        self.edges.push(RawEdge { u, v, key, geometry });
        self
    }
}

/// Dense node id, `0..node_count`.
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub x: f64,
    pub y: f64,
}

impl Node {
    pub fn coord(&self) -> Coord {
        Coord {
            x: self.x,
            y: self.y,
        }
    }
}

/// Undirected edge of a normalized graph.
///
/// `u <= v` always holds, and `geometry` starts at node `u`.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub u: NodeId,
    pub v: NodeId,
    pub length: f64,
    pub geometry: LineString,
}

/// Simple undirected road graph in a planar metric CRS.
///
/// Built once by [`crate::normalize::GraphNormalizer`] and immutable after.
/// Edges are held in ascending `(u, v)` order, which is the order every
/// downstream stage iterates them in.
#[derive(Debug, Clone)]
pub struct RoadGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    edge_lookup: AHashMap<(NodeId, NodeId), usize>,
    plane: Option<LocalTangentPlane>,
}

impl RoadGraph {
    /// Caller guarantees dense node ids and sorted, unique `(u, v)` edges.
    pub(crate) fn from_parts(
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        plane: Option<LocalTangentPlane>,
    ) -> Self {
        let edge_lookup = edges
            .iter()
            .enumerate()
            .map(|(i, e)| ((e.u, e.v), i))
            .collect();
        Self {
            nodes,
            edges,
            edge_lookup,
            plane,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Index of the edge joining `a` and `b`, in either orientation.
    pub fn edge_index(&self, a: NodeId, b: NodeId) -> Option<usize> {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.edge_lookup.get(&key).copied()
    }

    /// Plane used to reproject geographic input, if any.
    pub fn plane(&self) -> Option<&LocalTangentPlane> {
        self.plane.as_ref()
    }

    /// Map a coordinate in the graph's plane back to the input CRS.
    pub fn to_input_crs(&self, c: Coord) -> (f64, f64) {
        match &self.plane {
            Some(plane) => plane.unproject(c),
            None => (c.x, c.y),
        }
    }

    /// Map an input-CRS coordinate into the graph's plane.
    pub fn from_input_crs(&self, x: f64, y: f64) -> Coord {
        match &self.plane {
            Some(plane) => plane.project(x, y),
            None => Coord { x, y },
        }
    }
}
