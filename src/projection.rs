//! Snapping query points onto their nearest road edge.

use crate::error::ProjectionError;
use crate::geometry::offset_along;
use crate::road_graph::{NodeId, RoadGraph};
use geo::Coord;
use rayon::prelude::*;
use rstar::RTree;
use rstar::primitives::{GeomWithData, Line};
use tracing::info;

/// A point's offset along the edge it snapped to, measured from node `u`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionRecord {
    pub u: NodeId,
    pub v: NodeId,
    pub distance: f64,
}

/// Nearest-edge capability over a normalized graph.
///
/// Answers one `(u, v)` pair per query point, in query order. How ties
/// between equally near edges are broken is up to the implementation.
pub trait NearestEdgeIndex: Sync {
    fn nearest_edges(&self, xs: &[f64], ys: &[f64])
    -> Result<Vec<(NodeId, NodeId)>, ProjectionError>;
}

type SegmentEntry = GeomWithData<Line<[f64; 2]>, usize>;

/// R-tree over every straight segment of every edge geometry.
pub struct RTreeEdgeIndex {
    tree: RTree<SegmentEntry>,
    pairs: Vec<(NodeId, NodeId)>,
}

impl RTreeEdgeIndex {
    pub fn build(graph: &RoadGraph) -> Self {
        let segments: Vec<SegmentEntry> = graph
            .edges()
            .iter()
            .enumerate()
            .flat_map(|(edge_idx, edge)| {
                edge.geometry.0.windows(2).map(move |w| {
                    GeomWithData::new(Line::new([w[0].x, w[0].y], [w[1].x, w[1].y]), edge_idx)
                })
            })
            .collect();
        let pairs = graph.edges().iter().map(|e| (e.u, e.v)).collect();
        Self {
            tree: RTree::bulk_load(segments),
            pairs,
        }
    }

    pub fn segment_count(&self) -> usize {
        self.tree.size()
    }
}

impl NearestEdgeIndex for RTreeEdgeIndex {
    fn nearest_edges(
        &self,
        xs: &[f64],
        ys: &[f64],
    ) -> Result<Vec<(NodeId, NodeId)>, ProjectionError> {
        if xs.len() != ys.len() {
            return Err(ProjectionError::Index(format!(
                "{} x coordinates but {} y coordinates",
                xs.len(),
                ys.len()
            )));
        }
        xs.par_iter()
            .zip(ys.par_iter())
            .map(|(&x, &y)| {
                self.tree
                    .nearest_neighbor(&[x, y])
                    .map(|segment| self.pairs[segment.data])
                    .ok_or_else(|| ProjectionError::Index("index holds no edges".to_string()))
            })
            .collect()
    }
}

pub struct SpatialProjector<'a> {
    graph: &'a RoadGraph,
}

impl<'a> SpatialProjector<'a> {
    pub fn new(graph: &'a RoadGraph) -> Self {
        Self { graph }
    }

    /// Project `points` (already in the graph's plane) onto their nearest
    /// edges. Output order matches input order.
    pub fn project(
        &self,
        index: &dyn NearestEdgeIndex,
        points: &[Coord],
    ) -> Result<Vec<ProjectionRecord>, ProjectionError> {
        if let Some(index) = points
            .iter()
            .position(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(ProjectionError::NonFinitePoint { index });
        }

        let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.y).collect();
        let nearest = index.nearest_edges(&xs, &ys)?;
        if nearest.len() != points.len() {
            return Err(ProjectionError::AnswerCountMismatch {
                points: points.len(),
                answers: nearest.len(),
            });
        }

        let records = points
            .par_iter()
            .zip(nearest.par_iter())
            .enumerate()
            .map(|(i, (point, &(a, b)))| -> Result<ProjectionRecord, ProjectionError> {
                let edge = self
                    .graph
                    .edge_index(a, b)
                    .map(|idx| &self.graph.edges()[idx])
                    .ok_or(ProjectionError::UnknownEdge { index: i, u: a, v: b })?;
                let distance = offset_along(&edge.geometry, *point).unwrap_or(0.0);
                Ok(ProjectionRecord {
                    u: edge.u,
                    v: edge.v,
                    distance,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(points = records.len(), "Projected points onto road edges");
        Ok(records)
    }
}
