//! Discretization of road edges into fixed-length lixels.

use crate::geometry::split_at_offsets;
use crate::road_graph::{Edge, NodeId, RoadGraph};
use geo_types::LineString;
use tracing::info;

/// Slack when deciding whether an edge length is an exact multiple of the
/// lixel length, so float error never yields a sliver lixel.
const SPLIT_SLACK: f64 = 1e-9;

/// A bounded sub-segment of an edge, offsets measured from node `u`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lixel {
    pub edge_u: NodeId,
    pub edge_v: NodeId,
    pub start_offset: f64,
    pub end_offset: f64,
    pub geometry: LineString,
}

impl Lixel {
    pub fn length(&self) -> f64 {
        self.end_offset - self.start_offset
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LixelSegmenter {
    lixel_length: f64,
}

impl LixelSegmenter {
    pub fn new(lixel_length: f64) -> Self {
        Self { lixel_length }
    }

    /// Lixels of one edge in traversal order; every piece is `lixel_length`
    /// long except possibly the last.
    pub fn segment_edge(&self, edge: &Edge) -> Vec<Lixel> {
        let pieces = ((edge.length / self.lixel_length) - SPLIT_SLACK).ceil().max(1.0) as usize;
        let breaks: Vec<f64> = (0..=pieces)
            .map(|i| {
                if i == pieces {
                    edge.length
                } else {
                    i as f64 * self.lixel_length
                }
            })
            .collect();
        split_at_offsets(&edge.geometry, &breaks)
            .into_iter()
            .zip(breaks.windows(2))
            .map(|(geometry, w)| Lixel {
                edge_u: edge.u,
                edge_v: edge.v,
                start_offset: w[0],
                end_offset: w[1],
                geometry,
            })
            .collect()
    }

    /// Lixels of every edge, edges in graph order, pieces of an edge
    /// consecutive. Result remapping depends on this order.
    pub fn segment(&self, graph: &RoadGraph) -> Vec<Lixel> {
        let lixels: Vec<Lixel> = graph
            .edges()
            .iter()
            .flat_map(|edge| self.segment_edge(edge))
            .collect();
        info!(
            edges = graph.edge_count(),
            lixels = lixels.len(),
            lixel_length = self.lixel_length,
            "Split roads into lixels"
        );
        lixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputCrs;
    use crate::normalize::GraphNormalizer;
    use crate::road_graph::RawGraph;

    fn collinear() -> RoadGraph {
        let mut raw = RawGraph::new();
        raw.add_node(0, 0.0, 0.0)
            .add_node(1, 50.0, 0.0)
            .add_node(2, 100.0, 0.0)
            .add_edge(0, 1, vec![])
            .add_edge(1, 2, vec![]);
        GraphNormalizer::new(0.5, InputCrs::Projected)
            .normalize(&raw)
            .unwrap()
    }

    #[test]
    fn edges_split_into_full_pieces_and_a_remainder() {
        let lixels = LixelSegmenter::new(20.0).segment(&collinear());
        let summary: Vec<_> = lixels
            .iter()
            .map(|l| (l.edge_u, l.edge_v, l.start_offset, l.end_offset))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, 1, 0.0, 20.0),
                (0, 1, 20.0, 40.0),
                (0, 1, 40.0, 50.0),
                (1, 2, 0.0, 20.0),
                (1, 2, 20.0, 40.0),
                (1, 2, 40.0, 50.0),
            ]
        );
        assert_eq!(
            lixels[5].geometry,
            LineString::from(vec![(90.0, 0.0), (100.0, 0.0)])
        );
    }

    #[test]
    fn exact_multiple_leaves_no_sliver() {
        let graph = collinear();
        let lixels = LixelSegmenter::new(25.0).segment_edge(&graph.edges()[0]);
        assert_eq!(lixels.len(), 2);
        assert_eq!(lixels[1].length(), 25.0);
    }

    #[test]
    fn short_edge_is_one_lixel() {
        let graph = collinear();
        let lixels = LixelSegmenter::new(500.0).segment_edge(&graph.edges()[1]);
        assert_eq!(lixels.len(), 1);
        assert_eq!(lixels[0].end_offset, 50.0);
    }

    #[test]
    fn segmentation_is_deterministic() {
        let graph = collinear();
        let segmenter = LixelSegmenter::new(7.0);
        assert_eq!(segmenter.segment(&graph), segmenter.segment(&graph));
    }
}
