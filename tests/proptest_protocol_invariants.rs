//! Property-based invariant tests for projection aggregation, the graph
//! protocol text and lixel segmentation.
//!
//! 1. One group per edge, header counts match the input.
//! 2. A group's count equals its distances and the records on that edge.
//! 3. Distances keep arrival order, whichever way round a record names its edge.
//! 4. Edges without points are exactly four fields.
//! 5. Decoding the encoded text gives back the same protocol.
//! 6. Lixels tile each edge contiguously without exceeding the target length.

use geo::LineString;
use nkdv::lixel::LixelSegmenter;
use nkdv::projection::ProjectionRecord;
use nkdv::protocol::{GraphProtocol, ProjectionAggregator};
use nkdv::road_graph::Edge;
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────────

/// A path graph `0-1-2-...-n` with the given edge lengths.
fn chain_strategy() -> impl Strategy<Value = Vec<(usize, usize, f64)>> {
    prop::collection::vec(1u32..5_000, 1..12).prop_map(|lengths| {
        lengths
            .into_iter()
            .enumerate()
            .map(|(i, len)| (i, i + 1, len as f64 / 4.0))
            .collect()
    })
}

/// Chain plus records: (edge index, fraction along it, name the edge reversed).
fn scenario_strategy() -> impl Strategy<Value = (Vec<(usize, usize, f64)>, Vec<(usize, f64, bool)>)>
{
    chain_strategy().prop_flat_map(|edges| {
        let n = edges.len();
        let records = prop::collection::vec((0..n, 0.0f64..=1.0, any::<bool>()), 0..40);
        (Just(edges), records)
    })
}

fn records_for(
    edges: &[(usize, usize, f64)],
    picks: &[(usize, f64, bool)],
) -> Vec<ProjectionRecord> {
    picks
        .iter()
        .map(|&(i, t, reversed)| {
            let (u, v, len) = edges[i];
            let (u, v) = if reversed { (v, u) } else { (u, v) };
            ProjectionRecord {
                u,
                v,
                distance: t * len,
            }
        })
        .collect()
}

// ═════════════════════════════════════════════════════════════════════════
// 1-3. Group structure
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn one_group_per_edge_with_matching_counts((edges, picks) in scenario_strategy()) {
        let node_count = edges.len() + 1;
        let records = records_for(&edges, &picks);
        let protocol = ProjectionAggregator::aggregate_rows(node_count, &edges, &records).unwrap();

        prop_assert_eq!(protocol.node_count, node_count);
        prop_assert_eq!(protocol.edge_count, edges.len());
        prop_assert_eq!(protocol.groups.len(), edges.len());
        prop_assert_eq!(protocol.projection_count(), records.len());

        for (i, group) in protocol.groups.iter().enumerate() {
            let (u, v, len) = edges[i];
            prop_assert_eq!((group.u, group.v), (u, v));
            prop_assert_eq!(group.length, len);
            prop_assert_eq!(group.count, group.distances.len());

            let expected: Vec<f64> = picks
                .iter()
                .filter(|p| p.0 == i)
                .map(|&(_, t, _)| t * len)
                .collect();
            prop_assert_eq!(&group.distances, &expected);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4-5. Text layout
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn encoded_text_has_fixed_layout((edges, picks) in scenario_strategy()) {
        let node_count = edges.len() + 1;
        let protocol = ProjectionAggregator::aggregate_rows(
            node_count,
            &edges,
            &records_for(&edges, &picks),
        )
        .unwrap();
        let text = protocol.encode();

        prop_assert!(text.ends_with('\n'));
        let lines: Vec<&str> = text.lines().collect();
        prop_assert_eq!(lines.len(), edges.len() + 1);
        let header = format!("{} {}", node_count, edges.len());
        prop_assert_eq!(lines[0], header.as_str());

        for (line, group) in lines[1..].iter().zip(&protocol.groups) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            prop_assert_eq!(fields.len(), 4 + group.count);
            let count: usize = fields[3].parse().unwrap();
            prop_assert_eq!(count, group.count);
            for id in &fields[..2] {
                let id: usize = id.parse().unwrap();
                prop_assert!(id < node_count);
            }
        }
    }

    #[test]
    fn decode_inverts_encode((edges, picks) in scenario_strategy()) {
        let protocol = ProjectionAggregator::aggregate_rows(
            edges.len() + 1,
            &edges,
            &records_for(&edges, &picks),
        )
        .unwrap();
        let decoded = GraphProtocol::decode(&protocol.encode()).unwrap();
        prop_assert_eq!(decoded, protocol);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Lixel tiling
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn lixels_tile_the_edge(length in 1u32..20_000, lixel_length in 1u32..2_000) {
        let length = length as f64 / 8.0;
        let lixel_length = lixel_length as f64 / 8.0;
        let edge = Edge {
            u: 0,
            v: 1,
            length,
            geometry: LineString::from(vec![(0.0, 0.0), (length, 0.0)]),
        };
        let segmenter = LixelSegmenter::new(lixel_length);
        let lixels = segmenter.segment_edge(&edge);

        prop_assert!(!lixels.is_empty());
        prop_assert_eq!(lixels[0].start_offset, 0.0);
        prop_assert_eq!(lixels[lixels.len() - 1].end_offset, length);
        for pair in lixels.windows(2) {
            prop_assert_eq!(pair[0].end_offset, pair[1].start_offset);
        }
        for lixel in &lixels {
            prop_assert!(lixel.length() > 0.0);
            prop_assert!(lixel.length() <= lixel_length + 1e-9);
        }
        prop_assert_eq!(segmenter.segment_edge(&edge), lixels);
    }
}
