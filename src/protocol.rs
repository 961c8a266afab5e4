//! Aggregation of point projections per edge and the plain-text graph
//! protocol consumed by the density engine.
//!
//! File layout:
//!
//! ```text
//! <node_count> <edge_count>
//! <u> <v> <length> <count> [<d1> ... <dk>]
//! ```
//!
//! One body line per edge, in ascending `(u, v)` order. Ids and counts are
//! integers, lengths and distances use the shortest decimal representation
//! that round-trips (`100`, `40.25`). The engine parses this positionally,
//! so the layout has no room for variation.

use crate::error::{ProtocolError, io_err};
use crate::projection::ProjectionRecord;
use crate::road_graph::{NodeId, RoadGraph};
use ahash::{AHashMap, AHashSet};
use itertools::Itertools;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// One edge of the protocol body with the offsets of every point that
/// snapped onto it, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedEdgeGroup {
    pub u: NodeId,
    pub v: NodeId,
    pub length: f64,
    pub count: usize,
    pub distances: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphProtocol {
    pub node_count: usize,
    pub edge_count: usize,
    pub groups: Vec<AggregatedEdgeGroup>,
}

/// Row of the edge/projection left join.
#[derive(Debug, Clone, Copy)]
struct JoinedRow {
    u: NodeId,
    v: NodeId,
    length: f64,
    distance: Option<f64>,
}

pub struct ProjectionAggregator;

impl ProjectionAggregator {
    pub fn aggregate(
        graph: &RoadGraph,
        records: &[ProjectionRecord],
    ) -> Result<GraphProtocol, ProtocolError> {
        let edges: Vec<(NodeId, NodeId, f64)> =
            graph.edges().iter().map(|e| (e.u, e.v, e.length)).collect();
        let protocol = Self::aggregate_rows(graph.node_count(), &edges, records)?;
        protocol.verify_against(graph)?;
        Ok(protocol)
    }

    /// Join, sort and group `(u, v, length)` edge rows with projection records.
    pub fn aggregate_rows(
        node_count: usize,
        edges: &[(NodeId, NodeId, f64)],
        records: &[ProjectionRecord],
    ) -> Result<GraphProtocol, ProtocolError> {
        let mut edge_keys: AHashSet<(NodeId, NodeId)> = AHashSet::with_capacity(edges.len());
        for &(u, v, _) in edges {
            for id in [u, v] {
                if id >= node_count {
                    return Err(ProtocolError::NodeOutOfRange { id, node_count });
                }
            }
            if !edge_keys.insert((u, v)) {
                return Err(ProtocolError::DuplicateEdge { u, v });
            }
        }

        let mut by_edge: AHashMap<(NodeId, NodeId), Vec<f64>> = AHashMap::new();
        for record in records {
            let key = if edge_keys.contains(&(record.u, record.v)) {
                (record.u, record.v)
            } else if edge_keys.contains(&(record.v, record.u)) {
                (record.v, record.u)
            } else {
                return Err(ProtocolError::UnknownEdge {
                    u: record.u,
                    v: record.v,
                });
            };
            by_edge.entry(key).or_default().push(record.distance);
        }

        let mut rows: Vec<JoinedRow> = Vec::with_capacity(edges.len() + records.len());
        for &(u, v, length) in edges {
            match by_edge.get(&(u, v)) {
                Some(distances) => rows.extend(distances.iter().map(|&d| JoinedRow {
                    u,
                    v,
                    length,
                    distance: Some(d),
                })),
                None => rows.push(JoinedRow {
                    u,
                    v,
                    length,
                    distance: None,
                }),
            }
        }
        // stable: rows of one edge keep their arrival order
        rows.sort_by_key(|r| (r.u, r.v));

        let groups = group_rows(&rows)?;
        if groups.len() != edges.len() {
            return Err(ProtocolError::EdgeCountMismatch {
                declared: edges.len(),
                emitted: groups.len(),
            });
        }
        debug!(
            groups = groups.len(),
            projections = records.len(),
            "Aggregated projections per edge"
        );

        Ok(GraphProtocol {
            node_count,
            edge_count: edges.len(),
            groups,
        })
    }
}

/// Walk sorted rows, folding consecutive rows of one `(u, v)` into a group.
///
/// A group opened by a row without a distance is an edge no point snapped
/// to. Every later row of a group extends it; the left join never produces a
/// missing distance there, and one appearing is reported rather than
/// written out.
fn group_rows(rows: &[JoinedRow]) -> Result<Vec<AggregatedEdgeGroup>, ProtocolError> {
    let mut groups: Vec<AggregatedEdgeGroup> = Vec::new();
    let mut current: Option<AggregatedEdgeGroup> = None;

    for row in rows {
        match current.as_mut() {
            Some(group) if group.u == row.u && group.v == row.v => {
                let distance = row.distance.ok_or(ProtocolError::NullInPopulatedGroup {
                    u: row.u,
                    v: row.v,
                })?;
                if group.count == 0 {
                    return Err(ProtocolError::NullInPopulatedGroup { u: row.u, v: row.v });
                }
                group.count += 1;
                group.distances.push(distance);
            }
            _ => {
                if let Some(done) = current.take() {
                    groups.push(done);
                }
                current = Some(match row.distance {
                    None => AggregatedEdgeGroup {
                        u: row.u,
                        v: row.v,
                        length: row.length,
                        count: 0,
                        distances: Vec::new(),
                    },
                    Some(d) => AggregatedEdgeGroup {
                        u: row.u,
                        v: row.v,
                        length: row.length,
                        count: 1,
                        distances: vec![d],
                    },
                });
            }
        }
    }
    if let Some(done) = current {
        groups.push(done);
    }
    Ok(groups)
}

impl AggregatedEdgeGroup {
    pub fn to_line(&self) -> String {
        let mut line = format!("{} {} {} {}", self.u, self.v, self.length, self.count);
        for d in &self.distances {
            let _ = write!(line, " {}", d);
        }
        line
    }
}

impl GraphProtocol {
    /// Fail unless the declared counts match `graph` and every group is
    /// internally consistent.
    pub fn verify_against(&self, graph: &RoadGraph) -> Result<(), ProtocolError> {
        if self.node_count != graph.node_count() {
            return Err(ProtocolError::NodeCountMismatch {
                declared: self.node_count,
                actual: graph.node_count(),
            });
        }
        if self.edge_count != graph.edge_count() || self.groups.len() != self.edge_count {
            return Err(ProtocolError::EdgeCountMismatch {
                declared: self.edge_count,
                emitted: self.groups.len(),
            });
        }
        self.check_groups()
    }

    fn check_groups(&self) -> Result<(), ProtocolError> {
        for group in &self.groups {
            if group.count != group.distances.len() {
                return Err(ProtocolError::GroupCountMismatch {
                    u: group.u,
                    v: group.v,
                    declared: group.count,
                    actual: group.distances.len(),
                });
            }
            for id in [group.u, group.v] {
                if id >= self.node_count {
                    return Err(ProtocolError::NodeOutOfRange {
                        id,
                        node_count: self.node_count,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn projection_count(&self) -> usize {
        self.groups.iter().map(|g| g.count).sum()
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        writeln!(out, "{} {}", self.node_count, self.edge_count)?;
        for group in &self.groups {
            writeln!(out, "{}", group.to_line())?;
        }
        out.flush()
    }

    pub fn encode(&self) -> String {
        let mut buf = Vec::new();
        // writing into a Vec cannot fail
        let _ = self.write_to(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn write_file(&self, path: &Path) -> Result<(), ProtocolError> {
        let file = File::create(path).map_err(|e| io_err!(ProtocolError, path, e))?;
        self.write_to(BufWriter::new(file))
            .map_err(|e| io_err!(ProtocolError, path, e))
    }

    pub fn read_file(path: &Path) -> Result<Self, ProtocolError> {
        let text = std::fs::read_to_string(path).map_err(|e| io_err!(ProtocolError, path, e))?;
        Self::decode(&text)
    }

    /// Parse protocol text, enforcing the same invariants the encoder keeps.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty());

        let (header_no, header) = lines.next().ok_or(ProtocolError::Malformed {
            line: 1,
            reason: "missing header".to_string(),
        })?;
        let Some((node_count, edge_count)) = header
            .split_whitespace()
            .map(|f| f.parse::<usize>())
            .collect_tuple()
            .and_then(|(n, e)| Some((n.ok()?, e.ok()?)))
        else {
            return Err(ProtocolError::Malformed {
                line: header_no + 1,
                reason: format!("expected '<node_count> <edge_count>', got '{}'", header),
            });
        };

        let mut groups = Vec::with_capacity(edge_count);
        for (idx, line) in lines {
            groups.push(parse_group(idx + 1, line)?);
        }

        let protocol = GraphProtocol {
            node_count,
            edge_count,
            groups,
        };
        if protocol.groups.len() != edge_count {
            return Err(ProtocolError::EdgeCountMismatch {
                declared: edge_count,
                emitted: protocol.groups.len(),
            });
        }
        protocol.check_groups()?;
        Ok(protocol)
    }
}

fn parse_group(line_no: usize, line: &str) -> Result<AggregatedEdgeGroup, ProtocolError> {
    let malformed = |reason: String| ProtocolError::Malformed {
        line: line_no,
        reason,
    };
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(malformed(format!(
            "expected at least 4 fields, got {}",
            fields.len()
        )));
    }
    let int = |s: &str| {
        s.parse::<usize>()
            .map_err(|_| malformed(format!("'{}' is not an integer", s)))
    };
    let float = |s: &str| {
        s.parse::<f64>()
            .map_err(|_| malformed(format!("'{}' is not a number", s)))
    };

    let u = int(fields[0])?;
    let v = int(fields[1])?;
    let length = float(fields[2])?;
    let count = int(fields[3])?;
    let distances = fields[4..]
        .iter()
        .map(|s| float(s))
        .collect::<Result<Vec<_>, _>>()?;
    if distances.len() != count {
        return Err(ProtocolError::GroupCountMismatch {
            u,
            v,
            declared: count,
            actual: distances.len(),
        });
    }
    Ok(AggregatedEdgeGroup {
        u,
        v,
        length,
        count,
        distances,
    })
}
