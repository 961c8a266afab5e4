//! Error types for every stage of the density preparation pipeline.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Named pipeline stages, attached to failures and cancellation reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    LoadInput,
    NormalizeGraph,
    ProjectPoints,
    AggregateProjections,
    SegmentLixels,
    ComputeDensity,
    MapResults,
    Export,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::LoadInput => "load input",
            Stage::NormalizeGraph => "normalize graph",
            Stage::ProjectPoints => "project points",
            Stage::AggregateProjections => "aggregate projections",
            Stage::SegmentLixels => "segment lixels",
            Stage::ComputeDensity => "compute density",
            Stage::MapResults => "map results",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("edge ({u}, {v}) references unknown node {missing}")]
    UnknownNode { u: i64, v: i64, missing: i64 },
    #[error("duplicate node id {0}")]
    DuplicateNode(i64),
    #[error("edge ({u}, {v}) has fewer than two vertices")]
    DegenerateGeometry { u: i64, v: i64 },
    #[error("non-finite coordinate ({x}, {y}) while reprojecting")]
    NonFiniteCoordinate { x: f64, y: f64 },
    #[error("graph has no nodes")]
    Empty,
}

#[derive(Error, Debug)]
pub enum ProjectionError {
    #[error("nearest-edge query failed: {0}")]
    Index(String),
    #[error("nearest-edge query answered {answers} of {points} points")]
    AnswerCountMismatch { points: usize, answers: usize },
    #[error("point {index} snapped to ({u}, {v}), which is not a graph edge")]
    UnknownEdge { index: usize, u: usize, v: usize },
    #[error("point {index} has a non-finite coordinate")]
    NonFinitePoint { index: usize },
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("projection onto ({u}, {v}) does not match any graph edge")]
    UnknownEdge { u: usize, v: usize },
    #[error("edge ({u}, {v}) appears more than once in the edge set")]
    DuplicateEdge { u: usize, v: usize },
    #[error("node id {id} out of range for {node_count} nodes")]
    NodeOutOfRange { id: usize, node_count: usize },
    #[error("group ({u}, {v}) mixes a missing distance into a populated group")]
    NullInPopulatedGroup { u: usize, v: usize },
    #[error("header declares {declared} edges but the body holds {emitted} groups")]
    EdgeCountMismatch { declared: usize, emitted: usize },
    #[error("header declares {declared} nodes but the graph holds {actual}")]
    NodeCountMismatch { declared: usize, actual: usize },
    #[error("group ({u}, {v}) declares count {declared} but carries {actual} distances")]
    GroupCountMismatch {
        u: usize,
        v: usize,
        declared: usize,
        actual: usize,
    },
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("I/O error accessing '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to launch density engine '{program}': {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("density engine exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("density engine output is not UTF-8")]
    NotUtf8,
    #[error("result line {line}: {reason}")]
    UnparseableResult { line: usize, reason: String },
}

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("engine returned {values} values for {lixels} lixels")]
    LengthMismatch { lixels: usize, values: usize },
}

#[derive(Error, Debug)]
pub enum InputError {
    #[error("no query points supplied")]
    EmptyPoints,
    #[error("road graph has no edges")]
    NoEdges,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("feature {index}: {reason}")]
    BadFeature { index: usize, reason: String },
    #[error("I/O error accessing '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse GeoJSON '{path}': {source}")]
    GeoJson {
        path: PathBuf,
        #[source]
        source: Box<geojson::Error>,
    },
    #[error("failed to read points '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to parse config '{path}': {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
}

/// Failure of a stage whose work is delegated to an external capability or
/// to a lower-level component.
#[derive(Error, Debug)]
pub enum StageFailure {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("I/O error accessing '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write layer '{path}': {source}")]
    Layer {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read layer '{path}': {reason}")]
    BadLayer { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input rejected: {0}")]
    Input(#[from] InputError),
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: StageFailure,
    },
    #[error("run cancelled after stage '{after}'")]
    Cancelled { after: Stage },
}

impl PipelineError {
    pub fn at(stage: Stage, source: impl Into<StageFailure>) -> Self {
        PipelineError::Stage {
            stage,
            source: source.into(),
        }
    }

    /// True for errors that indicate a broken contract between stages
    /// rather than bad input or an external failure.
    pub fn is_contract_violation(&self) -> bool {
        match self {
            PipelineError::Stage { source, .. } => matches!(
                source,
                StageFailure::Mapping(MappingError::LengthMismatch { .. })
                    | StageFailure::Protocol(
                        ProtocolError::EdgeCountMismatch { .. }
                            | ProtocolError::NodeCountMismatch { .. }
                            | ProtocolError::GroupCountMismatch { .. }
                            | ProtocolError::NullInPopulatedGroup { .. }
                            | ProtocolError::UnknownEdge { .. }
                            | ProtocolError::DuplicateEdge { .. }
                            | ProtocolError::NodeOutOfRange { .. }
                    )
            ),
            _ => false,
        }
    }
}

macro_rules! io_err {
    ($kind:ident, $path:expr, $err:expr) => {
        $kind::Io {
            path: $path.to_path_buf(),
            source: $err,
        }
    };
}

pub(crate) use io_err;
