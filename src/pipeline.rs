//! Per-run orchestration of the density preparation pipeline.
//!
//! Stages run strictly in sequence. Cancellation is only looked at between
//! stages: a stage that has started always runs to completion first.

use crate::config::NkdvConfig;
use crate::engine::{DensityEngineClient, EngineConfig};
use crate::error::{InputError, PipelineError, Stage, StageFailure, io_err};
use crate::export;
use crate::input;
use crate::lixel::LixelSegmenter;
use crate::normalize::GraphNormalizer;
use crate::projection::{RTreeEdgeIndex, SpatialProjector};
use crate::protocol::{GraphProtocol, ProjectionAggregator};
use crate::result_mapper::{DensityLixel, ResultMapper};
use crate::road_graph::{RawGraph, RoadGraph};
use chrono::{DateTime, Utc};
use geo::Coord;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info};

pub const PROTOCOL_FILE: &str = "graph_output";
pub const EDGES_LAYER_FILE: &str = "edges.geojson";
pub const LIXEL_LAYER_FILE: &str = "lixels.geojson";

/// Shared flag a caller flips to abandon a run at the next stage boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything one run needs to know about where it writes and how it is
/// configured. Created fresh per run; nothing carries over between runs.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: NkdvConfig,
    pub cache_dir: PathBuf,
    pub output_path: Option<PathBuf>,
    pub layer_name: String,
    pub started_at: DateTime<Utc>,
    pub cancel: CancellationToken,
}

impl RunContext {
    /// Context writing intermediates to a timestamped folder under
    /// `cache_root`.
    pub fn new(config: NkdvConfig, cache_root: &Path, input_name: &str) -> Self {
        let started_at = Utc::now();
        let cache_dir = cache_root.join(format!("run_{}", started_at.format("%Y%m%dT%H%M%S%.3f")));
        let layer_name = export::layer_name(config.bandwidth, input_name);
        Self {
            config,
            cache_dir,
            output_path: None,
            layer_name,
            started_at,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn protocol_path(&self) -> PathBuf {
        self.cache_dir.join(PROTOCOL_FILE)
    }

    pub fn edges_layer_path(&self) -> PathBuf {
        self.cache_dir.join(EDGES_LAYER_FILE)
    }

    pub fn lixel_layer_path(&self) -> PathBuf {
        self.cache_dir.join(LIXEL_LAYER_FILE)
    }

    fn checkpoint(&self, after: Stage) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            info!(stage = %after, "Cancellation requested, abandoning run");
            return Err(PipelineError::Cancelled { after });
        }
        Ok(())
    }
}

/// Load the road graph and the query points for a run.
pub fn load_inputs(
    ctx: &RunContext,
    graph_path: &Path,
    points_path: &Path,
) -> Result<(RawGraph, Vec<Coord>), PipelineError> {
    let loaded = timed(Stage::LoadInput, || {
        let raw = input::load_graph_geojson(graph_path)?;
        let points = input::load_points(points_path)?;
        Ok((raw, points))
    })?;
    ctx.checkpoint(Stage::LoadInput)?;
    Ok(loaded)
}

/// Output of the preparation half of a run: everything up to and including
/// the protocol file and the lixel layer.
#[derive(Debug)]
pub struct Prepared {
    pub graph: RoadGraph,
    pub protocol: GraphProtocol,
    pub lixel_count: usize,
}

fn timed<T>(stage: Stage, f: impl FnOnce() -> Result<T, PipelineError>) -> Result<T, PipelineError> {
    info!("Start {}", stage);
    let start = Instant::now();
    let out = f();
    info!(
        "End {}, duration: {:.3}s",
        stage,
        start.elapsed().as_secs_f64()
    );
    out
}

pub struct Pipeline<'a> {
    ctx: &'a RunContext,
}

impl<'a> Pipeline<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self { ctx }
    }

    /// Reject bad input before any file is written or external call made.
    fn check_input(&self, raw: &RawGraph, points: &[Coord]) -> Result<(), PipelineError> {
        self.ctx.config.validate()?;
        if points.is_empty() {
            return Err(InputError::EmptyPoints.into());
        }
        if raw.edges.is_empty() {
            return Err(InputError::NoEdges.into());
        }
        Ok(())
    }

    pub fn prepare(&self, raw: &RawGraph, points: &[Coord]) -> Result<Prepared, PipelineError> {
        let ctx = self.ctx;
        self.check_input(raw, points)?;

        let graph = timed(Stage::NormalizeGraph, || {
            GraphNormalizer::from_config(&ctx.config)
                .normalize(raw)
                .map_err(|e| PipelineError::at(Stage::NormalizeGraph, e))
        })?;
        if graph.edge_count() == 0 {
            return Err(InputError::NoEdges.into());
        }
        ctx.checkpoint(Stage::NormalizeGraph)?;

        let records = timed(Stage::ProjectPoints, || {
            let planar: Vec<Coord> = points
                .iter()
                .map(|p| graph.from_input_crs(p.x, p.y))
                .collect();
            let index = RTreeEdgeIndex::build(&graph);
            debug!(segments = index.segment_count(), "Built edge index");
            SpatialProjector::new(&graph)
                .project(&index, &planar)
                .map_err(|e| PipelineError::at(Stage::ProjectPoints, e))
        })?;
        ctx.checkpoint(Stage::ProjectPoints)?;

        let protocol = timed(Stage::AggregateProjections, || {
            let stage = Stage::AggregateProjections;
            let protocol = ProjectionAggregator::aggregate(&graph, &records)
                .map_err(|e| PipelineError::at(stage, e))?;
            std::fs::create_dir_all(&ctx.cache_dir).map_err(|e| {
                PipelineError::at(stage, io_err!(StageFailure, &ctx.cache_dir, e))
            })?;
            protocol
                .write_file(&ctx.protocol_path())
                .map_err(|e| PipelineError::at(stage, e))?;
            export::write_layer(&ctx.edges_layer_path(), export::edges_layer(&graph))
                .map_err(|e| PipelineError::at(stage, e))?;
            info!(
                nodes = protocol.node_count,
                edges = protocol.edge_count,
                projections = protocol.projection_count(),
                path = %ctx.protocol_path().display(),
                "Wrote graph protocol"
            );
            Ok(protocol)
        })?;
        ctx.checkpoint(Stage::AggregateProjections)?;

        let lixel_count = timed(Stage::SegmentLixels, || {
            let lixels = LixelSegmenter::new(ctx.config.lixel_length).segment(&graph);
            export::write_layer(&ctx.lixel_layer_path(), export::lixel_layer(&lixels))
                .map_err(|e| PipelineError::at(Stage::SegmentLixels, e))?;
            Ok(lixels.len())
        })?;
        ctx.checkpoint(Stage::SegmentLixels)?;

        Ok(Prepared {
            graph,
            protocol,
            lixel_count,
        })
    }

    /// Run the engine on a prepared run, map its values onto the persisted
    /// lixel layer and export the result.
    pub fn compute(
        &self,
        prepared: &Prepared,
        client: &DensityEngineClient,
    ) -> Result<Vec<DensityLixel>, PipelineError> {
        let ctx = self.ctx;

        let values = timed(Stage::ComputeDensity, || {
            client
                .compute(&ctx.protocol_path(), &EngineConfig::from(&ctx.config))
                .map_err(|e| PipelineError::at(Stage::ComputeDensity, e))
        })?;
        ctx.checkpoint(Stage::ComputeDensity)?;

        let mapped = timed(Stage::MapResults, || {
            let stage = Stage::MapResults;
            let path = ctx.lixel_layer_path();
            let layer = export::read_layer(&path).map_err(|e| PipelineError::at(stage, e))?;
            let lixels = export::lixels_from_layer(layer).map_err(|reason| {
                PipelineError::at(stage, StageFailure::BadLayer { path, reason })
            })?;
            ResultMapper::map(lixels, values).map_err(|e| PipelineError::at(stage, e))
        })?;
        ctx.checkpoint(Stage::MapResults)?;

        if let Some(output) = &ctx.output_path {
            timed(Stage::Export, || {
                let layer = export::density_layer(&prepared.graph, &mapped, &ctx.layer_name);
                export::write_layer(output, layer).map_err(|e| PipelineError::at(Stage::Export, e))?;
                info!(path = %output.display(), layer = %ctx.layer_name, "Exported density layer");
                Ok(())
            })?;
        }
        Ok(mapped)
    }

    pub fn run(
        &self,
        raw: &RawGraph,
        points: &[Coord],
        client: &DensityEngineClient,
    ) -> Result<Vec<DensityLixel>, PipelineError> {
        let prepared = self.prepare(raw, points)?;
        self.compute(&prepared, client)
    }
}
