use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use nkdv::config::{InputCrs, NkdvConfig};
use nkdv::engine::{CommandEngine, DensityEngineClient};
use nkdv::pipeline::{self, CancellationToken, Pipeline, RunContext};
use nkdv::protocol::GraphProtocol;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prepare the graph file, run the density engine and export the
    /// density layer.
    Run {
        #[command(flatten)]
        job: JobArgs,

        /// Density engine executable.
        #[arg(long, env = "NKDV_ENGINE")]
        engine: PathBuf,

        /// Where to write the density layer (GeoJSON).
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Stop after writing the graph file and the lixel layer.
    Prepare {
        #[command(flatten)]
        job: JobArgs,
    },
    /// Summarise an existing graph file.
    Inspect { protocol: PathBuf },
}

#[derive(Args, Debug)]
struct JobArgs {
    /// Road graph as GeoJSON (Point nodes with `id`, LineString edges with `u`/`v`).
    #[arg(long)]
    graph: PathBuf,

    /// Query points, CSV with lon/lat columns or GeoJSON points.
    #[arg(long)]
    points: PathBuf,

    /// RON file with pipeline settings; flags below override it.
    #[arg(long, env = "NKDV_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder for per-run intermediate files.
    #[arg(long, env = "NKDV_CACHE_DIR", default_value = "nkdv_cache")]
    cache_dir: PathBuf,

    #[arg(long)]
    bandwidth: Option<f64>,

    #[arg(long)]
    lixel_length: Option<f64>,

    #[arg(long)]
    method: Option<u32>,

    #[arg(long)]
    kernel_type: Option<u32>,

    /// Treat input coordinates as planar metres instead of lon/lat.
    #[arg(long)]
    projected: bool,
}

impl JobArgs {
    fn config(&self) -> Result<NkdvConfig> {
        let mut config = match &self.config {
            Some(path) => NkdvConfig::from_ron_file(path)?,
            None => NkdvConfig::default(),
        };
        if let Some(bandwidth) = self.bandwidth {
            config.bandwidth = bandwidth;
        }
        if let Some(lixel_length) = self.lixel_length {
            config.lixel_length = lixel_length;
        }
        if let Some(method) = self.method {
            config.method = method;
        }
        if let Some(kernel_type) = self.kernel_type {
            config.kernel_type = kernel_type;
        }
        if self.projected {
            config.input_crs = InputCrs::Projected;
        }
        Ok(config)
    }

    fn input_name(&self) -> String {
        self.points
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "points".to_string())
    }
}

fn context(job: &JobArgs, cancel: &CancellationToken) -> Result<RunContext> {
    let config = job.config()?;
    Ok(RunContext::new(config, &job.cache_dir, &job.input_name()).with_cancellation(cancel.clone()))
}

fn prepare(job: JobArgs, cancel: CancellationToken) -> Result<()> {
    let ctx = context(&job, &cancel)?;
    let (raw, points) = pipeline::load_inputs(&ctx, &job.graph, &job.points)?;

    let prepared = Pipeline::new(&ctx).prepare(&raw, &points)?;
    info!(
        cache_dir = %ctx.cache_dir.display(),
        edges = prepared.protocol.edge_count,
        lixels = prepared.lixel_count,
        "Prepared run"
    );
    Ok(())
}

fn run(job: JobArgs, engine: PathBuf, output: PathBuf, cancel: CancellationToken) -> Result<()> {
    let ctx = context(&job, &cancel)?.with_output(output);
    let (raw, points) = pipeline::load_inputs(&ctx, &job.graph, &job.points)?;
    let client = DensityEngineClient::new(CommandEngine::new(engine));

    let mapped = Pipeline::new(&ctx).run(&raw, &points, &client)?;
    let max = mapped.iter().map(|d| d.value).fold(f64::NAN, f64::max);
    info!(
        lixels = mapped.len(),
        max_density = max,
        layer = %ctx.layer_name,
        "Run finished"
    );
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let protocol = GraphProtocol::read_file(path)
        .with_context(|| format!("reading graph file {}", path.display()))?;
    let empty = protocol.groups.iter().filter(|g| g.count == 0).count();
    let busiest = protocol.groups.iter().max_by_key(|g| g.count);

    println!("nodes:       {}", protocol.node_count);
    println!("edges:       {}", protocol.edge_count);
    println!("projections: {}", protocol.projection_count());
    println!("empty edges: {}", empty);
    if let Some(group) = busiest {
        println!(
            "busiest:     ({}, {}) with {} points over {} m",
            group.u, group.v, group.count, group.length
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let cancel = CancellationToken::new();
    let mut work = match cli.command {
        Command::Inspect { protocol } => return inspect(&protocol),
        Command::Prepare { job } => {
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || prepare(job, cancel))
        }
        Command::Run {
            job,
            engine,
            output,
        } => {
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || run(job, engine, output, cancel))
        }
    };

    tokio::select! {
        res = &mut work => res?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping after the current stage");
            cancel.cancel();
            work.await?
        }
    }
}
