//! tesserae - Tiled image upscale orchestrator CLI
//!
//! Slices a source image, dispatches tiles to a roster of remote GPU
//! workers, composites the results, and writes the assembled PNG.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tesserae_core::{MaskBuilder, NyanTileSlicer, SimpleSlicer, Slicer, UsdusSlicer};
use tesserae_io::{png, PathTable};
use tesserae_job::{Job, Settings, TileSource, WorkerConfig};
use tesserae_worker::{ComfyWorker, DebugWorker, WorkerProxy};
use tracing_subscriber::{fmt, EnvFilter};

/// Tiling strategy selectable on the command line.
#[derive(Copy, Clone, Debug, ValueEnum)]
enum SlicerChoice {
    /// 8-neighbour exclusion, parallel dispatch.
    Simple,
    /// Strictly serial, one tile at a time.
    Usdus,
    /// Wavefront dependency on up/left/up-right neighbours.
    Nyantile,
}

#[derive(Parser)]
#[command(name = "tesserae")]
#[command(author, version, about = "Tiled image upscale orchestrator")]
struct Cli {
    /// Source image to slice and upscale.
    input: PathBuf,

    /// Path to the job TOML config (worker roster, tile source, save flag).
    #[arg(short, long, default_value = "tesserae.toml")]
    config: PathBuf,

    /// Path to the API-format workflow graph (JSON) submitted to workers.
    #[arg(short, long)]
    workflow: PathBuf,

    /// Directory the assembled output is written into.
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Tiling strategy.
    #[arg(long, value_enum, default_value_t = SlicerChoice::Simple)]
    slicer: SlicerChoice,

    /// Tile size in pixels.
    #[arg(long, default_value_t = 512)]
    tile_size: u32,

    /// Tile overlap in pixels (ignored by `nyantile`, which has none).
    #[arg(long, default_value_t = 32)]
    overlap: u32,

    /// Force uniform tile sizing instead of a short final tile/row.
    #[arg(long)]
    uniform: bool,

    /// Feather mask hard-zero border width, in pixels.
    #[arg(long, default_value_t = 2)]
    mask_padding: u32,

    /// Feather mask ramp width, in pixels.
    #[arg(long, default_value_t = 16)]
    mask_feather: u32,

    /// Overall upscale factor recorded in the output's embedded metadata.
    #[arg(long, default_value_t = 1.0)]
    scale: f32,

    /// Positive prompt text, patched into every tile's workflow.
    #[arg(long)]
    positive_prompt: Option<String>,

    /// Negative prompt text, patched into every tile's workflow.
    #[arg(long)]
    negative_prompt: Option<String>,

    /// Run against local in-process debug workers instead of the config's roster.
    #[arg(long)]
    debug_worker: bool,

    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// The on-disk job config: worker roster plus the settings the spec's
/// `config.yaml` carried, re-expressed in TOML.
#[derive(Deserialize)]
struct Config {
    job: JobSection,
    #[serde(default)]
    workers: Vec<WorkerConfig>,
}

#[derive(Deserialize)]
struct JobSection {
    tile_source: TileSource,
    #[serde(default)]
    save: bool,
    #[serde(default)]
    upscale_factor: Option<f32>,
    #[serde(default)]
    seed_increment: Option<i64>,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "tesserae=info",
        2 => "tesserae=debug",
        _ => "tesserae=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if verbose > 0 {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .init();
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

fn load_workflow(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading workflow {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing workflow {}", path.display()))
}

fn build_slicer(choice: SlicerChoice, width: u32, height: u32, cli: &Cli) -> Result<Box<dyn Slicer>> {
    let slicer: Box<dyn Slicer> = match choice {
        SlicerChoice::Simple => Box::new(SimpleSlicer::new(width, height, cli.tile_size, cli.overlap, cli.uniform)?),
        SlicerChoice::Usdus => Box::new(UsdusSlicer::new(width, height, cli.tile_size, cli.overlap, cli.uniform)?),
        SlicerChoice::Nyantile => Box::new(NyanTileSlicer::new(width, height, cli.tile_size, cli.uniform)?),
    };
    Ok(slicer)
}

fn build_workers(config: &Config, debug: bool) -> Vec<Arc<dyn WorkerProxy>> {
    if debug {
        if config.workers.is_empty() {
            return vec![Arc::new(DebugWorker::new("debug-1", 1.0, None))];
        }
        return config
            .workers
            .iter()
            .enumerate()
            .map(|(i, w)| -> Arc<dyn WorkerProxy> {
                Arc::new(DebugWorker::new(&format!("debug-{i}"), w.priority.unwrap_or(1.0), w.name.clone()))
            })
            .collect();
    }
    config
        .workers
        .iter()
        .map(|w| -> Arc<dyn WorkerProxy> {
            Arc::new(ComfyWorker::connect(&w.url, w.priority.unwrap_or(1.0), w.name.clone()))
        })
        .collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli.config)?;
    let workflow = load_workflow(&cli.workflow)?;

    let (image, _meta) = png::read_with_meta(&cli.input)
        .with_context(|| format!("reading input image {}", cli.input.display()))?;
    let width = image.width();
    let height = image.height();

    let slicer = build_slicer(cli.slicer, width, height, &cli)?;
    let workers = build_workers(&config, cli.debug_worker);
    let mask_builder = MaskBuilder::new(cli.mask_padding, cli.mask_feather);

    let paths = PathTable::with_defaults(&cli.output_dir)?;
    let out_path = paths.next_path("output", "png", "tesserae_")?;

    let settings = Settings {
        image_scale: cli.scale,
        image_height: height,
        image_width: width,
        tile_source: config.job.tile_source,
        upscale_factor: config.job.upscale_factor,
        positive_prompt: cli.positive_prompt.clone(),
        negative_prompt: cli.negative_prompt.clone(),
        seed_increment: config.job.seed_increment,
        workflow,
        save: config.job.save,
    };

    let job = Arc::new(Job::new(slicer, workers, image, mask_builder, settings, Some(out_path.clone()))?);
    job.run()?;

    let (done, total) = job.progress();
    if job.finished() && done == total {
        eprintln!("tesserae: {done}/{total} tiles assembled, wrote {}", out_path.display());
        Ok(())
    } else {
        anyhow::bail!("tesserae: job ended incomplete ({done}/{total} tiles assembled)");
    }
}
