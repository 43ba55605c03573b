//! chronocube CLI - temporal compositing and change detection tasks

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use chronocube_algorithms::config::{TaskConfig, TaskPlan};
use chronocube_algorithms::task::run_task;
use chronocube_core::io::{GeoTiffWriter, ManifestSource};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "chronocube")]
#[command(author, version, about = "Temporal compositing and change detection", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an analysis task
    Run {
        /// Task file (TOML)
        task: PathBuf,
        /// Scene manifest, overriding the task file
        #[arg(short, long)]
        manifest: Option<PathBuf>,
        /// Output directory, overriding the task file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Reducer: median, mean, max_index, min_index, geomedian
        #[arg(short, long)]
        reducer: Option<String>,
        /// Index: ndvi, evi, ndwi, fractional_cover
        #[arg(short, long)]
        index: Option<String>,
        /// Concurrent chunks (0 = all cores)
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Validate a task file without loading data
    Check {
        /// Task file (TOML)
        task: PathBuf,
    },
    /// List the scenes of a manifest
    Info {
        /// Scene manifest (TOML)
        manifest: PathBuf,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn load_task(path: &Path) -> Result<TaskConfig> {
    TaskConfig::from_file(path).with_context(|| format!("Failed to read task: {}", path.display()))
}

fn plan_task(config: &TaskConfig, path: &Path) -> Result<TaskPlan> {
    config.plan().map_err(|e| {
        let what = if e.is_configuration() {
            "Invalid task"
        } else {
            "Cannot plan task"
        };
        anyhow::Error::new(e).context(format!("{}: {}", what, path.display()))
    })
}

fn print_plan(plan: &TaskPlan) {
    println!("Product: {}", plan.spec.kind);
    println!("Reducer: {}", plan.spec.reducer);
    println!("Index: {}", plan.spec.index);
    for period in std::iter::once(&plan.baseline).chain(plan.analysis.as_ref()) {
        println!(
            "{}: {} .. {} ({})",
            period.label, period.time.start, period.time.end, period.platform
        );
    }
    if let Some(t) = plan.spec.thresholds {
        println!("Thresholds: [{}, {}]", t.min_c(), t.max_c());
    }
    println!(
        "Chunks: {} x {} on {} threads",
        plan.pipeline.chunk_rows(),
        plan.pipeline.chunk_cols(),
        plan.pipeline.mode().threads()
    );
    println!("Output: {}", plan.output_dir.display());
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Run {
            task,
            manifest,
            output,
            reducer,
            index,
            workers,
        } => {
            let mut config = load_task(&task)?;
            if let Some(m) = manifest {
                config.manifest = Some(m);
            }
            if let Some(o) = output {
                config.output.directory = o;
            }
            if reducer.is_some() {
                config.reducer = reducer;
            }
            if index.is_some() {
                config.index = index;
            }
            if let Some(w) = workers {
                config.execution.workers = w;
            }
            let plan = plan_task(&config, &task)?;
            let manifest = plan
                .manifest
                .as_ref()
                .context("No scene manifest given (use --manifest or `manifest` in the task)")?;
            let source = ManifestSource::open(manifest)
                .with_context(|| format!("Failed to read manifest: {}", manifest.display()))?;
            let writer = GeoTiffWriter::new(&plan.output_dir);

            let start = Instant::now();
            let pb = spinner(&format!("Computing {}...", plan.spec.kind));
            let result = run_task(&plan, &source, &writer);
            pb.finish_and_clear();
            let report = result.with_context(|| format!("Task failed: {}", plan.spec.kind))?;

            info!(product = %report.product, files = report.written.len(), "done");
            for path in &report.written {
                println!("Saved: {}", path);
            }
            println!("  Processing time: {:.2?}", start.elapsed());
        }

        Commands::Check { task } => {
            let config = load_task(&task)?;
            let plan = plan_task(&config, &task)?;
            print_plan(&plan);
            println!("Task is valid");
        }

        Commands::Info { manifest } => {
            let source = ManifestSource::open(&manifest)
                .with_context(|| format!("Failed to read manifest: {}", manifest.display()))?;
            let scenes = source.scenes();
            println!("Manifest: {}", manifest.display());
            if let Some(crs) = source.crs() {
                println!("CRS: {}", crs);
            }
            let mut by_product: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for scene in &scenes {
                by_product.entry(&scene.product).or_default().push(&scene.time);
            }
            for (product, times) in by_product {
                let first = times.iter().min().copied().unwrap_or_default();
                let last = times.iter().max().copied().unwrap_or_default();
                println!("  {}: {} scenes ({} .. {})", product, times.len(), first, last);
            }
        }
    }

    Ok(())
}
