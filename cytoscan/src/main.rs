//! cytoscan CLI: segment the selected wells of a project or print stored results.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use cytoscan::{
    BatchProcessor, BatchProgress, BatchState, CheckoutRegistry, FeatureEngine, Plate,
    ProjectConfig, ProjectStore, StatKind, ThresholdSegmentor, WellOrder, WellStatus,
};

#[derive(Parser)]
#[command(name = "cytoscan")]
#[command(about = "Segment plate microscopy images into cells and summarize per-well features")]
#[command(version)]
struct Cli {
    /// Overrides the log level of the config file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment the selected wells and store their results.
    Process {
        /// Project config (YAML, JSON or TOML).
        config: PathBuf,

        /// Process wells column by column instead of row by row.
        #[arg(long)]
        vertical: bool,
    },

    /// Print stored per-well statistics.
    Summary {
        /// Project config (YAML, JSON or TOML).
        config: PathBuf,

        /// Only print this feature.
        #[arg(long)]
        feature: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Process { config, vertical } => {
            let config = load(&config, cli.log_level.as_deref())?;
            let order = if vertical {
                WellOrder::Vertical
            } else {
                WellOrder::Horizontal
            };
            process(&config, order)
        }
        Commands::Summary { config, feature } => {
            let config = load(&config, cli.log_level.as_deref())?;
            summary(&config, feature.as_deref())
        }
    }
}

fn load(path: &Path, log_level: Option<&str>) -> anyhow::Result<ProjectConfig> {
    let config = ProjectConfig::load(path)?;
    let level = log_level.unwrap_or(&config.log_level);
    common::log_setup::setup_logging(level, &config.project_dir.join("logs"))
        .context("Failed to set up logging")?;
    Ok(config)
}

fn process(config: &ProjectConfig, order: WellOrder) -> anyhow::Result<()> {
    let plate = config.build_plate()?;
    let wells = plate.selected_wells(order);
    if wells.is_empty() {
        tracing::warn!("No wells selected");
        return Ok(());
    }

    let engine = Arc::new(FeatureEngine::with_default_features(
        config.channel_names.clone(),
    ));
    let segmentor = Arc::new(ThresholdSegmentor::new(config.segmentation.clone())?);
    let store = Arc::new(ProjectStore::new(&config.project_dir));

    let batch = BatchProcessor::new(
        store,
        engine,
        segmentor,
        config.batch.clone(),
        CheckoutRegistry::new(),
    )
    .with_progress(Arc::new(|p: BatchProgress| {
        tracing::info!("[{}/{}] {}: {:?}", p.current, p.total, p.well, p.status);
    }));

    let start = Instant::now();
    batch.start(wells)?;
    let report = batch.wait();

    for well in &report.wells {
        match &well.status {
            WellStatus::Segmented { cells } => println!("{}\t{cells} cells", well.name),
            WellStatus::SkippedNoImage => println!("{}\tno images", well.name),
            WellStatus::Unsegmented => println!("{}\tno cells", well.name),
            WellStatus::Error(msg) => println!("{}\terror: {msg}", well.name),
        }
    }
    tracing::info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        cells = report.total_cells(),
        "Processing finished"
    );

    if let BatchState::Failed(reason) = report.state {
        bail!("Batch failed: {reason}");
    }
    Ok(())
}

fn summary(config: &ProjectConfig, feature: Option<&str>) -> anyhow::Result<()> {
    let plate = config.build_plate()?;
    let engine = FeatureEngine::with_default_features(config.channel_names.clone());
    let names = engine.feature_names();
    let store = ProjectStore::new(&config.project_dir);

    let loaded = plate.load_summaries(&store, &names)?;
    if loaded == 0 {
        println!("No stored results under {}", store.data_dir().display());
        return Ok(());
    }

    for well in plate.wells() {
        let well = well.lock();
        let Some(summary) = well.summary() else {
            continue;
        };
        for (name, stats) in summary.iter() {
            if feature.is_some_and(|f| f != name) {
                continue;
            }
            println!(
                "{}\t{name}\tmean={:.3}\tstdev={:.3}",
                well.name(),
                stats.mean,
                stats.stdev
            );
        }
    }

    if let Some(feature) = feature {
        for well in plate.wells() {
            well.lock().selected = true;
        }
        let plates = [plate];
        if let Some((lo, hi)) = Plate::feature_range(&plates, feature, StatKind::Mean) {
            println!("{feature}: mean range {lo:.3} .. {hi:.3}");
        }
        if let Some((lo, hi)) = Plate::feature_range(&plates, feature, StatKind::Cv) {
            println!("{feature}: cv range {lo:.3} .. {hi:.3}");
        }
    }
    Ok(())
}
