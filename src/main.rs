mod feature;
mod finalize;
mod pipeline;
mod reader;
mod speed;
mod spill;
mod store;
mod tiles;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use crate::feature::ProjectorRules;
use crate::pipeline::PipelineConfig;
use crate::reader::PbfSource;
use crate::speed::UnitRules;
use crate::spill::SpillConfig;

/// Bin road ways from an OSM PBF extract into z/x/y GeoJSON tile documents.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input .osm.pbf extract.
    #[arg(long)]
    pbf: PathBuf,

    /// Root directory for the z/x/y tile documents.
    #[arg(long)]
    out: PathBuf,

    /// Slippy-map zoom level to bin into.
    #[arg(long, default_value_t = 13)]
    zoom: u8,

    /// Spill buffered features to disk once this many are pending in memory.
    #[arg(long, default_value_t = 200_000)]
    flush_threshold: usize,

    /// Spill once this many distinct tiles have pending features.
    #[arg(long, default_value_t = 20_000)]
    max_pending_tiles: usize,

    /// Cap on simultaneously open fragment files.
    #[arg(long, default_value_t = 64)]
    max_open_fragments: usize,

    /// Locale used to interpret maxspeed values without a unit marker
    /// (e.g. "gb" reads plain numbers as mph).
    #[arg(long, default_value = "")]
    locale: String,

    /// Also write a flat tile_z_x_y.json copy of every tile document.
    #[arg(long)]
    legacy_copies: bool,

    /// Fill missing speed limits from per-category defaults.
    #[arg(long)]
    infer_speeds: bool,

    /// Directory for intermediate per-tile fragments.
    /// Defaults to <out>/.fragments.
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Worker threads for tile finalization. Defaults to all cores.
    #[arg(long)]
    threads: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .unwrap_or_else(|e| warn!("Failed to configure thread pool: {}", e));
    }

    std::fs::create_dir_all(&cli.out)
        .with_context(|| format!("Failed to create output root {}", cli.out.display()))?;
    let scratch_dir = cli
        .scratch_dir
        .clone()
        .unwrap_or_else(|| cli.out.join(".fragments"));

    let rules = ProjectorRules {
        plain_unit: UnitRules::builtin().plain_unit(&cli.locale),
        category_speeds: cli.infer_speeds.then(speed::default_category_speeds),
    };

    let config = PipelineConfig {
        zoom: cli.zoom,
        out_dir: cli.out.clone(),
        scratch_dir,
        spill: SpillConfig {
            flush_threshold: cli.flush_threshold,
            max_pending_tiles: cli.max_pending_tiles,
        },
        max_open_fragments: cli.max_open_fragments,
        write_legacy_copies: cli.legacy_copies,
        rules,
    };

    let source = PbfSource::open(&cli.pbf)?;
    info!(
        "Binning road ways from {} into zoom {} tiles under {}",
        cli.pbf.display(),
        cli.zoom,
        cli.out.display()
    );

    let summary = pipeline::run(&source, &config)?;
    info!(
        "Done: {} records read, {} skipped, {} features binned ({} dropped), {} tiles written ({} failed)",
        summary.records_seen,
        summary.records_skipped,
        summary.features_binned,
        summary.features_dropped,
        summary.tiles_written,
        summary.tiles_failed
    );
    Ok(())
}
