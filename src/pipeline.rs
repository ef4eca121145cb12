use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;

use crate::feature::{self, ProjectorRules, RoadRecord};
use crate::finalize;
use crate::spill::{SpillBuffer, SpillConfig};
use crate::store::{DirFragmentStore, FragmentStore};
use crate::tiles;

/// Everything one run needs, assembled from the CLI in `main`.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub zoom: u8,
    pub out_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub spill: SpillConfig,
    pub max_open_fragments: usize,
    pub write_legacy_copies: bool,
    pub rules: ProjectorRules,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RunSummary {
    pub records_seen: u64,
    pub records_skipped: u64,
    pub features_binned: u64,
    pub features_dropped: u64,
    pub tiles_written: u64,
    pub tiles_failed: u64,
}

/// A stream of road records. Implementations must stream: inputs are far
/// larger than memory.
pub trait RecordSource {
    fn for_each_record(&self, f: &mut dyn FnMut(RoadRecord)) -> Result<()>;
}

/// Runs the full pipeline: stream records, bin features into tile buckets
/// with bounded spilling, then finalize one document per tile.
pub fn run<R: RecordSource>(source: &R, config: &PipelineConfig) -> Result<RunSummary> {
    let store = DirFragmentStore::new(&config.scratch_dir, config.max_open_fragments)?;
    let mut buffer = SpillBuffer::new(store, config.spill);
    let mut summary = RunSummary::default();

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner} {pos} records read")?);

    source.for_each_record(&mut |record: RoadRecord| {
        summary.records_seen += 1;
        pb.inc(1);

        let Some(road) = feature::project_record(&record, &config.rules) else {
            summary.records_skipped += 1;
            return;
        };
        let line = match serde_json::to_string(&road) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize feature for way {}: {}", record.id, e);
                summary.records_skipped += 1;
                return;
            }
        };

        let bounds = road.clamped_bounds();
        let keys = tiles::tiles_for_bounds(
            bounds.min().x,
            bounds.min().y,
            bounds.max().x,
            bounds.max().y,
            config.zoom,
        );
        for key in keys {
            buffer.insert(key, &line);
        }
        summary.features_binned += 1;
        buffer.maybe_spill();
    })?;
    pb.finish();

    buffer.force_flush()?;
    summary.features_dropped = buffer.dropped();
    let store = buffer.into_store();

    let keys = store.keys()?;
    info!(
        "Stream complete: {} records, {} skipped; finalizing {} tiles",
        summary.records_seen,
        summary.records_skipped,
        keys.len()
    );

    let pb = ProgressBar::new(keys.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta}) - Writing tiles")?
            .progress_chars("##-"),
    );

    let written = AtomicU64::new(0);
    let failed = AtomicU64::new(0);
    keys.par_iter().for_each(|key| {
        match finalize::finalize_tile(&store, *key, &config.out_dir, config.write_legacy_copies) {
            Ok(count) => {
                written.fetch_add(1, Ordering::Relaxed);
                log::debug!("Tile {} finalized with {} features", key, count);
            }
            Err(e) => {
                warn!("Failed to finalize tile {}: {:#}", key, e);
                failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        pb.inc(1);
    });
    pb.finish();

    summary.tiles_written = written.load(Ordering::Relaxed);
    summary.tiles_failed = failed.load(Ordering::Relaxed);
    Ok(summary)
}
