use std::collections::HashMap;

use anyhow::Result;
use log::{debug, warn};

use crate::store::FragmentStore;
use crate::tiles::TileKey;

/// Flush policy for the in-memory tile buckets.
///
/// Two independent triggers: total pending features bounds memory, distinct
/// pending tiles bounds the size of any single spill pass. Whichever trips
/// first flushes everything.
#[derive(Clone, Copy, Debug)]
pub struct SpillConfig {
    pub flush_threshold: usize,
    pub max_pending_tiles: usize,
}

/// Accumulates serialized features per tile and spills them to fragment
/// storage when a threshold trips.
///
/// Within one tile, lines reach the fragment in insertion order; the
/// finalizer's first-seen-wins dedupe depends on that.
pub struct SpillBuffer<S: FragmentStore> {
    store: S,
    config: SpillConfig,
    buckets: HashMap<TileKey, Vec<String>>,
    pending: usize,
    dropped: u64,
    spills: u64,
}

impl<S: FragmentStore> SpillBuffer<S> {
    pub fn new(store: S, config: SpillConfig) -> Self {
        Self {
            store,
            config,
            buckets: HashMap::new(),
            pending: 0,
            dropped: 0,
            spills: 0,
        }
    }

    pub fn insert(&mut self, key: TileKey, line: &str) {
        self.buckets.entry(key).or_default().push(line.to_string());
        self.pending += 1;
    }

    pub fn maybe_spill(&mut self) {
        if self.pending >= self.config.flush_threshold
            || self.buckets.len() >= self.config.max_pending_tiles
        {
            self.spill_all();
        }
    }

    /// Appends every non-empty bucket to its fragment and clears the buffer.
    ///
    /// A failed append is retried once; if the retry also fails, that tile's
    /// batch is dropped with a warning and counted, and the pass moves on to
    /// the remaining tiles. Nothing here can abort the run.
    pub fn spill_all(&mut self) {
        if self.buckets.is_empty() {
            return;
        }
        let buckets = std::mem::take(&mut self.buckets);
        let flushed = self.pending;
        self.pending = 0;
        self.spills += 1;

        let mut failed_tiles = 0usize;
        for (key, lines) in buckets {
            if lines.is_empty() {
                continue;
            }
            if let Err(first) = self.store.append(key, &lines) {
                debug!("Retrying fragment append for tile {}: {:#}", key, first);
                if let Err(second) = self.store.append(key, &lines) {
                    warn!(
                        "Dropping {} buffered features for tile {} after failed append: {:#}",
                        lines.len(),
                        key,
                        second
                    );
                    self.dropped += lines.len() as u64;
                    failed_tiles += 1;
                }
            }
        }
        debug!(
            "Spill pass {} flushed {} features ({} tile batches failed)",
            self.spills, flushed, failed_tiles
        );
    }

    /// End-of-stream flush: spills everything and makes fragments durable
    /// for the finalizer.
    pub fn force_flush(&mut self) -> Result<()> {
        self.spill_all();
        self.store.flush_all()
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn into_store(self) -> S {
        self.store
    }
}
