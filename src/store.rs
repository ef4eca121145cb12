use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::tiles::TileKey;

/// Append-only per-tile fragment storage sitting between the streaming pass
/// and finalization.
///
/// Appends for one key are ordered; reading a key back yields every appended
/// line in append order. `flush_all` must run before reads observe data that
/// went through pooled handles.
pub trait FragmentStore {
    fn append(&mut self, key: TileKey, lines: &[String]) -> Result<()>;
    fn read_all(&self, key: TileKey) -> Result<Vec<String>>;
    fn delete(&self, key: TileKey) -> Result<()>;
    /// Every key that currently has a fragment on storage.
    fn keys(&self) -> Result<Vec<TileKey>>;
    /// Flush and close pooled handles so fragments are durable for readers.
    fn flush_all(&mut self) -> Result<()>;
}

/// Fragment storage as one NDJSON file per tile under a scratch directory.
///
/// Keeps a bounded pool of open append handles with LRU eviction, so the
/// number of simultaneously open descriptors never exceeds `max_open` no
/// matter how many distinct tiles a run touches. An evicted handle is simply
/// flushed and closed; the next append to that tile reopens the file in
/// append mode.
pub struct DirFragmentStore {
    root: PathBuf,
    handles: HashMap<TileKey, BufWriter<File>>,
    lru: VecDeque<TileKey>,
    max_open: usize,
}

impl DirFragmentStore {
    pub fn new(root: impl AsRef<Path>, max_open: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create fragment directory {}", root.display()))?;
        Ok(Self {
            root,
            handles: HashMap::new(),
            lru: VecDeque::new(),
            max_open: max_open.max(1),
        })
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn fragment_path(&self, key: TileKey) -> PathBuf {
        self.root.join(format!("{}.ndjson", key.slug()))
    }

    fn evict_least_recently_used(&mut self) {
        while self.handles.len() >= self.max_open {
            let Some(evicted) = self.lru.pop_front() else {
                break;
            };
            if let Some(mut writer) = self.handles.remove(&evicted) {
                debug!("Closing fragment handle for tile {}", evicted);
                if let Err(e) = writer.flush() {
                    warn!("Failed to flush fragment handle for tile {}: {}", evicted, e);
                }
            }
        }
    }

    fn touch(&mut self, key: TileKey) {
        if let Some(pos) = self.lru.iter().position(|k| *k == key) {
            self.lru.remove(pos);
        }
        self.lru.push_back(key);
    }
}

impl FragmentStore for DirFragmentStore {
    fn append(&mut self, key: TileKey, lines: &[String]) -> Result<()> {
        if !self.handles.contains_key(&key) {
            self.evict_least_recently_used();
        }
        let path = self.fragment_path(key);
        let writer = match self.handles.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("Failed to open fragment {}", path.display()))?;
                entry.insert(BufWriter::new(file))
            }
        };
        for line in lines {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        self.touch(key);
        Ok(())
    }

    fn read_all(&self, key: TileKey) -> Result<Vec<String>> {
        let path = self.fragment_path(key);
        let file = File::open(&path)
            .with_context(|| format!("Failed to read fragment {}", path.display()))?;
        let lines = BufReader::new(file)
            .lines()
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("Failed to read fragment {}", path.display()))?;
        Ok(lines)
    }

    fn delete(&self, key: TileKey) -> Result<()> {
        let path = self.fragment_path(key);
        fs::remove_file(&path)
            .with_context(|| format!("Failed to delete fragment {}", path.display()))
    }

    fn keys(&self) -> Result<Vec<TileKey>> {
        let mut keys = Vec::new();
        let entries = fs::read_dir(&self.root).with_context(|| {
            format!("Failed to list fragment directory {}", self.root.display())
        })?;
        for entry in entries {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == "ndjson") {
                continue;
            }
            match path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(TileKey::from_slug)
            {
                Some(key) => keys.push(key),
                None => debug!(
                    "Ignoring stray file in fragment directory: {}",
                    path.display()
                ),
            }
        }
        Ok(keys)
    }

    fn flush_all(&mut self) -> Result<()> {
        for (key, mut writer) in self.handles.drain() {
            if let Err(e) = writer.flush() {
                warn!("Failed to flush fragment for tile {}: {}", key, e);
            }
        }
        self.lru.clear();
        Ok(())
    }
}
