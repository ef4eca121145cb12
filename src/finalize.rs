use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::feature::RoadFeature;
use crate::store::FragmentStore;
use crate::tiles::TileKey;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub collection_type: String,
    pub features: Vec<RoadFeature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<RoadFeature>) -> Self {
        Self {
            collection_type: "FeatureCollection".to_string(),
            features,
        }
    }
}

pub fn tile_document_path(out_root: &Path, key: TileKey) -> PathBuf {
    out_root
        .join(key.zoom.to_string())
        .join(key.x.to_string())
        .join(format!("{}.json", key.y))
}

/// Flat, non-namespaced duplicate next to the z/x/y tree, for consumers that
/// predate the tiled layout.
pub fn legacy_document_path(out_root: &Path, key: TileKey) -> PathBuf {
    out_root.join(format!("tile_{}.json", key.slug()))
}

/// Reads a tile's fragments in spill order and merges them with any existing
/// document at `existing`.
///
/// Feature ids are unique in the result; the first occurrence in read order
/// wins, and features of an existing document come before anything read from
/// fragments. An unreadable existing document is treated as absent so newly
/// computed features are never lost to a corrupt predecessor.
pub fn merge_tile<S: FragmentStore>(
    store: &S,
    key: TileKey,
    existing: &Path,
) -> Result<FeatureCollection> {
    let mut features: Vec<RoadFeature> = Vec::new();
    let mut seen: HashSet<u64> = HashSet::new();

    if existing.exists() {
        match fs::read_to_string(existing)
            .map_err(anyhow::Error::from)
            .and_then(|text| Ok(serde_json::from_str::<FeatureCollection>(&text)?))
        {
            Ok(document) => {
                for feature in document.features {
                    seen.insert(feature.properties.id);
                    features.push(feature);
                }
            }
            Err(e) => warn!(
                "Existing tile document {} is unreadable, rebuilding from fragments: {:#}",
                existing.display(),
                e
            ),
        }
    }

    for line in store.read_all(key)? {
        match serde_json::from_str::<RoadFeature>(&line) {
            Ok(feature) => {
                if seen.insert(feature.properties.id) {
                    features.push(feature);
                }
            }
            Err(e) => warn!("Skipping undecodable feature in fragment {}: {}", key, e),
        }
    }

    Ok(FeatureCollection::new(features))
}

/// Produces the final document for one tile and deletes its fragments.
///
/// Returns the number of features written.
pub fn finalize_tile<S: FragmentStore>(
    store: &S,
    key: TileKey,
    out_root: &Path,
    write_legacy_copy: bool,
) -> Result<usize> {
    let path = tile_document_path(out_root, key);
    let document = merge_tile(store, key, &path)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create tile directory {}", parent.display()))?;
    }
    let bytes = serde_json::to_vec(&document)?;
    fs::write(&path, &bytes)
        .with_context(|| format!("Failed to write tile document {}", path.display()))?;
    if write_legacy_copy {
        let legacy = legacy_document_path(out_root, key);
        fs::write(&legacy, &bytes)
            .with_context(|| format!("Failed to write legacy copy {}", legacy.display()))?;
    }

    store.delete(key)?;
    Ok(document.features.len())
}
