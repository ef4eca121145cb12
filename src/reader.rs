use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use geo::Coord;
use log::info;
use osmpbf::{Element, ElementReader};

use crate::feature::RoadRecord;
use crate::pipeline::RecordSource;

/// Streams road records out of an OSM PBF extract.
///
/// Three sequential scans keep memory proportional to the road network
/// rather than the extract: the first collects the node ids referenced by
/// `highway` ways, the second resolves just those nodes to coordinates, the
/// third re-reads the ways and emits records. Node references that never
/// resolved become non-finite points, which the projector filters per point.
pub struct PbfSource {
    path: PathBuf,
}

impl PbfSource {
    /// Fails fast if the extract cannot be opened, before any output or
    /// scratch state is touched.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ElementReader::from_path(&path)
            .with_context(|| format!("Failed to open PBF extract {}", path.display()))?;
        Ok(Self { path })
    }

    fn collect_road_node_ids(&self) -> Result<HashSet<i64>> {
        let mut wanted = HashSet::new();
        let reader = ElementReader::from_path(&self.path)?;
        reader.for_each(|element| {
            if let Element::Way(way) = element {
                if way.tags().any(|(key, _)| key == "highway") {
                    wanted.extend(way.refs());
                }
            }
        })?;
        Ok(wanted)
    }

    fn collect_node_locations(&self, wanted: &HashSet<i64>) -> Result<HashMap<i64, Coord<f64>>> {
        let mut locations = HashMap::with_capacity(wanted.len());
        let reader = ElementReader::from_path(&self.path)?;
        reader.for_each(|element| match element {
            Element::Node(node) => {
                if wanted.contains(&node.id()) {
                    locations.insert(
                        node.id(),
                        Coord {
                            x: node.lon(),
                            y: node.lat(),
                        },
                    );
                }
            }
            Element::DenseNode(node) => {
                if wanted.contains(&node.id()) {
                    locations.insert(
                        node.id(),
                        Coord {
                            x: node.lon(),
                            y: node.lat(),
                        },
                    );
                }
            }
            _ => {}
        })?;
        Ok(locations)
    }
}

impl RecordSource for PbfSource {
    fn for_each_record(&self, f: &mut dyn FnMut(RoadRecord)) -> Result<()> {
        let wanted = self.collect_road_node_ids()?;
        info!("Indexed {} node ids referenced by road ways", wanted.len());
        let locations = self.collect_node_locations(&wanted)?;
        info!("Resolved {} node locations", locations.len());

        let reader = ElementReader::from_path(&self.path)?;
        reader.for_each(|element| {
            if let Element::Way(way) = element {
                if !way.tags().any(|(key, _)| key == "highway") {
                    return;
                }
                let tags: BTreeMap<String, String> = way
                    .tags()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect();
                let points = way
                    .refs()
                    .map(|node_id| {
                        locations.get(&node_id).copied().unwrap_or(Coord {
                            x: f64::NAN,
                            y: f64::NAN,
                        })
                    })
                    .collect();
                f(RoadRecord {
                    id: way.id() as u64,
                    points,
                    tags,
                });
            }
        })?;
        Ok(())
    }
}
