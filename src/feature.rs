use std::collections::{BTreeMap, HashMap};

use geo::{Coord, Rect};
use serde::{Deserialize, Serialize};

use crate::speed::{self, SpeedUnit, UNKNOWN_SPEED};

/// Latitude limit of the spherical Mercator projection. Bounding boxes are
/// clamped to this before tile math so polar geometry cannot produce
/// degenerate tile ranges.
pub const MERCATOR_LAT_LIMIT: f64 = 85.05112878;

/// One road entity as pulled from the source, before any filtering.
///
/// Points may contain non-finite coordinates (e.g. unresolved node
/// references); the projector keeps only the finite ones.
#[derive(Clone, Debug)]
pub struct RoadRecord {
    pub id: u64,
    pub points: Vec<Coord<f64>>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoadFeature {
    #[serde(rename = "type")]
    pub feature_type: String,
    pub geometry: LineGeometry,
    pub properties: RoadProperties,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineGeometry {
    #[serde(rename = "type")]
    pub geometry_type: String,
    /// (lon, lat) pairs in source order. Always at least two.
    pub coordinates: Vec<[f64; 2]>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoadProperties {
    pub id: u64,
    pub highway: String,
    pub maxspeed_raw: Option<String>,
    pub maxspeed_mph: i32,
}

/// How raw tags become feature properties.
#[derive(Clone, Debug)]
pub struct ProjectorRules {
    /// Unit assumed for maxspeed values without an explicit marker.
    pub plain_unit: SpeedUnit,
    /// Optional per-category fallback applied when no usable maxspeed tag
    /// exists. `None` leaves the unknown sentinel in place.
    pub category_speeds: Option<HashMap<String, i32>>,
}

impl RoadFeature {
    /// Bounding box of the geometry, latitudes clamped to the Mercator
    /// limit, ready for tile coverage math.
    pub fn clamped_bounds(&self) -> Rect<f64> {
        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;

        for coord in &self.geometry.coordinates {
            min_x = min_x.min(coord[0]);
            min_y = min_y.min(coord[1]);
            max_x = max_x.max(coord[0]);
            max_y = max_y.max(coord[1]);
        }

        Rect::new(
            Coord {
                x: min_x,
                y: min_y.clamp(-MERCATOR_LAT_LIMIT, MERCATOR_LAT_LIMIT),
            },
            Coord {
                x: max_x,
                y: max_y.clamp(-MERCATOR_LAT_LIMIT, MERCATOR_LAT_LIMIT),
            },
        )
    }
}

/// Turns a raw record into a serializable feature, or nothing.
///
/// Records without a `highway` tag or with fewer than two finite points are
/// dropped here and never reach any output.
pub fn project_record(record: &RoadRecord, rules: &ProjectorRules) -> Option<RoadFeature> {
    let highway = record.tags.get("highway")?.clone();

    let coordinates: Vec<[f64; 2]> = record
        .points
        .iter()
        .filter(|c| c.x.is_finite() && c.y.is_finite())
        .map(|c| [c.x, c.y])
        .collect();
    if coordinates.len() < 2 {
        return None;
    }

    let maxspeed_raw = record.tags.get("maxspeed").cloned();
    let mut maxspeed_mph = speed::normalize_maxspeed(maxspeed_raw.as_deref(), rules.plain_unit);
    if maxspeed_mph == UNKNOWN_SPEED {
        if let Some(fallback) = rules
            .category_speeds
            .as_ref()
            .and_then(|table| table.get(&highway))
        {
            maxspeed_mph = *fallback;
        }
    }

    Some(RoadFeature {
        feature_type: "Feature".to_string(),
        geometry: LineGeometry {
            geometry_type: "LineString".to_string(),
            coordinates,
        },
        properties: RoadProperties {
            id: record.id,
            highway,
            maxspeed_raw,
            maxspeed_mph,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, points: Vec<Coord<f64>>, tags: &[(&str, &str)]) -> RoadRecord {
        RoadRecord {
            id,
            points,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn rules() -> ProjectorRules {
        ProjectorRules {
            plain_unit: SpeedUnit::Kmh,
            category_speeds: None,
        }
    }

    #[test]
    fn missing_highway_tag_is_dropped() {
        let rec = record(
            1,
            vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }],
            &[("name", "High Street")],
        );
        assert!(project_record(&rec, &rules()).is_none());
    }

    #[test]
    fn fewer_than_two_finite_points_is_dropped() {
        let rec = record(
            2,
            vec![
                Coord { x: 0.0, y: 0.0 },
                Coord {
                    x: f64::NAN,
                    y: 1.0,
                },
            ],
            &[("highway", "residential")],
        );
        assert!(project_record(&rec, &rules()).is_none());
    }

    #[test]
    fn non_finite_points_are_filtered_in_order() {
        let rec = record(
            3,
            vec![
                Coord { x: 0.0, y: 0.0 },
                Coord {
                    x: f64::INFINITY,
                    y: 2.0,
                },
                Coord { x: 1.0, y: 1.0 },
            ],
            &[("highway", "residential")],
        );
        let feature = project_record(&rec, &rules()).unwrap();
        assert_eq!(feature.geometry.coordinates, vec![[0.0, 0.0], [1.0, 1.0]]);
    }

    #[test]
    fn properties_carry_raw_and_normalized_speed() {
        let rec = record(
            4,
            vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }],
            &[("highway", "trunk"), ("maxspeed", "60 mph")],
        );
        let feature = project_record(&rec, &rules()).unwrap();
        assert_eq!(feature.properties.id, 4);
        assert_eq!(feature.properties.highway, "trunk");
        assert_eq!(feature.properties.maxspeed_raw.as_deref(), Some("60 mph"));
        assert_eq!(feature.properties.maxspeed_mph, 60);
    }

    #[test]
    fn unknown_speed_stays_sentinel_without_inference() {
        let rec = record(
            5,
            vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }],
            &[("highway", "residential")],
        );
        let feature = project_record(&rec, &rules()).unwrap();
        assert_eq!(feature.properties.maxspeed_mph, UNKNOWN_SPEED);
    }

    #[test]
    fn category_fallback_fills_missing_speed_when_enabled() {
        let with_inference = ProjectorRules {
            plain_unit: SpeedUnit::Kmh,
            category_speeds: Some(crate::speed::default_category_speeds()),
        };
        let rec = record(
            6,
            vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }],
            &[("highway", "motorway")],
        );
        let feature = project_record(&rec, &with_inference).unwrap();
        assert_eq!(feature.properties.maxspeed_mph, 70);

        // A parseable tag always wins over the table.
        let rec = record(
            7,
            vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }],
            &[("highway", "motorway"), ("maxspeed", "50 mph")],
        );
        let feature = project_record(&rec, &with_inference).unwrap();
        assert_eq!(feature.properties.maxspeed_mph, 50);
    }

    #[test]
    fn bounds_clamp_polar_latitudes() {
        let rec = record(
            8,
            vec![Coord { x: 10.0, y: 89.9 }, Coord { x: 11.0, y: -89.9 }],
            &[("highway", "residential")],
        );
        let feature = project_record(&rec, &rules()).unwrap();
        let bounds = feature.clamped_bounds();
        assert_eq!(bounds.max().y, MERCATOR_LAT_LIMIT);
        assert_eq!(bounds.min().y, -MERCATOR_LAT_LIMIT);
        assert_eq!(bounds.min().x, 10.0);
        assert_eq!(bounds.max().x, 11.0);
    }

    #[test]
    fn feature_round_trips_through_json() {
        let rec = record(
            9,
            vec![Coord { x: -0.1, y: 51.5 }, Coord { x: -0.2, y: 51.6 }],
            &[("highway", "primary"), ("maxspeed", "40 mph")],
        );
        let feature = project_record(&rec, &rules()).unwrap();
        let line = serde_json::to_string(&feature).unwrap();
        let back: RoadFeature = serde_json::from_str(&line).unwrap();
        assert_eq!(back.properties.id, 9);
        assert_eq!(back.geometry.coordinates, feature.geometry.coordinates);
        assert!(line.contains("\"type\":\"Feature\""));
        assert!(line.contains("\"type\":\"LineString\""));
    }
}
