use std::collections::HashMap;

/// Sentinel for a speed limit that is absent or unparseable.
pub const UNKNOWN_SPEED: i32 = -1;

const KMH_TO_MPH: f64 = 0.621371;

/// Unit assumed for a maxspeed value that carries no unit marker of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeedUnit {
    Mph,
    Kmh,
}

/// Maps locale codes to the unit assumed for unmarked numeric speed values.
///
/// Unknown locales fall back to km/h, which is what most of the world signs.
#[derive(Clone, Debug)]
pub struct UnitRules {
    locales: HashMap<String, SpeedUnit>,
}

impl UnitRules {
    /// Rules for the locales that sign speed limits in mph.
    pub fn builtin() -> Self {
        let locales = [("gb", SpeedUnit::Mph), ("us", SpeedUnit::Mph)]
            .into_iter()
            .map(|(code, unit)| (code.to_string(), unit))
            .collect();
        Self { locales }
    }

    pub fn with_locale(mut self, code: &str, unit: SpeedUnit) -> Self {
        self.locales.insert(code.to_lowercase(), unit);
        self
    }

    pub fn plain_unit(&self, locale: &str) -> SpeedUnit {
        self.locales
            .get(&locale.to_lowercase())
            .copied()
            .unwrap_or(SpeedUnit::Kmh)
    }
}

/// Default speeds in mph per highway category, for extracts where the
/// maxspeed tag is sparse. Only consulted when speed inference is enabled.
pub fn default_category_speeds() -> HashMap<String, i32> {
    [
        ("motorway", 70),
        ("trunk", 60),
        ("primary", 50),
        ("secondary", 40),
        ("tertiary", 30),
        ("unclassified", 30),
        ("residential", 30),
        ("service", 10),
        ("motorway_link", 60),
        ("trunk_link", 50),
        ("living_street", 10),
    ]
    .into_iter()
    .map(|(category, mph)| (category.to_string(), mph))
    .collect()
}

/// Normalizes a raw maxspeed tag value to whole mph.
///
/// Total over all inputs: anything that cannot be read as a speed becomes
/// [`UNKNOWN_SPEED`]. The numeric part is the leading run of digit and `.`
/// characters of the trimmed, lowercased input. An explicit `mph` marker
/// wins over the locale hint, as does an explicit metric marker; unmarked
/// values are interpreted per `plain_unit`. Rounds half away from zero.
pub fn normalize_maxspeed(raw: Option<&str>, plain_unit: SpeedUnit) -> i32 {
    let Some(raw) = raw else {
        return UNKNOWN_SPEED;
    };
    let text = raw.trim().to_lowercase();
    if text.is_empty() || text == "none" {
        return UNKNOWN_SPEED;
    }

    let numeric: String = text
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let Ok(value) = numeric.parse::<f64>() else {
        return UNKNOWN_SPEED;
    };

    if text.contains("mph") {
        return value.round() as i32;
    }
    if text.contains("km/h") || text.contains("kph") || text.contains("kmh") || text.ends_with("km")
    {
        return (value * KMH_TO_MPH).round() as i32;
    }
    match plain_unit {
        SpeedUnit::Mph => value.round() as i32,
        SpeedUnit::Kmh => (value * KMH_TO_MPH).round() as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mph_marker_passes_value_through() {
        assert_eq!(normalize_maxspeed(Some("30 mph"), SpeedUnit::Kmh), 30);
        assert_eq!(normalize_maxspeed(Some("30mph"), SpeedUnit::Kmh), 30);
        assert_eq!(normalize_maxspeed(Some(" 70 MPH "), SpeedUnit::Kmh), 70);
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(normalize_maxspeed(Some("30.5 mph"), SpeedUnit::Kmh), 31);
        assert_eq!(normalize_maxspeed(Some("30.4 mph"), SpeedUnit::Kmh), 30);
    }

    #[test]
    fn plain_numbers_convert_under_kmh_hint() {
        assert_eq!(normalize_maxspeed(Some("50"), SpeedUnit::Kmh), 31);
        assert_eq!(normalize_maxspeed(Some("100"), SpeedUnit::Kmh), 62);
        assert_eq!(normalize_maxspeed(Some("30"), SpeedUnit::Kmh), 19);
    }

    #[test]
    fn plain_numbers_pass_through_under_mph_hint() {
        assert_eq!(normalize_maxspeed(Some("30"), SpeedUnit::Mph), 30);
        assert_eq!(normalize_maxspeed(Some("60"), SpeedUnit::Mph), 60);
    }

    #[test]
    fn metric_markers_convert_even_under_mph_hint() {
        assert_eq!(normalize_maxspeed(Some("60 km/h"), SpeedUnit::Mph), 37);
        assert_eq!(normalize_maxspeed(Some("60 kph"), SpeedUnit::Mph), 37);
        assert_eq!(normalize_maxspeed(Some("60kmh"), SpeedUnit::Mph), 37);
        assert_eq!(normalize_maxspeed(Some("60 km"), SpeedUnit::Mph), 37);
    }

    #[test]
    fn unreadable_values_become_the_sentinel() {
        assert_eq!(normalize_maxspeed(None, SpeedUnit::Kmh), UNKNOWN_SPEED);
        assert_eq!(normalize_maxspeed(Some(""), SpeedUnit::Kmh), UNKNOWN_SPEED);
        assert_eq!(normalize_maxspeed(Some("   "), SpeedUnit::Kmh), UNKNOWN_SPEED);
        assert_eq!(normalize_maxspeed(Some("none"), SpeedUnit::Kmh), UNKNOWN_SPEED);
        assert_eq!(normalize_maxspeed(Some("walk"), SpeedUnit::Kmh), UNKNOWN_SPEED);
        assert_eq!(normalize_maxspeed(Some("."), SpeedUnit::Kmh), UNKNOWN_SPEED);
        assert_eq!(
            normalize_maxspeed(Some("variable"), SpeedUnit::Mph),
            UNKNOWN_SPEED
        );
    }

    #[test]
    fn suffix_after_number_terminates_extraction() {
        assert_eq!(normalize_maxspeed(Some("30; 40"), SpeedUnit::Mph), 30);
    }

    #[test]
    fn locale_rules_resolve_units() {
        let rules = UnitRules::builtin();
        assert_eq!(rules.plain_unit("gb"), SpeedUnit::Mph);
        assert_eq!(rules.plain_unit("GB"), SpeedUnit::Mph);
        assert_eq!(rules.plain_unit("us"), SpeedUnit::Mph);
        assert_eq!(rules.plain_unit("de"), SpeedUnit::Kmh);
        assert_eq!(rules.plain_unit(""), SpeedUnit::Kmh);

        let rules = rules.with_locale("xx", SpeedUnit::Mph);
        assert_eq!(rules.plain_unit("xx"), SpeedUnit::Mph);
    }
}
