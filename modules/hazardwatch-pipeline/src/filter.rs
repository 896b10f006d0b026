use std::collections::BTreeSet;

use hazardwatch_common::config::{EarthquakeThresholds, FileConfig};
use hazardwatch_common::{
    contains, normalize_event_type, Aoi, Event, GeometryError, HazardKind, SeverityLevel,
};

// ---------------------------------------------------------------------------
// Compiled filters
// ---------------------------------------------------------------------------

/// Weather thresholds with patterns pre-normalized.
#[derive(Debug, Clone, Default)]
struct WeatherRules {
    include: Vec<String>,
    exclude: Vec<String>,
    min_wind_gust_mps: Option<f64>,
}

/// Conjunction of independent predicates compiled from configuration.
/// An unset predicate never rejects anything.
#[derive(Debug, Clone, Default)]
pub struct FilterEngine {
    min_severity: Option<SeverityLevel>,
    allowed_types: Option<BTreeSet<String>>,
    earthquake: Option<EarthquakeThresholds>,
    weather: Option<WeatherRules>,
    aoi: Option<Aoi>,
}

impl FilterEngine {
    /// Compile and validate. An unusable AOI is an error, never "no AOI".
    pub fn from_config(config: &FileConfig) -> Result<Self, GeometryError> {
        let aoi = config.aoi.as_ref().map(Aoi::from_config).transpose()?;

        let allowed_types = config
            .filters
            .allowed_event_types
            .as_ref()
            .map(|types| normalized_patterns(types).into_iter().collect::<BTreeSet<_>>())
            .filter(|set| !set.is_empty());

        let weather = config.thresholds.weather.as_ref().map(|w| WeatherRules {
            include: normalized_patterns(&w.include_events),
            exclude: normalized_patterns(&w.exclude_events),
            min_wind_gust_mps: w.wind_gust_mps,
        });

        Ok(Self {
            min_severity: config.min_severity(),
            allowed_types,
            earthquake: config.thresholds.earthquake.clone(),
            weather,
            aoi,
        })
    }

    pub fn evaluate(&self, event: &Event) -> bool {
        self.first_failure(event).is_none()
    }

    /// Name of the first predicate that rejects `event`, for debug logging.
    pub fn first_failure(&self, event: &Event) -> Option<&'static str> {
        if !passes_min_severity(event, self.min_severity) {
            return Some("min_severity");
        }
        if !passes_allowed_types(event, self.allowed_types.as_ref()) {
            return Some("allowed_event_types");
        }
        if let Some(failed) = self
            .earthquake
            .as_ref()
            .and_then(|eq| earthquake_failure(event, eq))
        {
            return Some(failed);
        }
        if let Some(failed) = self.weather.as_ref().and_then(|w| weather_failure(event, w)) {
            return Some(failed);
        }
        if let Some(aoi) = &self.aoi {
            if !contains(aoi, &event.location) {
                return Some("aoi");
            }
        }
        None
    }
}

/// One-shot form: compile `config` and test a single event.
pub fn evaluate(event: &Event, config: &FileConfig) -> Result<bool, GeometryError> {
    Ok(FilterEngine::from_config(config)?.evaluate(event))
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

fn passes_min_severity(event: &Event, min: Option<SeverityLevel>) -> bool {
    match min {
        Some(min) => event.severity_level >= min,
        None => true,
    }
}

fn passes_allowed_types(event: &Event, allowed: Option<&BTreeSet<String>>) -> bool {
    match allowed {
        Some(set) => set.contains(&event.event_type),
        None => true,
    }
}

fn earthquake_failure(event: &Event, eq: &EarthquakeThresholds) -> Option<&'static str> {
    if event.kind != HazardKind::Seismic {
        return None;
    }
    if let (Some(min), Some(mag)) = (eq.min_magnitude, event.magnitude()) {
        if mag < min {
            return Some("min_magnitude");
        }
    }
    // Unknown depth passes.
    if let (Some(max), Some(depth)) = (eq.max_depth_km, event.location.depth_km()) {
        if depth > max {
            return Some("max_depth_km");
        }
    }
    None
}

fn weather_failure(event: &Event, rules: &WeatherRules) -> Option<&'static str> {
    if event.kind != HazardKind::Weather {
        return None;
    }
    if !rules.include.is_empty() && !matches_any(&rules.include, &event.event_type) {
        return Some("include_events");
    }
    if matches_any(&rules.exclude, &event.event_type) {
        return Some("exclude_events");
    }
    if let (Some(min), Some(gust)) = (rules.min_wind_gust_mps, event.metrics.wind_gust_mps) {
        if gust < min {
            return Some("wind_gust_mps");
        }
    }
    None
}

fn matches_any(patterns: &[String], event_type: &str) -> bool {
    patterns.iter().any(|p| event_type.contains(p.as_str()))
}

/// Patterns are written as labels ("Flash Flood") but compared against
/// normalized event types ("flash_flood_warning").
fn normalized_patterns(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|p| normalize_event_type(p))
        .filter(|p| !p.is_empty())
        .collect()
}
