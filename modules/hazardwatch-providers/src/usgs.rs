// USGS earthquake feed (FDSN event service, GeoJSON output).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use hazardwatch_common::config::UsgsConfig;
use hazardwatch_common::{
    normalize_event_type, Event, EventMetrics, HazardKind, Location, NormalizationError,
    ProviderFetchError, SeverityLevel,
};

use crate::adapter::{raw_id, ProviderAdapter, RawItem};
use crate::http::{features, HttpFetcher};

pub const PROVIDER_ID: &str = "usgs";

pub struct UsgsAdapter {
    http: HttpFetcher,
    base_url: String,
    window: chrono::Duration,
    min_magnitude: f64,
    limit: u32,
}

impl UsgsAdapter {
    /// `magnitude_floor` is the configured earthquake threshold, if any. The
    /// upstream query never asks for less than it.
    pub fn new(
        config: &UsgsConfig,
        user_agent: &str,
        magnitude_floor: Option<f64>,
    ) -> Result<Self, ProviderFetchError> {
        let http = HttpFetcher::new(
            PROVIDER_ID,
            user_agent,
            Duration::from_secs(config.timeout_secs),
            config.retries,
        )?;
        let min_magnitude = match magnitude_floor {
            Some(floor) => config.min_magnitude.max(floor),
            None => config.min_magnitude,
        };
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            window: chrono::Duration::minutes(config.window_minutes),
            min_magnitude,
            limit: config.limit,
        })
    }

    fn query(&self, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
        let start = now - self.window;
        vec![
            ("format", "geojson".to_string()),
            ("orderby", "time".to_string()),
            ("starttime", start.format("%Y-%m-%dT%H:%M:%S").to_string()),
            ("endtime", now.format("%Y-%m-%dT%H:%M:%S").to_string()),
            ("minmagnitude", format!("{:.1}", self.min_magnitude)),
            ("limit", self.limit.to_string()),
        ]
    }
}

#[async_trait]
impl ProviderAdapter for UsgsAdapter {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    async fn fetch(&self) -> Result<Vec<RawItem>, ProviderFetchError> {
        let query = self.query(Utc::now());
        let Some(body) = self.http.get_json(&self.base_url, &query).await? else {
            return Ok(Vec::new());
        };
        let items = features(PROVIDER_ID, body)?;
        info!(provider = PROVIDER_ID, count = items.len(), "Fetched earthquakes");
        Ok(items)
    }

    fn normalize(&self, raw: &RawItem) -> Result<Event, NormalizationError> {
        normalize_feature(raw)
    }

    fn fetch_budget(&self) -> Duration {
        self.http.worst_case() + Duration::from_secs(5)
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Feature {
    id: Option<String>,
    properties: Option<Properties>,
    geometry: Option<PointGeometry>,
}

#[derive(Deserialize)]
struct Properties {
    mag: Option<f64>,
    place: Option<String>,
    time: Option<i64>,
    updated: Option<i64>,
    url: Option<String>,
    title: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    alert: Option<String>,
    tsunami: Option<i64>,
}

#[derive(Deserialize)]
struct PointGeometry {
    coordinates: Vec<Option<f64>>,
}

/// Magnitude buckets onto the shared severity scale.
pub fn severity_for_magnitude(mag: f64) -> SeverityLevel {
    if mag < 4.0 {
        SeverityLevel::Minor
    } else if mag < 5.0 {
        SeverityLevel::Moderate
    } else if mag < 6.5 {
        SeverityLevel::Severe
    } else {
        SeverityLevel::Extreme
    }
}

pub(crate) fn normalize_feature(raw: &RawItem) -> Result<Event, NormalizationError> {
    let external_id = raw_id(raw);
    let missing = |field: &'static str| NormalizationError::MissingField {
        provider: PROVIDER_ID.to_string(),
        external_id: external_id.clone(),
        field,
    };
    let malformed = |field: &'static str, detail: String| NormalizationError::Malformed {
        provider: PROVIDER_ID.to_string(),
        external_id: external_id.clone(),
        field,
        detail,
    };

    let feature: Feature = serde_json::from_value(raw.clone())
        .map_err(|e| malformed("feature", e.to_string()))?;

    let id = feature
        .id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing("id"))?;
    let props = feature.properties.ok_or_else(|| missing("properties"))?;

    let mag = props.mag.ok_or_else(|| missing("properties.mag"))?;
    if !mag.is_finite() {
        return Err(malformed("properties.mag", format!("{mag}")));
    }

    let time_ms = props.time.ok_or_else(|| missing("properties.time"))?;
    let occurred_at = DateTime::from_timestamp_millis(time_ms)
        .ok_or_else(|| malformed("properties.time", format!("{time_ms} out of range")))?;
    let updated_ms = props.updated.unwrap_or(time_ms);
    let updated_at = DateTime::from_timestamp_millis(updated_ms)
        .ok_or_else(|| malformed("properties.updated", format!("{updated_ms} out of range")))?;

    let coords = feature
        .geometry
        .map(|g| g.coordinates)
        .ok_or_else(|| missing("geometry"))?;
    let (lon, lat) = match (coords.first().copied().flatten(), coords.get(1).copied().flatten()) {
        (Some(lon), Some(lat)) => (lon, lat),
        _ => return Err(malformed("geometry.coordinates", format!("{coords:?}"))),
    };
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(malformed(
            "geometry.coordinates",
            format!("lon={lon} lat={lat} out of range"),
        ));
    }
    let depth_km = coords.get(2).copied().flatten();

    let place = props.place.unwrap_or_default();
    let title = props
        .title
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("M {mag:.1} - {place}"));

    let mut summary_parts = Vec::new();
    if !place.is_empty() {
        summary_parts.push(place.clone());
    }
    if let Some(alert) = props.alert.as_deref().filter(|a| !a.is_empty()) {
        summary_parts.push(format!("PAGER alert: {alert}"));
    }
    if props.tsunami.unwrap_or(0) != 0 {
        summary_parts.push("tsunami flag set".to_string());
    }

    let event_type = props
        .event_type
        .as_deref()
        .map(normalize_event_type)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "earthquake".to_string());

    Ok(Event {
        provider_id: PROVIDER_ID.to_string(),
        external_id: id,
        version_key: updated_ms.to_string(),
        kind: HazardKind::Seismic,
        event_type,
        severity_value: mag,
        severity_level: severity_for_magnitude(mag),
        occurred_at,
        updated_at,
        expires_at: None,
        location: Location::Point { lat, lon, depth_km },
        metrics: EventMetrics::default(),
        title,
        summary: summary_parts.join("; "),
        link: props.url.filter(|u| !u.is_empty()),
    })
}
