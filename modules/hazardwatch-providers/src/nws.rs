// National Weather Service active alerts (api.weather.gov, CAP as GeoJSON).

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::info;

use hazardwatch_common::config::NwsConfig;
use hazardwatch_common::{
    normalize_event_type, Coord, Event, EventMetrics, HazardKind, Location, NormalizationError,
    Polygon, ProviderFetchError, SeverityLevel,
};

use crate::adapter::{raw_id, ProviderAdapter, RawItem};
use crate::http::{features, HttpFetcher};

pub const PROVIDER_ID: &str = "nws";

const MPH_TO_MPS: f64 = 0.44704;
const KT_TO_MPS: f64 = 0.514_444;
const KMH_TO_MPS: f64 = 1.0 / 3.6;

pub struct NwsAdapter {
    http: HttpFetcher,
    base_url: String,
    areas: Vec<String>,
}

impl NwsAdapter {
    pub fn new(config: &NwsConfig, user_agent: &str) -> Result<Self, ProviderFetchError> {
        let http = HttpFetcher::new(
            PROVIDER_ID,
            user_agent,
            Duration::from_secs(config.timeout_secs),
            config.retries,
        )?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            areas: config
                .areas
                .iter()
                .map(|a| a.trim().to_ascii_uppercase())
                .filter(|a| !a.is_empty())
                .collect(),
        })
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![("status", "actual".to_string())];
        query.extend(self.areas.iter().map(|a| ("area", a.clone())));
        query
    }
}

#[async_trait]
impl ProviderAdapter for NwsAdapter {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    async fn fetch(&self) -> Result<Vec<RawItem>, ProviderFetchError> {
        let Some(body) = self.http.get_json(&self.base_url, &self.query()).await? else {
            return Ok(Vec::new());
        };
        let items = features(PROVIDER_ID, body)?;
        info!(provider = PROVIDER_ID, count = items.len(), "Fetched active alerts");
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
    geometry: Option<Geometry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Properties {
    #[serde(rename = "@id")]
    at_id: Option<String>,
    id: Option<String>,
    area_desc: Option<String>,
    geocode: Option<Geocode>,
    #[serde(default)]
    affected_zones: Vec<String>,
    sent: Option<String>,
    effective: Option<String>,
    onset: Option<String>,
    expires: Option<String>,
    ends: Option<String>,
    message_type: Option<String>,
    severity: Option<String>,
    certainty: Option<String>,
    urgency: Option<String>,
    event: Option<String>,
    headline: Option<String>,
    description: Option<String>,
    instruction: Option<String>,
    #[serde(default)]
    parameters: HashMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct Geocode {
    #[serde(rename = "UGC", default)]
    ugc: Vec<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    Polygon {
        coordinates: Vec<Vec<Vec<f64>>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<Vec<f64>>>>,
    },
    Point {
        coordinates: Vec<f64>,
    },
    #[serde(other)]
    Other,
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
    let timestamp = |field: &'static str, value: &str| -> Result<DateTime<Utc>, NormalizationError> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| malformed(field, format!("{value:?}: {e}")))
    };

    let feature: Feature = serde_json::from_value(raw.clone())
        .map_err(|e| malformed("feature", e.to_string()))?;
    let props = feature.properties.ok_or_else(|| missing("properties"))?;

    let id = feature
        .id
        .or_else(|| props.id.clone())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing("id"))?;

    let event_label = props
        .event
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| missing("properties.event"))?;
    let event_type = normalize_event_type(event_label);

    let updated_raw = props
        .sent
        .as_deref()
        .or(props.effective.as_deref())
        .ok_or_else(|| missing("properties.sent"))?;
    let updated_at = timestamp("properties.sent", updated_raw)?;

    let occurred_at = match props.onset.as_deref().or(props.effective.as_deref()) {
        Some(raw) => timestamp("properties.onset", raw)?,
        None => updated_at,
    };
    let expires_at = match props.ends.as_deref().or(props.expires.as_deref()) {
        Some(raw) => Some(timestamp("properties.ends", raw)?),
        None => None,
    };

    let severity_level = props
        .severity
        .as_deref()
        .map(SeverityLevel::parse)
        .unwrap_or_default();

    let location = build_location(feature.geometry, &props)
        .map_err(|detail| malformed("geometry", detail))?;

    let wind_gust_mps = props
        .parameters
        .get("maxWindGust")
        .and_then(first_text)
        .and_then(|s| parse_speed_mps(&s));

    let title = props
        .headline
        .clone()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| event_label.to_string());

    Ok(Event {
        provider_id: PROVIDER_ID.to_string(),
        external_id: id,
        version_key: content_hash(&props),
        kind: HazardKind::Weather,
        event_type,
        severity_value: f64::from(severity_level.rank()),
        severity_level,
        occurred_at,
        updated_at,
        expires_at,
        location,
        metrics: EventMetrics { wind_gust_mps },
        title,
        summary: props.area_desc.clone().unwrap_or_default(),
        link: props.at_id.clone().filter(|l| !l.is_empty()),
    })
}

/// Truncated SHA-256 over the fields that make a republished alert different.
fn content_hash(props: &Properties) -> String {
    let fields = [
        &props.sent,
        &props.effective,
        &props.onset,
        &props.expires,
        &props.ends,
        &props.message_type,
        &props.severity,
        &props.urgency,
        &props.certainty,
        &props.headline,
        &props.description,
        &props.instruction,
        &props.area_desc,
    ];
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.as_deref().unwrap_or("").as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(&hasher.finalize()[..8])
}

fn build_location(geometry: Option<Geometry>, props: &Properties) -> Result<Location, String> {
    let polygons = match geometry {
        Some(Geometry::Point { coordinates }) => {
            return match coordinates.as_slice() {
                [lon, lat, ..] => Ok(Location::point(*lat, *lon)),
                _ => Err(format!("point has {} coordinates", coordinates.len())),
            };
        }
        Some(Geometry::Polygon { coordinates }) => vec![to_polygon(coordinates)?],
        Some(Geometry::MultiPolygon { coordinates }) => coordinates
            .into_iter()
            .map(to_polygon)
            .collect::<Result<Vec<_>, _>>()?,
        Some(Geometry::Other) | None => Vec::new(),
    };

    let zones: BTreeSet<String> = props
        .geocode
        .iter()
        .flat_map(|g| g.ugc.iter().cloned())
        .chain(props.affected_zones.iter().filter_map(|url| zone_from_url(url)))
        .map(|z| z.trim().to_ascii_uppercase())
        .filter(|z| !z.is_empty())
        .collect();

    if polygons.is_empty() && zones.is_empty() {
        return Ok(Location::Unresolved);
    }
    Ok(Location::Area {
        polygons,
        zones: zones.into_iter().collect(),
    })
}

fn to_polygon(rings: Vec<Vec<Vec<f64>>>) -> Result<Polygon, String> {
    let mut rings = rings.into_iter().map(to_ring);
    let exterior = rings.next().ok_or("polygon has no rings")??;
    let holes = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::with_holes(exterior, holes))
}

fn to_ring(ring: Vec<Vec<f64>>) -> Result<Vec<Coord>, String> {
    ring.into_iter()
        .map(|pos| match pos.as_slice() {
            [lon, lat, ..] => Ok(Coord::new(*lon, *lat)),
            _ => Err(format!("position has {} values", pos.len())),
        })
        .collect()
}

/// `https://api.weather.gov/zones/forecast/CAZ041` → `CAZ041`
fn zone_from_url(url: &str) -> Option<String> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// CAP parameters are arrays of strings; take the first.
fn first_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Array(items) => items.first().and_then(first_text),
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a speed like `"60 MPH"`, `"45 KT"`, `"20 m/s"` into metres per second.
/// A bare number or unknown unit yields `None`.
pub fn parse_speed_mps(text: &str) -> Option<f64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number.parse().ok()?;
    let factor = match unit.trim().to_ascii_lowercase().as_str() {
        "mph" => MPH_TO_MPS,
        "kt" | "kts" | "knots" => KT_TO_MPS,
        "m/s" | "mps" => 1.0,
        "km/h" | "kph" => KMH_TO_MPS,
        _ => return None,
    };
    Some(value * factor)
}
