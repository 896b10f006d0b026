use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// --- Geometry primitives ---

/// A `[lon, lat]` pair, GeoJSON axis order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lon: f64,
    pub lat: f64,
}

impl Coord {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// A polygon as an outer ring followed by zero or more holes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<Coord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub holes: Vec<Vec<Coord>>,
}

impl Polygon {
    pub fn new(exterior: Vec<Coord>) -> Self {
        Self {
            exterior,
            holes: Vec::new(),
        }
    }

    pub fn with_holes(exterior: Vec<Coord>, holes: Vec<Vec<Coord>>) -> Self {
        Self { exterior, holes }
    }
}

/// Where an event happened, as reported by its provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Location {
    /// Epicentre or single coordinate.
    Point {
        lat: f64,
        lon: f64,
        depth_km: Option<f64>,
    },
    /// Alert area: drawn polygons, forecast/county zone ids, or both.
    Area {
        #[serde(default)]
        polygons: Vec<Polygon>,
        #[serde(default)]
        zones: Vec<String>,
    },
    /// Provider gave nothing usable.
    Unresolved,
}

impl Location {
    pub fn point(lat: f64, lon: f64) -> Self {
        Self::Point {
            lat,
            lon,
            depth_km: None,
        }
    }

    pub fn zones<I, S>(zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Area {
            polygons: Vec::new(),
            zones: zones.into_iter().map(Into::into).collect(),
        }
    }

    pub fn depth_km(&self) -> Option<f64> {
        match self {
            Self::Point { depth_km, .. } => *depth_km,
            _ => None,
        }
    }
}

// --- Enums ---

/// Which family of thresholds applies to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardKind {
    Seismic,
    Weather,
}

impl fmt::Display for HazardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seismic => write!(f, "seismic"),
            Self::Weather => write!(f, "weather"),
        }
    }
}

/// Ordinal severity shared by every provider.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    #[default]
    Unknown,
    Minor,
    Moderate,
    Severe,
    Extreme,
}

impl SeverityLevel {
    /// Lenient parse of provider/config text. Unrecognised input is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "minor" => Self::Minor,
            "moderate" => Self::Moderate,
            "severe" => Self::Severe,
            "extreme" => Self::Extreme,
            _ => Self::Unknown,
        }
    }

    pub fn rank(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Minor => write!(f, "minor"),
            Self::Moderate => write!(f, "moderate"),
            Self::Severe => write!(f, "severe"),
            Self::Extreme => write!(f, "extreme"),
        }
    }
}

/// Classification of an observation against persisted dedup state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    New,
    Updated,
    Unchanged,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Updated => write!(f, "updated"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

// --- Event ---

/// Identity of one real-world phenomenon across the system's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub provider_id: String,
    pub external_id: String,
}

impl EventKey {
    pub fn new(provider_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            external_id: external_id.into(),
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider_id, self.external_id)
    }
}

/// Optional numeric observations some providers attach.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetrics {
    pub wind_gust_mps: Option<f64>,
}

/// A hazard event normalized from any provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub provider_id: String,
    pub external_id: String,
    /// Changes whenever the provider republishes with different data.
    pub version_key: String,
    pub kind: HazardKind,
    pub event_type: String,
    /// Magnitude for seismic events, severity ordinal for weather alerts.
    pub severity_value: f64,
    pub severity_level: SeverityLevel,
    pub occurred_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub location: Location,
    #[serde(default)]
    pub metrics: EventMetrics,
    pub title: String,
    pub summary: String,
    pub link: Option<String>,
}

impl Event {
    pub fn key(&self) -> EventKey {
        EventKey::new(self.provider_id.clone(), self.external_id.clone())
    }

    /// Magnitude, when this is a seismic event.
    pub fn magnitude(&self) -> Option<f64> {
        match self.kind {
            HazardKind::Seismic => Some(self.severity_value),
            HazardKind::Weather => None,
        }
    }
}

/// Normalize a free-text hazard label into a snake_case event type.
/// `"Flash Flood Warning"` → `"flash_flood_warning"`.
pub fn normalize_event_type(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

// --- Digest ---

/// One line of the digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestEntry {
    pub event: Event,
    pub change_kind: ChangeKind,
}

/// The single ordered output of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Digest {
    pub generated_at: Option<DateTime<Utc>>,
    pub entries: Vec<DigestEntry>,
}

impl Digest {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.entries.iter().filter(|e| e.change_kind == kind).count()
    }
}
