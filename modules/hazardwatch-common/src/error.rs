use std::path::PathBuf;

use thiserror::Error;

/// A provider could not deliver its batch. Isolated to that provider.
#[derive(Error, Debug)]
pub enum ProviderFetchError {
    #[error("{provider}: request failed: {message}")]
    Network { provider: String, message: String },

    #[error("{provider}: HTTP {status}")]
    Status { provider: String, status: u16 },

    #[error("{provider}: credentials rejected (HTTP {status})")]
    Auth { provider: String, status: u16 },

    #[error("{provider}: rate limited")]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    #[error("{provider}: could not decode response: {message}")]
    Decode { provider: String, message: String },

    #[error("{provider}: timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },
}

impl ProviderFetchError {
    pub fn provider(&self) -> &str {
        match self {
            Self::Network { provider, .. }
            | Self::Status { provider, .. }
            | Self::Auth { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::Decode { provider, .. }
            | Self::Timeout { provider, .. } => provider,
        }
    }

    /// Transient conditions worth another attempt, now or next run.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::RateLimited { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Auth { .. } | Self::Decode { .. } => false,
        }
    }
}

/// A single raw item could not be mapped to an `Event`. The item is skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizationError {
    #[error("{provider} item {}: missing required field `{field}`", .external_id.as_deref().unwrap_or("<no id>"))]
    MissingField {
        provider: String,
        external_id: Option<String>,
        field: &'static str,
    },

    #[error("{provider} item {}: malformed `{field}`: {detail}", .external_id.as_deref().unwrap_or("<no id>"))]
    Malformed {
        provider: String,
        external_id: Option<String>,
        field: &'static str,
        detail: String,
    },
}

impl NormalizationError {
    pub fn provider(&self) -> &str {
        match self {
            Self::MissingField { provider, .. } | Self::Malformed { provider, .. } => provider,
        }
    }
}

/// The configured area of interest is unusable; filtering cannot be trusted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("polygon {polygon} ring {ring} has {distinct} distinct vertices, need at least 3")]
    TooFewVertices {
        polygon: usize,
        ring: usize,
        distinct: usize,
    },

    #[error("area of interest contains no polygons")]
    EmptyPolygonSet,

    #[error("coordinate out of range: lon={lon} lat={lat}")]
    OutOfRange { lon: f64, lat: f64 },

    #[error("bounding box latitude range is inverted: min_lat={min_lat} > max_lat={max_lat}")]
    InvertedLatitude { min_lat: f64, max_lat: f64 },

    #[error("zone area of interest lists no zones")]
    EmptyZoneList,
}

/// Dedup state is unavailable or cannot be trusted.
#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("state file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {} is corrupt: {detail}", .path.display())]
    Corrupt { path: PathBuf, detail: String },

    #[error("state file {} has unsupported version {version}", .path.display())]
    UnsupportedVersion { path: PathBuf, version: u32 },

    #[error("could not serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

/// The digest could not be handed to the notifier. State is not committed.
#[derive(Error, Debug)]
#[error("digest hand-off failed: {0:#}")]
pub struct DispatchError(#[source] pub anyhow::Error);

/// Invalid or unreadable configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
