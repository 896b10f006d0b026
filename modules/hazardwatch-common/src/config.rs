use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::SeverityLevel;

pub const DEFAULT_CONFIG_PATH: &str = "config/hazardwatch.toml";
/// One week; the USGS query window is bounded so the start time stays representable.
const MAX_WINDOW_MINUTES: i64 = 7 * 24 * 60;
pub const DEFAULT_USER_AGENT: &str = "hazardwatch/0.1 (+https://example.invalid)";

/// TOML-backed configuration loaded from disk.
/// Secrets (webhook URLs) stay as env vars, see [`Secrets`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
    #[serde(default)]
    pub aoi: Option<AoiConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
    /// A lock older than this is assumed to belong to a killed run.
    pub stale_lock_secs: u64,
    pub run_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("data/state.json"),
            lock_file: PathBuf::from("data/hazardwatch.lock"),
            stale_lock_secs: 30 * 60,
            run_timeout_secs: 10 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub user_agent: String,
    pub usgs: UsgsConfig,
    pub nws: NwsConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            usgs: UsgsConfig::default(),
            nws: NwsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsgsConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Look-back window queried on every run.
    pub window_minutes: i64,
    /// Floor sent upstream; raised to the earthquake threshold when one is set.
    pub min_magnitude: f64,
    pub limit: u32,
    pub timeout_secs: u64,
    pub retries: u32,
}

impl Default for UsgsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://earthquake.usgs.gov/fdsnws/event/1/query".to_string(),
            window_minutes: 60,
            min_magnitude: 2.5,
            limit: 200,
            timeout_secs: 15,
            retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NwsConfig {
    pub enabled: bool,
    pub base_url: String,
    /// State/marine area codes passed as `area=`; empty means nationwide.
    pub areas: Vec<String>,
    pub timeout_secs: u64,
    pub retries: u32,
}

impl Default for NwsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.weather.gov/alerts/active".to_string(),
            areas: Vec::new(),
            timeout_secs: 15,
            retries: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub global: GlobalThresholds,
    pub earthquake: Option<EarthquakeThresholds>,
    pub weather: Option<WeatherThresholds>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalThresholds {
    /// "minor" | "moderate" | "severe" | "extreme"
    pub min_severity: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EarthquakeThresholds {
    pub min_magnitude: Option<f64>,
    pub max_depth_km: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherThresholds {
    pub include_events: Vec<String>,
    pub exclude_events: Vec<String>,
    pub wind_gust_mps: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FiltersConfig {
    /// Normalized event types to keep. Empty or absent means any type.
    pub allowed_event_types: Option<Vec<String>>,
}

/// Declarative area of interest. Coordinates are `[lon, lat]`, GeoJSON order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AoiConfig {
    Polygon {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<[f64; 2]>>>,
    },
    BoundingBox {
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
    },
    Zones {
        zones: Vec<String>,
    },
}

impl FileConfig {
    /// Range checks the serde layer cannot express. The AOI itself is
    /// validated when the filter engine compiles it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(raw) = &self.thresholds.global.min_severity {
            if SeverityLevel::parse(raw) == SeverityLevel::Unknown {
                return Err(ConfigError::Invalid(format!(
                    "thresholds.global.min_severity must be one of minor|moderate|severe|extreme, got {raw:?}"
                )));
            }
        }
        if let Some(eq) = &self.thresholds.earthquake {
            if let Some(m) = eq.min_magnitude {
                if !(0.0..=10.0).contains(&m) {
                    return Err(ConfigError::Invalid(format!(
                        "thresholds.earthquake.min_magnitude must be between 0 and 10, got {m}"
                    )));
                }
            }
            if let Some(d) = eq.max_depth_km {
                if !d.is_finite() || d <= 0.0 || d > 1000.0 {
                    return Err(ConfigError::Invalid(format!(
                        "thresholds.earthquake.max_depth_km must be in (0, 1000], got {d}"
                    )));
                }
            }
        }
        if let Some(w) = &self.thresholds.weather {
            if let Some(g) = w.wind_gust_mps {
                if !g.is_finite() || g < 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "thresholds.weather.wind_gust_mps must be a non-negative number, got {g}"
                    )));
                }
            }
        }
        let window = self.providers.usgs.window_minutes;
        if window <= 0 || window > MAX_WINDOW_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "providers.usgs.window_minutes must be in 1..={MAX_WINDOW_MINUTES}, got {window}"
            )));
        }
        if self.app.run_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "app.run_timeout_secs must be positive".to_string(),
            ));
        }
        // A live run must never look stale to the next one.
        if self.app.stale_lock_secs <= self.app.run_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "app.stale_lock_secs ({}) must be greater than app.run_timeout_secs ({})",
                self.app.stale_lock_secs, self.app.run_timeout_secs
            )));
        }
        Ok(())
    }

    /// Parsed global severity floor, if configured.
    pub fn min_severity(&self) -> Option<SeverityLevel> {
        self.thresholds
            .global
            .min_severity
            .as_deref()
            .map(SeverityLevel::parse)
    }
}

/// Load, parse and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&content).map_err(|e| match e {
        ConfigError::Parse { source, .. } => ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<FileConfig, ConfigError> {
    let config: FileConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: PathBuf::new(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Resolve the config path: explicit argument, then `HAZARDWATCH_CONFIG`, then the default.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("HAZARDWATCH_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Secrets and env-specific values. Never stored in the TOML file.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub slack_webhook_url: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let secrets = Self {
            slack_webhook_url: std::env::var("SLACK_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        };
        secrets.log_keys();
        secrets
    }

    pub fn redacted(&self) -> serde_json::Value {
        serde_json::json!({
            "SLACK_WEBHOOK_URL": preview_opt(&self.slack_webhook_url),
        })
    }

    fn log_keys(&self) {
        tracing::info!("Secrets loaded:");
        tracing::info!("  SLACK_WEBHOOK_URL: {}", preview_opt(&self.slack_webhook_url));
    }
}

fn preview_opt(val: &Option<String>) -> String {
    match val {
        Some(v) if !v.is_empty() => {
            let n = v.char_indices().nth(12).map(|(i, _)| i).unwrap_or(v.len());
            format!("{}...({} chars)", &v[..n], v.len())
        }
        _ => "<not set>".to_string(),
    }
}
