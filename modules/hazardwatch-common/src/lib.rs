pub mod config;
pub mod error;
pub mod geometry;
pub mod types;

pub use config::{load_config, resolve_config_path, AoiConfig, FileConfig, Secrets};
pub use error::{
    ConfigError, DispatchError, GeometryError, NormalizationError, ProviderFetchError,
    StateStoreError,
};
pub use geometry::{contains, Aoi};
pub use types::*;
