use std::path::PathBuf;

use thiserror::Error;

use hazardwatch_common::{ConfigError, DispatchError, GeometryError, StateStoreError};

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Run-level failures. Per-provider and per-item errors never surface here;
/// they are aggregated into the [`RunReport`](crate::types::RunReport).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("another run holds the lock at {}", .path.display())]
    LockConflict { path: PathBuf },

    #[error("could not manage run lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid area of interest: {0}")]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    StateStore(#[from] StateStoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("all {} enabled providers failed: {}", .failures.len(), .failures.join("; "))]
    AllProvidersFailed { failures: Vec<String> },

    #[error("run exceeded {secs}s and was abandoned before commit")]
    RunTimeout { secs: u64 },

    #[error("run interrupted before commit")]
    Interrupted,
}

impl PipelineError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::LockConflict { .. } => 0,
            Self::Config(_) | Self::Geometry(_) => 1,
            Self::Lock { .. }
            | Self::StateStore(_)
            | Self::Dispatch(_)
            | Self::AllProvidersFailed { .. }
            | Self::RunTimeout { .. }
            | Self::Interrupted => 2,
        }
    }
}
