use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use hazardwatch_common::{Digest, NormalizationError, ProviderFetchError};

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Fetching,
    Classifying,
    Filtering,
    Dispatching,
    Committing,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Fetching => write!(f, "fetching"),
            Self::Classifying => write!(f, "classifying"),
            Self::Filtering => write!(f, "filtering"),
            Self::Dispatching => write!(f, "dispatching"),
            Self::Committing => write!(f, "committing"),
        }
    }
}

/// A provider whose batch was lost this run.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: String,
    pub retryable: bool,
}

impl From<&ProviderFetchError> for ProviderFailure {
    fn from(e: &ProviderFetchError) -> Self {
        Self {
            provider: e.provider().to_string(),
            error: e.to_string(),
            retryable: e.is_retryable(),
        }
    }
}

/// A raw item that was skipped during normalization.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedItem {
    pub provider: String,
    pub error: String,
}

impl From<&NormalizationError> for SkippedItem {
    fn from(e: &NormalizationError) -> Self {
        Self {
            provider: e.provider().to_string(),
            error: e.to_string(),
        }
    }
}

/// Outcome of one successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Phases entered, in order.
    pub phases: Vec<RunPhase>,
    pub providers_ok: Vec<String>,
    pub provider_failures: Vec<ProviderFailure>,
    pub skipped_items: Vec<SkippedItem>,
    pub fetched: u64,
    pub normalized: u64,
    pub duplicates_collapsed: u64,
    pub new: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub filtered_out: u64,
    pub committed: u64,
    pub digest: Digest,
}

impl RunReport {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            phases: Vec::new(),
            providers_ok: Vec::new(),
            provider_failures: Vec::new(),
            skipped_items: Vec::new(),
            fetched: 0,
            normalized: 0,
            duplicates_collapsed: 0,
            new: 0,
            updated: 0,
            unchanged: 0,
            filtered_out: 0,
            committed: 0,
            digest: Digest::default(),
        }
    }

    pub fn dispatched(&self) -> usize {
        self.digest.len()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "providers_ok={} providers_failed={} fetched={} normalized={} skipped={} duplicates={} new={} updated={} unchanged={} filtered_out={} dispatched={} committed={}",
            self.providers_ok.len(),
            self.provider_failures.len(),
            self.fetched,
            self.normalized,
            self.skipped_items.len(),
            self.duplicates_collapsed,
            self.new,
            self.updated,
            self.unchanged,
            self.filtered_out,
            self.dispatched(),
            self.committed,
        )
    }
}
