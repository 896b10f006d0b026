use std::time::Duration;

use async_trait::async_trait;

use hazardwatch_common::{Event, NormalizationError, ProviderFetchError};

/// One undecoded item as the provider delivered it.
pub type RawItem = serde_json::Value;

/// Adapter boundary for an upstream hazard feed.
///
/// `fetch` may fail as a whole; `normalize` fails per item so one bad
/// record never costs the rest of the batch.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable identifier, used in event keys and state records.
    fn id(&self) -> &str;

    /// Retrieve the current batch. An empty batch is not an error.
    async fn fetch(&self) -> Result<Vec<RawItem>, ProviderFetchError>;

    /// Map one raw item to a normalized [`Event`]. Pure.
    fn normalize(&self, raw: &RawItem) -> Result<Event, NormalizationError>;

    /// Upper bound the orchestrator allows `fetch` before giving up on it.
    fn fetch_budget(&self) -> Duration {
        Duration::from_secs(60)
    }
}

/// Pull a string id out of a raw item for error reporting.
pub(crate) fn raw_id(raw: &RawItem) -> Option<String> {
    raw.get("id").and_then(|v| match v {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
