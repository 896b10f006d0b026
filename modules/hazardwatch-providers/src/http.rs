// Shared JSON-over-HTTP fetch for provider adapters.
// Small bounded retry with exponential backoff; 429 honours Retry-After.

use std::time::Duration;

use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::{debug, warn};

use hazardwatch_common::ProviderFetchError;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

pub struct HttpFetcher {
    provider: &'static str,
    client: reqwest::Client,
    timeout: Duration,
    retries: u32,
    backoff_base: Duration,
    retry_after_cap: Duration,
}

impl HttpFetcher {
    pub fn new(
        provider: &'static str,
        user_agent: &str,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self, ProviderFetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| ProviderFetchError::Network {
                provider: provider.to_string(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            provider,
            client,
            timeout,
            retries,
            backoff_base: BACKOFF_BASE,
            retry_after_cap: MAX_RETRY_AFTER,
        })
    }

    /// Override the retry pacing. Tests use millisecond delays.
    pub fn with_backoff(mut self, base: Duration, retry_after_cap: Duration) -> Self {
        self.backoff_base = base;
        self.retry_after_cap = retry_after_cap;
        self
    }

    /// Longest a `get_json` call can take when every attempt times out.
    pub fn worst_case(&self) -> Duration {
        let attempts = self.retries + 1;
        let backoff: Duration = (1..=self.retries)
            .map(|a| backoff_delay(self.backoff_base, a))
            .sum();
        self.timeout * attempts + backoff
    }

    /// GET a JSON document. `Ok(None)` means 304 Not Modified.
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Option<serde_json::Value>, ProviderFetchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.try_once(url, query).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt <= self.retries => {
                    let delay = match &e {
                        ProviderFetchError::RateLimited {
                            retry_after_secs: Some(secs),
                            ..
                        } => Duration::from_secs(*secs).min(self.retry_after_cap),
                        _ => backoff_delay(self.backoff_base, attempt),
                    };
                    warn!(
                        provider = self.provider,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_once(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Option<serde_json::Value>, ProviderFetchError> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .header(ACCEPT, "application/geo+json, application/json")
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(err) = classify_status(self.provider, status, retry_after.as_deref()) {
            return Err(err);
        }
        if status == StatusCode::NOT_MODIFIED {
            debug!(provider = self.provider, url, "304 Not Modified");
            return Ok(None);
        }

        let body = resp
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ProviderFetchError::Decode {
                provider: self.provider.to_string(),
                message: e.to_string(),
            })?;
        Ok(Some(body))
    }

    fn transport_error(&self, e: reqwest::Error) -> ProviderFetchError {
        if e.is_timeout() {
            ProviderFetchError::Timeout {
                provider: self.provider.to_string(),
                secs: self.timeout.as_secs(),
            }
        } else {
            ProviderFetchError::Network {
                provider: self.provider.to_string(),
                message: e.to_string(),
            }
        }
    }
}

/// Map a non-success status to the fetch error taxonomy. `None` for 2xx and 304.
pub(crate) fn classify_status(
    provider: &str,
    status: StatusCode,
    retry_after: Option<&str>,
) -> Option<ProviderFetchError> {
    if status.is_success() || status == StatusCode::NOT_MODIFIED {
        return None;
    }
    let provider = provider.to_string();
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderFetchError::Auth {
            provider,
            status: status.as_u16(),
        },
        StatusCode::TOO_MANY_REQUESTS => ProviderFetchError::RateLimited {
            provider,
            retry_after_secs: retry_after.and_then(|v| v.trim().parse().ok()),
        },
        _ => ProviderFetchError::Status {
            provider,
            status: status.as_u16(),
        },
    })
}

pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

/// Pull the `features` array out of a GeoJSON FeatureCollection.
pub(crate) fn features(
    provider: &str,
    body: serde_json::Value,
) -> Result<Vec<serde_json::Value>, ProviderFetchError> {
    match body {
        serde_json::Value::Object(mut map) => match map.remove("features") {
            Some(serde_json::Value::Array(items)) => Ok(items),
            Some(serde_json::Value::Null) | None => Ok(Vec::new()),
            Some(other) => Err(ProviderFetchError::Decode {
                provider: provider.to_string(),
                message: format!("`features` is not an array: {other}"),
            }),
        },
        other => Err(ProviderFetchError::Decode {
            provider: provider.to_string(),
            message: format!("expected a GeoJSON object, got {}", type_name(&other)),
        }),
    }
}

fn type_name(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
