use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use hazardwatch_common::{ChangeKind, Digest, DigestEntry, SeverityLevel};

use super::backend::DigestNotifier;
use crate::digest::render_text;

/// Entries beyond this are summarized as a count to keep the message postable.
const MAX_ENTRIES: usize = 50;

/// Slack-compatible incoming webhook.
pub struct SlackWebhook {
    webhook_url: String,
    http: reqwest::Client,
}

impl SlackWebhook {
    pub fn new(webhook_url: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self { webhook_url, http })
    }

    fn severity_emoji(severity: SeverityLevel) -> &'static str {
        match severity {
            SeverityLevel::Extreme => ":rotating_light:",
            SeverityLevel::Severe => ":warning:",
            _ => ":information_source:",
        }
    }

    fn entry_line(entry: &DigestEntry) -> String {
        let e = &entry.event;
        let label = match entry.change_kind {
            ChangeKind::Updated => " _(updated)_",
            _ => "",
        };
        let title = match &e.link {
            Some(link) => format!("<{link}|{}>", e.title),
            None => e.title.clone(),
        };
        let mut line = format!(
            "{} *{}*{label} {title}",
            Self::severity_emoji(e.severity_level),
            e.event_type,
        );
        if !e.summary.is_empty() {
            line.push_str(&format!("\n      {}", e.summary));
        }
        line
    }

    pub(crate) fn payload(digest: &Digest) -> serde_json::Value {
        let subject = render_text(digest).subject;
        let mut lines = vec![format!("*{subject}*")];
        lines.extend(digest.entries.iter().take(MAX_ENTRIES).map(Self::entry_line));
        if digest.len() > MAX_ENTRIES {
            lines.push(format!("_…and {} more_", digest.len() - MAX_ENTRIES));
        }
        json!({
            "text": lines.join("\n"),
            "unfurl_links": false,
        })
    }

    async fn post(&self, payload: serde_json::Value) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .context("Webhook request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Webhook returned non-success");
            anyhow::bail!("Webhook returned {status}");
        }

        Ok(())
    }
}

#[async_trait]
impl DigestNotifier for SlackWebhook {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn send_digest(&self, digest: &Digest) -> anyhow::Result<()> {
        self.post(Self::payload(digest)).await?;
        info!(entries = digest.len(), "Digest posted to webhook");
        Ok(())
    }
}
