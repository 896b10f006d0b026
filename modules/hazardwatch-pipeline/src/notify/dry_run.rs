use async_trait::async_trait;
use tracing::info;

use hazardwatch_common::Digest;

use super::backend::DigestNotifier;
use crate::digest::render_text;

/// Logs a text preview instead of delivering.
pub struct DryRunNotifier;

#[async_trait]
impl DigestNotifier for DryRunNotifier {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn send_digest(&self, digest: &Digest) -> anyhow::Result<()> {
        let text = render_text(digest);
        info!(entries = digest.len(), subject = %text.subject, "Digest preview (not sent)");
        for line in text.body.lines() {
            info!("  {line}");
        }
        Ok(())
    }
}
