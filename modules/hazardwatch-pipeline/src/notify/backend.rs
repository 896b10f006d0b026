use async_trait::async_trait;

use hazardwatch_common::Digest;

/// Pluggable destination for a run's digest.
///
/// An `Err` means the hand-off did not happen; the run will not commit state
/// and the same events are retried next run.
#[async_trait]
pub trait DigestNotifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver a non-empty digest.
    async fn send_digest(&self, digest: &Digest) -> anyhow::Result<()>;
}
