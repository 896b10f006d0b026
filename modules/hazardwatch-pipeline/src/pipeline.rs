use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use hazardwatch_common::{
    ChangeKind, DigestEntry, DispatchError, Event, EventKey, FileConfig, ProviderFetchError,
};
use hazardwatch_providers::{ProviderAdapter, RawItem};

use crate::digest;
use crate::error::{PipelineError, Result};
use crate::filter::FilterEngine;
use crate::lock::RunLock;
use crate::notify::DigestNotifier;
use crate::state::StateStore;
use crate::types::{ProviderFailure, RunPhase, RunReport, SkippedItem};

/// Fetch → dedup → filter → digest → commit, once per call.
pub struct Pipeline {
    config: FileConfig,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    store: Box<dyn StateStore>,
    notifier: Box<dyn DigestNotifier>,
    lock_path: PathBuf,
    stale_lock_after: Duration,
    fetch_timeout: Option<Duration>,
}

impl Pipeline {
    pub fn new(
        config: FileConfig,
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        store: Box<dyn StateStore>,
        notifier: Box<dyn DigestNotifier>,
    ) -> Self {
        let lock_path = config.app.lock_file.clone();
        let stale_lock_after = Duration::from_secs(config.app.stale_lock_secs);
        Self {
            config,
            adapters,
            store,
            notifier,
            lock_path,
            stale_lock_after,
            fetch_timeout: None,
        }
    }

    /// Cap every provider fetch at `timeout` instead of the adapter's own budget.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Run once. Acquires the run lock, runs, and releases the lock when done
    /// or when this future is dropped.
    pub async fn run(&self) -> Result<RunReport> {
        let Some(_lock) = RunLock::acquire(&self.lock_path, self.stale_lock_after)? else {
            warn!(path = %self.lock_path.display(), "Another run holds the lock, exiting");
            return Err(PipelineError::LockConflict {
                path: self.lock_path.clone(),
            });
        };

        let run_id = Uuid::new_v4();
        self.run_inner(run_id)
            .instrument(info_span!("run", %run_id))
            .await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<RunReport> {
        let mut report = RunReport::new(run_id);

        // Validation happens before anything touches the network or state.
        let filters = FilterEngine::from_config(&self.config)?;
        let snapshot = self.store.load()?;
        info!(records = snapshot.len(), providers = self.adapters.len(), "Run starting");

        // Phase 1: fetch all providers concurrently
        enter(&mut report, RunPhase::Fetching);
        let results = join_all(self.adapters.iter().map(|a| self.fetch_one(a.as_ref()))).await;

        // Phase 2: normalize in provider order, collapse in-batch duplicates
        let mut latest: BTreeMap<EventKey, Event> = BTreeMap::new();
        for (adapter, result) in self.adapters.iter().zip(results) {
            let items = match result {
                Ok(items) => items,
                Err(e) => {
                    warn!(provider = adapter.id(), error = %e, retryable = e.is_retryable(), "Provider fetch failed");
                    report.provider_failures.push(ProviderFailure::from(&e));
                    continue;
                }
            };
            report.providers_ok.push(adapter.id().to_string());
            report.fetched += items.len() as u64;

            for raw in &items {
                match adapter.normalize(raw) {
                    Ok(event) => {
                        report.normalized += 1;
                        if keep_newest(&mut latest, event) {
                            report.duplicates_collapsed += 1;
                        }
                    }
                    Err(e) => {
                        warn!(provider = adapter.id(), error = %e, "Skipping malformed item");
                        report.skipped_items.push(SkippedItem::from(&e));
                    }
                }
            }
        }

        if !self.adapters.is_empty() && report.providers_ok.is_empty() {
            return Err(PipelineError::AllProvidersFailed {
                failures: report
                    .provider_failures
                    .iter()
                    .map(|f| f.error.clone())
                    .collect(),
            });
        }

        // Phase 3: classify against prior state
        enter(&mut report, RunPhase::Classifying);
        let mut to_commit: Vec<Event> = Vec::new();
        let mut candidates: Vec<DigestEntry> = Vec::new();
        for event in latest.into_values() {
            match snapshot.classify(&event) {
                ChangeKind::Unchanged => report.unchanged += 1,
                change_kind => {
                    match change_kind {
                        ChangeKind::New => report.new += 1,
                        _ => report.updated += 1,
                    }
                    to_commit.push(event.clone());
                    candidates.push(DigestEntry { event, change_kind });
                }
            }
        }

        // Phase 4: filter. Rejected events are still committed as seen.
        enter(&mut report, RunPhase::Filtering);
        let mut entries = Vec::with_capacity(candidates.len());
        for entry in candidates {
            match filters.first_failure(&entry.event) {
                None => entries.push(entry),
                Some(predicate) => {
                    debug!(
                        key = %entry.event.key(),
                        predicate,
                        "Filtered out"
                    );
                    report.filtered_out += 1;
                }
            }
        }
        report.digest = digest::build(entries, Utc::now());

        // Phase 5: hand off the digest
        if report.digest.is_empty() {
            info!("Nothing to report, skipping dispatch");
        } else {
            enter(&mut report, RunPhase::Dispatching);
            self.notifier
                .send_digest(&report.digest)
                .await
                .map_err(DispatchError)?;
            info!(
                notifier = self.notifier.name(),
                entries = report.digest.len(),
                "Digest dispatched"
            );
        }

        // Phase 6: commit
        if !to_commit.is_empty() {
            enter(&mut report, RunPhase::Committing);
            self.store.commit(&snapshot, &to_commit)?;
            report.committed = to_commit.len() as u64;
        }

        enter(&mut report, RunPhase::Idle);
        report.finished_at = Some(Utc::now());
        info!("Run complete. {report}");
        Ok(report)
    }

    async fn fetch_one(
        &self,
        adapter: &dyn ProviderAdapter,
    ) -> std::result::Result<Vec<RawItem>, ProviderFetchError> {
        let budget = self.fetch_timeout.unwrap_or_else(|| adapter.fetch_budget());
        match tokio::time::timeout(budget, adapter.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderFetchError::Timeout {
                provider: adapter.id().to_string(),
                secs: budget.as_secs(),
            }),
        }
    }
}

fn enter(report: &mut RunReport, phase: RunPhase) {
    debug!(%phase, "Entering phase");
    report.phases.push(phase);
}

/// Insert `event`, keeping whichever observation of its key is newest.
/// Returns true if a duplicate was collapsed.
fn keep_newest(latest: &mut BTreeMap<EventKey, Event>, event: Event) -> bool {
    match latest.entry(event.key()) {
        Entry::Vacant(slot) => {
            slot.insert(event);
            false
        }
        Entry::Occupied(mut slot) => {
            if event.updated_at >= slot.get().updated_at {
                slot.insert(event);
            }
            true
        }
    }
}
