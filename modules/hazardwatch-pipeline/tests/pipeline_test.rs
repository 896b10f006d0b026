use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::json;

use hazardwatch_common::config::{AoiConfig, EarthquakeThresholds};
use hazardwatch_common::{
    ChangeKind, Digest, Event, EventMetrics, FileConfig, HazardKind, Location, NormalizationError,
    ProviderFetchError, SeverityLevel,
};
use hazardwatch_pipeline::lock::RunLock;
use hazardwatch_pipeline::notify::{DigestNotifier, NoopNotifier};
use hazardwatch_pipeline::{JsonFileStore, Pipeline, PipelineError, RunPhase, StateStore};
use hazardwatch_providers::{ProviderAdapter, RawItem};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
}

fn quake(provider: &str, id: &str, version: &str, mag: f64, occurred_at: DateTime<Utc>) -> Event {
    Event {
        provider_id: provider.into(),
        external_id: id.into(),
        version_key: version.into(),
        kind: HazardKind::Seismic,
        event_type: "earthquake".into(),
        severity_value: mag,
        severity_level: SeverityLevel::Severe,
        occurred_at,
        updated_at: occurred_at,
        expires_at: None,
        location: Location::Point {
            lat: 35.0,
            lon: -118.0,
            depth_km: Some(10.0),
        },
        metrics: EventMetrics::default(),
        title: format!("M {mag} - {id}"),
        summary: String::new(),
        link: None,
    }
}

/// Serves a fixed batch; normalizes by deserializing the serialized `Event`.
struct StaticAdapter {
    id: String,
    raw: Vec<RawItem>,
    fetches: Arc<AtomicUsize>,
}

impl StaticAdapter {
    fn new(id: &str, events: &[Event]) -> Self {
        Self {
            id: id.to_string(),
            raw: events
                .iter()
                .map(|e| serde_json::to_value(e).unwrap())
                .collect(),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_raw(mut self, raw: RawItem) -> Self {
        self.raw.push(raw);
        self
    }
}

#[async_trait]
impl ProviderAdapter for StaticAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self) -> Result<Vec<RawItem>, ProviderFetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.raw.clone())
    }

    fn normalize(&self, raw: &RawItem) -> Result<Event, NormalizationError> {
        serde_json::from_value(raw.clone()).map_err(|e| NormalizationError::Malformed {
            provider: self.id.clone(),
            external_id: None,
            field: "event",
            detail: e.to_string(),
        })
    }
}

/// Never answers in time.
struct SlowAdapter(&'static str);

#[async_trait]
impl ProviderAdapter for SlowAdapter {
    fn id(&self) -> &str {
        self.0
    }

    async fn fetch(&self) -> Result<Vec<RawItem>, ProviderFetchError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }

    fn normalize(&self, _raw: &RawItem) -> Result<Event, NormalizationError> {
        unreachable!("slow adapter never yields items")
    }
}

/// Fails every fetch with a 503.
struct DownAdapter(&'static str);

#[async_trait]
impl ProviderAdapter for DownAdapter {
    fn id(&self) -> &str {
        self.0
    }

    async fn fetch(&self) -> Result<Vec<RawItem>, ProviderFetchError> {
        Err(ProviderFetchError::Status {
            provider: self.0.to_string(),
            status: 503,
        })
    }

    fn normalize(&self, _raw: &RawItem) -> Result<Event, NormalizationError> {
        unreachable!("down adapter never yields items")
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Digest>>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<Digest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DigestNotifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send_digest(&self, digest: &Digest) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(digest.clone());
        Ok(())
    }
}

struct FailingNotifier;

#[async_trait]
impl DigestNotifier for FailingNotifier {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn send_digest(&self, _digest: &Digest) -> anyhow::Result<()> {
        anyhow::bail!("webhook returned 500 Internal Server Error")
    }
}

fn config_in(dir: &Path) -> FileConfig {
    let mut config = FileConfig::default();
    config.app.state_file = dir.join("state.json");
    config.app.lock_file = dir.join("hazardwatch.lock");
    config
}

fn pipeline(
    config: &FileConfig,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    notifier: impl DigestNotifier + 'static,
) -> Pipeline {
    Pipeline::new(
        config.clone(),
        adapters,
        Box::new(JsonFileStore::new(&config.app.state_file)),
        Box::new(notifier),
    )
    .with_fetch_timeout(Duration::from_millis(200))
}

fn stored_keys(config: &FileConfig) -> Vec<String> {
    JsonFileStore::new(&config.app.state_file)
        .load()
        .unwrap()
        .iter()
        .map(|(k, _)| k.to_string())
        .collect()
}

fn ids(digest: &Digest) -> Vec<&str> {
    digest
        .entries
        .iter()
        .map(|e| e.event.external_id.as_str())
        .collect()
}

// ---------------------------------------------------------------------------
// Dedup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_run_with_same_input_reports_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let events = [
        quake("usgs", "a", "1", 5.1, t0()),
        quake("usgs", "b", "1", 4.2, t0()),
    ];
    let notifier = RecordingNotifier::default();

    let first = pipeline(
        &config,
        vec![Arc::new(StaticAdapter::new("usgs", &events))],
        notifier.clone(),
    )
    .run()
    .await
    .unwrap();
    assert_eq!(first.new, 2);
    assert_eq!(first.committed, 2);

    let second = pipeline(
        &config,
        vec![Arc::new(StaticAdapter::new("usgs", &events))],
        notifier.clone(),
    )
    .run()
    .await
    .unwrap();
    assert!(second.digest.is_empty());
    assert_eq!(second.unchanged, 2);
    assert_eq!(second.committed, 0);
    assert!(!second.phases.contains(&RunPhase::Dispatching));

    // Notifier saw exactly one digest.
    assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test]
async fn republished_version_is_reported_once_as_updated() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let notifier = RecordingNotifier::default();

    let v1 = quake("usgs", "x", "v1", 5.0, t0());
    let mut v2 = quake("usgs", "x", "v2", 5.3, t0());
    v2.updated_at = t0() + ChronoDuration::minutes(20);

    let run = |event: &Event| {
        pipeline(
            &config,
            vec![Arc::new(StaticAdapter::new("usgs", std::slice::from_ref(event)))],
            notifier.clone(),
        )
    };

    let r1 = run(&v1).run().await.unwrap();
    assert_eq!(r1.digest.entries[0].change_kind, ChangeKind::New);

    let r2 = run(&v2).run().await.unwrap();
    assert_eq!(r2.digest.len(), 1);
    assert_eq!(r2.digest.entries[0].change_kind, ChangeKind::Updated);
    assert_eq!(r2.digest.entries[0].event.version_key, "v2");

    let r3 = run(&v2).run().await.unwrap();
    assert!(r3.digest.is_empty());

    // A late copy of v1 does not resurface.
    let r4 = run(&v1).run().await.unwrap();
    assert!(r4.digest.is_empty());
    assert_eq!(r4.unchanged, 1);
}

#[tokio::test]
async fn duplicate_keys_in_one_batch_collapse_to_newest() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    let older = quake("usgs", "dup", "v1", 5.0, t0());
    let mut newer = quake("usgs", "dup", "v2", 5.2, t0());
    newer.updated_at = t0() + ChronoDuration::minutes(5);

    let report = pipeline(
        &config,
        vec![Arc::new(StaticAdapter::new("usgs", &[newer, older]))],
        NoopNotifier,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.duplicates_collapsed, 1);
    assert_eq!(report.digest.len(), 1);
    assert_eq!(report.digest.entries[0].event.version_key, "v2");
}

// ---------------------------------------------------------------------------
// Commit semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_dispatch_commits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let events = [quake("usgs", "a", "1", 6.0, t0())];

    let err = pipeline(
        &config,
        vec![Arc::new(StaticAdapter::new("usgs", &events))],
        FailingNotifier,
    )
    .run()
    .await
    .unwrap_err();
    assert!(matches!(err, PipelineError::Dispatch(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(!config.app.state_file.exists());
    assert!(!config.app.lock_file.exists());

    // Next run reports the same event again.
    let notifier = RecordingNotifier::default();
    let report = pipeline(
        &config,
        vec![Arc::new(StaticAdapter::new("usgs", &events))],
        notifier.clone(),
    )
    .run()
    .await
    .unwrap();
    assert_eq!(report.new, 1);
    assert_eq!(ids(&notifier.sent()[0]), vec!["a"]);
}

#[tokio::test]
async fn filtered_events_are_still_marked_seen() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.thresholds.earthquake = Some(EarthquakeThresholds {
        min_magnitude: Some(5.0),
        max_depth_km: None,
    });
    let events = [quake("usgs", "small", "1", 4.0, t0())];
    let notifier = RecordingNotifier::default();

    let first = pipeline(
        &config,
        vec![Arc::new(StaticAdapter::new("usgs", &events))],
        notifier.clone(),
    )
    .run()
    .await
    .unwrap();
    assert!(first.digest.is_empty());
    assert_eq!(first.filtered_out, 1);
    assert_eq!(first.committed, 1);
    assert_eq!(stored_keys(&config), vec!["usgs:small"]);

    // Loosening the threshold does not resurface an event already seen.
    config.thresholds.earthquake = None;
    let second = pipeline(
        &config,
        vec![Arc::new(StaticAdapter::new("usgs", &events))],
        notifier.clone(),
    )
    .run()
    .await
    .unwrap();
    assert!(second.digest.is_empty());
    assert_eq!(second.unchanged, 1);
    assert!(notifier.sent().is_empty());
}

// ---------------------------------------------------------------------------
// Provider failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timed_out_provider_is_a_soft_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.thresholds.earthquake = Some(EarthquakeThresholds {
        min_magnitude: Some(5.0),
        max_depth_km: None,
    });

    let notifier = RecordingNotifier::default();
    let report = pipeline(
        &config,
        vec![
            Arc::new(StaticAdapter::new("a", &[quake("a", "big", "1", 6.2, t0())])),
            Arc::new(SlowAdapter("b")),
        ],
        notifier.clone(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.providers_ok, vec!["a"]);
    assert_eq!(report.provider_failures.len(), 1);
    assert_eq!(report.provider_failures[0].provider, "b");
    assert!(report.provider_failures[0].retryable);
    assert_eq!(ids(&report.digest), vec!["big"]);
    assert_eq!(notifier.sent().len(), 1);
    assert_eq!(stored_keys(&config), vec!["a:big"]);
}

#[tokio::test]
async fn all_providers_failing_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let notifier = RecordingNotifier::default();

    let err = pipeline(
        &config,
        vec![Arc::new(DownAdapter("usgs")), Arc::new(SlowAdapter("nws"))],
        notifier.clone(),
    )
    .run()
    .await
    .unwrap_err();

    match err {
        PipelineError::AllProvidersFailed { failures } => assert_eq!(failures.len(), 2),
        other => panic!("expected AllProvidersFailed, got {other:?}"),
    }
    assert!(notifier.sent().is_empty());
    assert!(!config.app.state_file.exists());
}

#[tokio::test]
async fn malformed_items_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let adapter = StaticAdapter::new("usgs", &[quake("usgs", "ok", "1", 5.0, t0())])
        .with_raw(json!({ "id": "broken", "mag": "n/a" }));

    let report = pipeline(&config, vec![Arc::new(adapter)], NoopNotifier)
        .run()
        .await
        .unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.normalized, 1);
    assert_eq!(report.skipped_items.len(), 1);
    assert_eq!(report.skipped_items[0].provider, "usgs");
    assert_eq!(ids(&report.digest), vec!["ok"]);
}

// ---------------------------------------------------------------------------
// Ordering and geometry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn digest_is_newest_first_then_by_key() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let t = t0();
    let events = [
        quake("p", "b", "1", 5.0, t),
        quake("p", "a", "1", 5.0, t),
        quake("p", "c", "1", 5.0, t - ChronoDuration::minutes(1)),
    ];

    let report = pipeline(
        &config,
        vec![Arc::new(StaticAdapter::new("p", &events))],
        NoopNotifier,
    )
    .run()
    .await
    .unwrap();
    assert_eq!(ids(&report.digest), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn antimeridian_aoi_filters_by_location() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.aoi = Some(AoiConfig::Polygon {
        coordinates: vec![vec![
            [179.0, -1.0],
            [-179.0, -1.0],
            [-179.0, 1.0],
            [179.0, 1.0],
            [179.0, -1.0],
        ]],
    });

    let mut inside = quake("usgs", "fiji", "1", 5.0, t0());
    inside.location = Location::point(0.5, 179.9);
    let mut outside = quake("usgs", "greenwich", "1", 5.0, t0());
    outside.location = Location::point(0.5, 0.0);

    let report = pipeline(
        &config,
        vec![Arc::new(StaticAdapter::new("usgs", &[inside, outside]))],
        NoopNotifier,
    )
    .run()
    .await
    .unwrap();
    assert_eq!(ids(&report.digest), vec!["fiji"]);
    assert_eq!(report.filtered_out, 1);
    assert_eq!(report.committed, 2);
}

// ---------------------------------------------------------------------------
// Fatal errors before any work
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_aoi_fails_before_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.aoi = Some(AoiConfig::Polygon {
        coordinates: vec![vec![[0.0, 0.0], [1.0, 1.0], [0.0, 0.0]]],
    });
    let adapter = StaticAdapter::new("usgs", &[quake("usgs", "a", "1", 5.0, t0())]);
    let fetches = adapter.fetches.clone();

    let err = pipeline(&config, vec![Arc::new(adapter)], NoopNotifier)
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Geometry(_)));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn corrupt_state_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    std::fs::write(&config.app.state_file, "not json").unwrap();
    let notifier = RecordingNotifier::default();

    let err = pipeline(
        &config,
        vec![Arc::new(StaticAdapter::new("usgs", &[quake("usgs", "a", "1", 5.0, t0())]))],
        notifier.clone(),
    )
    .run()
    .await
    .unwrap_err();
    assert!(matches!(err, PipelineError::StateStore(_)));
    assert!(notifier.sent().is_empty());
    assert_eq!(std::fs::read_to_string(&config.app.state_file).unwrap(), "not json");
}

#[tokio::test]
async fn held_lock_skips_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let _held = RunLock::acquire(&config.app.lock_file, Duration::from_secs(3600))
        .unwrap()
        .unwrap();
    let adapter = StaticAdapter::new("usgs", &[quake("usgs", "a", "1", 5.0, t0())]);
    let fetches = adapter.fetches.clone();

    let err = pipeline(&config, vec![Arc::new(adapter)], NoopNotifier)
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::LockConflict { .. }));
    assert_eq!(err.exit_code(), 0);
    assert_eq!(fetches.load(Ordering::SeqCst), 0);
    // The holder's lock is not disturbed.
    assert!(config.app.lock_file.exists());
}
