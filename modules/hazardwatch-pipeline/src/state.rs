use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use hazardwatch_common::{ChangeKind, Event, EventKey, StateStoreError};

const STATE_VERSION: u32 = 1;

/// Last-seen version of one external event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub version_key: String,
    pub updated_at: DateTime<Utc>,
}

/// In-memory view of the dedup state for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    records: BTreeMap<EventKey, DedupRecord>,
}

impl StateSnapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn lookup(&self, provider_id: &str, external_id: &str) -> Option<&DedupRecord> {
        self.records
            .get(&EventKey::new(provider_id, external_id))
    }

    /// Compare an observation with what was last committed for its key.
    ///
    /// A record whose `updated_at` is newer than the event's means the event
    /// arrived late or duplicated, so it is treated as already seen.
    pub fn classify(&self, event: &Event) -> ChangeKind {
        match self.lookup(&event.provider_id, &event.external_id) {
            None => ChangeKind::New,
            Some(prior) if prior.version_key == event.version_key => ChangeKind::Unchanged,
            Some(prior) if prior.updated_at > event.updated_at => ChangeKind::Unchanged,
            Some(_) => ChangeKind::Updated,
        }
    }

    /// Record the given events as seen, replacing older records.
    pub fn apply(&mut self, batch: &[Event]) {
        for event in batch {
            self.records.insert(
                event.key(),
                DedupRecord {
                    version_key: event.version_key.clone(),
                    updated_at: event.updated_at,
                },
            );
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EventKey, &DedupRecord)> {
        self.records.iter()
    }
}

/// Durable dedup state. `commit` is all-or-nothing.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<StateSnapshot, StateStoreError>;

    /// Persist `snapshot` as the complete new state.
    fn save(&self, snapshot: &StateSnapshot) -> Result<(), StateStoreError>;

    /// Merge `batch` into `base` and persist the result.
    fn commit(&self, base: &StateSnapshot, batch: &[Event]) -> Result<StateSnapshot, StateStoreError> {
        let mut next = base.clone();
        next.apply(batch);
        self.save(&next)?;
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u32,
    #[serde(default)]
    records: Vec<RecordRow>,
}

#[derive(Serialize, Deserialize)]
struct RecordRow {
    provider_id: String,
    external_id: String,
    version_key: String,
    updated_at: DateTime<Utc>,
}

/// State kept in a single JSON document, replaced atomically on save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StateStoreError {
        StateStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<StateSnapshot, StateStoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No state file yet, starting empty");
                return Ok(StateSnapshot::default());
            }
            Err(e) => return Err(self.io_err(e)),
        };

        let file: StateFile =
            serde_json::from_str(&content).map_err(|e| StateStoreError::Corrupt {
                path: self.path.clone(),
                detail: e.to_string(),
            })?;
        if file.version != STATE_VERSION {
            return Err(StateStoreError::UnsupportedVersion {
                path: self.path.clone(),
                version: file.version,
            });
        }

        let mut snapshot = StateSnapshot::default();
        for row in file.records {
            let key = EventKey::new(row.provider_id, row.external_id);
            if snapshot.records.contains_key(&key) {
                return Err(StateStoreError::Corrupt {
                    path: self.path.clone(),
                    detail: format!("duplicate record for {key}"),
                });
            }
            snapshot.records.insert(
                key,
                DedupRecord {
                    version_key: row.version_key,
                    updated_at: row.updated_at,
                },
            );
        }
        debug!(path = %self.path.display(), records = snapshot.len(), "Loaded state");
        Ok(snapshot)
    }

    fn save(&self, snapshot: &StateSnapshot) -> Result<(), StateStoreError> {
        let file = StateFile {
            version: STATE_VERSION,
            records: snapshot
                .iter()
                .map(|(key, record)| RecordRow {
                    provider_id: key.provider_id.clone(),
                    external_id: key.external_id.clone(),
                    version_key: record.version_key.clone(),
                    updated_at: record.updated_at,
                })
                .collect(),
        };
        let body = serde_json::to_vec_pretty(&file)?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.io_err(e))?;

        // Temp file in the same directory so the rename stays on one filesystem.
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_err(e))?;
        tmp.write_all(&body).map_err(|e| self.io_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;

        sync_dir(&dir);

        info!(path = %self.path.display(), records = snapshot.len(), "State committed");
        Ok(())
    }
}

/// Flush the rename itself. Best effort.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(d) = fs::File::open(dir) {
            let _ = d.sync_all();
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StateSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            inner: Mutex::new(snapshot),
        }
    }

    /// Current committed contents.
    pub fn snapshot(&self) -> StateSnapshot {
        self.inner
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<StateSnapshot, StateStoreError> {
        self.inner
            .lock()
            .map(|s| s.clone())
            .map_err(|_| StateStoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn save(&self, snapshot: &StateSnapshot) -> Result<(), StateStoreError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| StateStoreError::Unavailable("memory store lock poisoned".to_string()))?;
        *guard = snapshot.clone();
        Ok(())
    }
}
