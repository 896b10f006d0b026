use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, Result};

/// Exclusive run lock backed by a file created with `O_EXCL`.
///
/// The file carries a per-acquisition token. The guard removes the file on
/// drop (including on cancellation) only while it still holds that token, so
/// a run whose lock was taken over never releases its successor's lock.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    token: String,
}

impl RunLock {
    /// Try to take the lock. Returns `None` if another live run holds it.
    /// A lock file older than `stale_after` is assumed to belong to a killed
    /// process and is taken over.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Option<Self>> {
        let lock_err = |source: std::io::Error| PipelineError::Lock {
            path: path.to_path_buf(),
            source,
        };

        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(lock_err)?;
        }

        if let Some(age) = lock_age(path) {
            if age > stale_after {
                match fs::read_to_string(path) {
                    Ok(observed) => {
                        warn!(
                            path = %path.display(),
                            age_secs = age.as_secs(),
                            "Taking over stale run lock"
                        );
                        if !take_over_stale(path, &observed).map_err(lock_err)? {
                            return Ok(None);
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(lock_err(e)),
                }
            }
        }

        // Atomic check-and-create
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(lock_err(e)),
        };
        let token = Uuid::new_v4().to_string();
        let stamp = serde_json::json!({
            "pid": std::process::id(),
            "token": token,
            "started_at": Utc::now(),
        });
        if let Err(e) = writeln!(file, "{stamp}").and_then(|()| file.sync_all()) {
            let _ = fs::remove_file(path);
            return Err(lock_err(e));
        }

        info!(path = %path.display(), "Run lock acquired");
        Ok(Some(Self {
            path: path.to_path_buf(),
            token,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn still_held(&self) -> bool {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .is_some_and(|stamp| stamp["token"].as_str() == Some(self.token.as_str()))
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if !self.still_held() {
            warn!(path = %self.path.display(), "Run lock was taken over, leaving it in place");
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(error = %e, path = %self.path.display(), "Failed to release run lock");
        }
    }
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Move the stale lock aside and discard it, provided it is still the stamp
/// we judged stale. If a contender replaced it in the meantime, the fresh
/// lock is linked back into place and `false` is returned.
fn take_over_stale(path: &Path, observed: &str) -> std::io::Result<bool> {
    let mut aside = path.as_os_str().to_owned();
    aside.push(format!(".stale-{}", Uuid::new_v4()));
    let aside = PathBuf::from(aside);

    match fs::rename(path, &aside) {
        Ok(()) => {}
        // Someone else already cleared it; race on create_new instead.
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    }

    let moved = fs::read_to_string(&aside)?;
    if moved == observed {
        fs::remove_file(&aside)?;
        return Ok(true);
    }

    let restored = fs::hard_link(&aside, path);
    fs::remove_file(&aside)?;
    match restored {
        Ok(()) => Ok(false),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");

        let first = RunLock::acquire(&path, HOUR).unwrap().expect("first lock");
        assert!(path.exists());
        assert!(RunLock::acquire(&path, HOUR).unwrap().is_none());

        drop(first);
        assert!(!path.exists());
        assert!(RunLock::acquire(&path, HOUR).unwrap().is_some());
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("run.lock");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{}").unwrap();

        // Zero tolerance: any existing lock counts as stale.
        std::thread::sleep(Duration::from_millis(20));
        let lock = RunLock::acquire(&path, Duration::ZERO).unwrap();
        assert!(lock.is_some());
        // Nothing is left beside the lock.
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn live_lock_within_window_blocks_later_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");

        let a = RunLock::acquire(&path, HOUR).unwrap().expect("a holds the lock");
        std::thread::sleep(Duration::from_millis(20));
        assert!(RunLock::acquire(&path, HOUR).unwrap().is_none());
        assert!(a.still_held());
    }

    #[test]
    fn taken_over_lock_is_not_released_by_its_old_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");

        let a = RunLock::acquire(&path, HOUR).unwrap().expect("a holds the lock");
        std::thread::sleep(Duration::from_millis(20));
        let b = RunLock::acquire(&path, Duration::ZERO)
            .unwrap()
            .expect("b takes over");
        assert!(!a.still_held());

        drop(a);
        assert!(path.exists());
        assert!(b.still_held());
        assert!(RunLock::acquire(&path, HOUR).unwrap().is_none());

        drop(b);
        assert!(!path.exists());
    }

    #[test]
    fn takeover_backs_off_when_the_stale_stamp_was_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");
        let stale = r#"{"pid":1,"token":"old"}"#;
        let fresh = r#"{"pid":2,"token":"new"}"#;

        // Another contender replaced the stale lock after we read it.
        fs::write(&path, fresh).unwrap();
        assert!(!take_over_stale(&path, stale).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), fresh);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        // Unchanged stamp: cleared for us to create.
        assert!(take_over_stale(&path, fresh).unwrap());
        assert!(!path.exists());

        // Already gone.
        assert!(take_over_stale(&path, fresh).unwrap());
    }
}
