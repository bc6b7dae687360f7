//! Per-session write lock.
//!
//! The lock is a sibling file (`{transcript}.lock`) created with an
//! exclusive atomic create. Contenders poll at 50ms until `max_hold`
//! elapses. Lock files older than five minutes are presumed orphaned
//! and forcibly removed. The guard unlinks the file on drop, so release
//! happens on every exit path; a missing file at release is tolerated.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ag_domain::error::{Error, Result};
use ag_domain::trace::TraceEvent;

/// Held locks older than this are presumed orphaned.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(300);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive write lock over one session file. Dropping releases.
#[derive(Debug)]
pub struct SessionWriteLock {
    lock_path: PathBuf,
}

impl SessionWriteLock {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for SessionWriteLock {
    fn drop(&mut self) {
        // Idempotent release: a missing lock file is fine.
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

/// Acquire the write lock for `session_file`, waiting up to `max_hold`.
pub async fn acquire_session_write_lock(
    session_file: &Path,
    max_hold: Duration,
) -> Result<SessionWriteLock> {
    acquire_with_stale_age(session_file, max_hold, STALE_LOCK_AGE).await
}

/// Same as [`acquire_session_write_lock`] with an explicit stale
/// threshold (tests shrink it to exercise recovery).
pub async fn acquire_with_stale_age(
    session_file: &Path,
    max_hold: Duration,
    stale_age: Duration,
) -> Result<SessionWriteLock> {
    let lock_path = lock_path_for(session_file);
    let started = Instant::now();
    let deadline = started + max_hold;

    loop {
        if try_lock(&lock_path, stale_age)? {
            TraceEvent::LockAcquired {
                session_key: session_file.display().to_string(),
                waited_ms: started.elapsed().as_millis() as u64,
            }
            .emit();
            return Ok(SessionWriteLock { lock_path });
        }

        if Instant::now() >= deadline {
            return Err(Error::LockTimeout(format!(
                "could not acquire session write lock for {} within {}ms",
                session_file.display(),
                max_hold.as_millis()
            )));
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn lock_path_for(session_file: &Path) -> PathBuf {
    let mut name = session_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".lock");
    session_file.with_file_name(name)
}

/// One exclusive-create attempt, with stale recovery retried once.
fn try_lock(lock_path: &Path, stale_age: Duration) -> Result<bool> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(Error::Io)?;
    }

    match exclusive_create(lock_path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            if remove_if_stale(lock_path, stale_age) {
                return match exclusive_create(lock_path) {
                    Ok(()) => Ok(true),
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
                    Err(e) => Err(Error::Io(e)),
                };
            }
            Ok(false)
        }
        Err(e) => Err(Error::Io(e)),
    }
}

fn exclusive_create(lock_path: &Path) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)?;
    file.write_all(std::process::id().to_string().as_bytes())?;
    Ok(())
}

fn remove_if_stale(lock_path: &Path, stale_age: Duration) -> bool {
    let age = std::fs::metadata(lock_path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| mtime.elapsed().ok());

    match age {
        Some(age) if age > stale_age => {
            tracing::warn!(lock = %lock_path.display(), age_secs = age.as_secs(), "removing stale lock file");
            TraceEvent::StaleLockRemoved {
                lock_path: lock_path.display().to_string(),
                age_secs: age.as_secs(),
            }
            .emit();
            let _ = std::fs::remove_file(lock_path);
            true
        }
        _ => false,
    }
}
