//! Cross-process exclusive lock file
//!
//! The lock is a file created with `create_new`, which fails atomically if
//! another process already holds it. While held, a background task touches
//! the file every quarter of the stale threshold, so only a lock whose
//! holder died goes stale. Dropping the guard stops the heartbeat and
//! removes the file.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::Result;

const RETRY_INTERVAL: Duration = Duration::from_millis(100);
const MIN_HEARTBEAT: Duration = Duration::from_millis(50);

static BREAK_ATTEMPTS: AtomicU64 = AtomicU64::new(0);

/// Held lock; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    heartbeat: JoinHandle<()>,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.heartbeat.abort();
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "Failed to release lock file: {}", e);
        }
    }
}

/// Try to take the lock, retrying for up to `wait`.
///
/// Returns `Ok(None)` when another holder kept the lock for the whole
/// window; the caller decides what to do then.
pub async fn acquire(path: &Path, wait: Duration, stale_after: Duration) -> Result<Option<LockGuard>> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let deadline = Instant::now() + wait;
    loop {
        match try_create(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Lock acquired");
                return Ok(Some(LockGuard {
                    path: path.to_path_buf(),
                    heartbeat: spawn_heartbeat(path.to_path_buf(), stale_after),
                }));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if is_stale(path, stale_after) && break_stale(path, stale_after)? {
                    continue;
                }
            }
            Err(e) => return Err(e.into()),
        }

        if Instant::now() >= deadline {
            debug!(path = %path.display(), "Lock wait window elapsed");
            return Ok(None);
        }
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
}

fn try_create(path: &Path) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    writeln!(file, "{}", std::process::id())?;
    writeln!(file, "{}", chrono::Utc::now().to_rfc3339())?;
    Ok(())
}

fn spawn_heartbeat(path: PathBuf, stale_after: Duration) -> JoinHandle<()> {
    let period = (stale_after / 4).max(MIN_HEARTBEAT);
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(period);
        ticks.tick().await;
        loop {
            ticks.tick().await;
            if let Err(e) = touch(&path) {
                warn!(path = %path.display(), "Failed to refresh lock file: {}", e);
            }
        }
    })
}

fn touch(path: &Path) -> std::io::Result<()> {
    std::fs::OpenOptions::new()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())
}

/// Move a stale lock aside. Returns whether the path is free to retry.
///
/// The rename is atomic, so of several processes breaking the same stale
/// lock only one moves it. If what was moved turns out to be fresh, a
/// competitor re-created the lock in between; it is linked back, which
/// fails rather than overwrite a newer lock.
fn break_stale(path: &Path, stale_after: Duration) -> Result<bool> {
    let attempt = BREAK_ATTEMPTS.fetch_add(1, Ordering::Relaxed);
    let aside = path.with_extension(format!("stale.{}.{}", std::process::id(), attempt));
    match std::fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    }

    if !is_stale(&aside, stale_after) {
        match std::fs::hard_link(&aside, path) {
            Ok(()) => debug!(path = %path.display(), "Restored a live lock moved by mistake"),
            Err(e) => warn!(path = %path.display(), "Could not restore live lock: {}", e),
        }
        let _ = std::fs::remove_file(&aside);
        return Ok(false);
    }

    warn!(path = %path.display(), "Broke stale lock");
    let _ = std::fs::remove_file(&aside);
    Ok(true)
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(t) => t,
        // Vanished between create and stat: retry will tell
        Err(_) => return false,
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age >= stale_after)
        .unwrap_or(false)
}
