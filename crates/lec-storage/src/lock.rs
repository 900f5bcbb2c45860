//! Lock file guarding against overlapping update runs.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

pub const LOCK_FILE_NAME: &str = ".run.lock";

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    released: bool,
}

#[derive(Debug)]
pub enum LockOutcome {
    Acquired(RunLock),
    Held { path: PathBuf, holder: String },
}

impl RunLock {
    /// Take the lock in `dir`. A lock file older than `stale_after` is replaced.
    pub async fn acquire(dir: &Path, run_id: Uuid, stale_after: Duration) -> Result<LockOutcome> {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(LOCK_FILE_NAME);

        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let line = format!("{run_id} {} pid={}\n", Utc::now().to_rfc3339(), std::process::id());
                    file.write_all(line.as_bytes())
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    file.flush()
                        .await
                        .with_context(|| format!("flushing {}", path.display()))?;
                    debug!(path = %path.display(), %run_id, "acquired run lock");
                    return Ok(LockOutcome::Acquired(RunLock { path, released: false }));
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&path, stale_after).await {
                        warn!(path = %path.display(), "replacing stale run lock");
                        fs::remove_file(&path)
                            .await
                            .with_context(|| format!("removing stale lock {}", path.display()))?;
                        continue;
                    }
                    let holder = read_holder(&path).await;
                    return Ok(LockOutcome::Held { path, holder });
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("creating lock {}", path.display()))
                }
            }
        }

        let holder = read_holder(&path).await;
        Ok(LockOutcome::Held { path, holder })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file. Dropping an unreleased lock removes it synchronously.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        fs::remove_file(&self.path)
            .await
            .with_context(|| format!("releasing run lock {}", self.path.display()))
    }
}

async fn read_holder(path: &Path) -> String {
    fs::read_to_string(path).await.unwrap_or_default().trim().to_string()
}

async fn is_stale(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > stale_after)
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to release run lock");
        }
    }
}
