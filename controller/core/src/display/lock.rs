//! Cross-process write lock
//!
//! The renderer process and this controller share the panel's data
//! directory. A `write.lock` file with an advisory exclusive lock keeps a
//! render and a panel write from interleaving. Acquisition polls with a
//! short backoff until a deadline; the lock releases on drop (and the OS
//! releases it if the process dies).

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use fs2::FileExt as _;

/// Name of the lock file inside the panel's data directory
pub const LOCK_FILE: &str = "write.lock";

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Held advisory lock on the panel's `write.lock` file
#[derive(Debug)]
pub struct WriteLock {
    file: std::fs::File,
    path: PathBuf,
}

impl WriteLock {
    /// Path of the lock file for a panel data directory
    #[must_use]
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(LOCK_FILE)
    }

    /// Acquire the lock at `path`, polling until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or another process still holds
    /// the lock at the deadline.
    pub async fn acquire(path: PathBuf, timeout: Duration) -> anyhow::Result<Self> {
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .with_context(|| format!("cannot open lock file {path:?}"))?;
            let deadline = Instant::now() + timeout;
            loop {
                match file.try_lock_exclusive() {
                    Ok(()) => return Ok(Self { file, path }),
                    Err(_) if Instant::now() < deadline => std::thread::sleep(RETRY_INTERVAL),
                    Err(e) => {
                        return Err(e).with_context(|| {
                            format!("timed out waiting for write lock {path:?}")
                        })
                    }
                }
            }
        })
        .await
        .context("lock acquisition task failed")?
    }

    /// Path of the locked file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
