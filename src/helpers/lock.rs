//! Cross-platform per-path advisory locks.
//!
//! The OS primitive is `flock(LOCK_EX | LOCK_NB)` on Unix and
//! `LockFileEx(EXCLUSIVE | FAIL_IMMEDIATELY)` on Windows, both reached
//! through `fs4`. Acquisition polls the non-blocking lock on a fixed
//! interval until the deadline passes. Unlocking never deletes the lock
//! file: a waiter polling the old inode would otherwise lock a file nobody
//! else can see.

use std::fs::OpenOptions;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use fs4::FileExt;
use tokio::time::Instant;
use tracing::warn;

use crate::consts;
use crate::errors::LockError;

/// An advisory lock on a single path.
pub struct PathLock {
    path: PathBuf,
    file: Option<std::fs::File>,
}

impl PathLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Acquires the lock, polling every [`consts::LOCK_POLL_INTERVAL`] until
    /// `timeout` has elapsed.
    ///
    /// The lock file is created if missing (mode 0o644, parents 0o755).
    ///
    /// # Errors
    ///
    /// * [`LockError::Held`] when this handle already holds the lock.
    /// * [`LockError::Timeout`] when another holder outlasted the deadline.
    /// * [`LockError::Io`] for any non-contention OS error.
    pub async fn lock(&mut self, timeout: Duration) -> Result<(), LockError> {
        if self.file.is_some() {
            return Err(LockError::Held);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                create_parent(parent)?;
            }
        }

        let file = open_lock_file(&self.path)?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    self.file = Some(file);
                    return Ok(());
                }
                Err(error) if is_contended(&error) => {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        return Err(LockError::Timeout {
                            elapsed,
                            path: self.path.clone(),
                        });
                    }
                    tokio::time::sleep(consts::LOCK_POLL_INTERVAL).await;
                }
                Err(error) => return Err(LockError::Io(error)),
            }
        }
    }

    /// Acquires the lock with the standard 30 second deadline.
    pub async fn lock_with_default_timeout(&mut self) -> Result<(), LockError> {
        self.lock(consts::DEFAULT_LOCK_TIMEOUT).await
    }

    /// Releases the lock and closes the handle. The lock file itself is left
    /// in place. Unlocking an unheld lock is a no-op.
    pub fn unlock(&mut self) -> Result<(), LockError> {
        if let Some(file) = self.file.take() {
            file.unlock()?;
        }
        Ok(())
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}

/// Runs `op` while holding the lock at `path`, releasing it on every exit
/// path (the `Drop` impl covers panics and cancellation).
pub async fn with_lock<T, E, F, Fut>(path: PathBuf, timeout: Duration, op: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<LockError>,
{
    let mut lock = PathLock::new(path);
    lock.lock(timeout).await?;

    let result = op().await;

    if let Err(error) = lock.unlock() {
        warn!("failed to release lock {}: {error}", lock.path().display());
    }

    result
}

fn open_lock_file(path: &std::path::Path) -> std::io::Result<std::fs::File> {
    let mut options = OpenOptions::new();
    options.create(true).read(true).write(true).truncate(false);

    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
    }

    options.open(path)
}

#[cfg(unix)]
fn create_parent(parent: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(parent)
}

#[cfg(windows)]
fn create_parent(parent: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(parent)
}

/// The "try again" sentinel: `EWOULDBLOCK` on Unix, `ERROR_LOCK_VIOLATION`
/// on Windows.
fn is_contended(error: &std::io::Error) -> bool {
    error.kind() == std::io::ErrorKind::WouldBlock
        || error.raw_os_error() == fs4::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_then_unlock() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join(".nvs-version-stable.lock");

        let mut lock = PathLock::new(&path);
        lock.lock(Duration::from_secs(1)).await.unwrap();
        assert!(lock.is_held());
        lock.unlock().unwrap();
        assert!(!lock.is_held());

        // the lock file survives the release
        assert!(path.exists());
    }

    #[tokio::test]
    async fn default_timeout_lock_acquires_free_path() {
        let temp = tempfile::tempdir().unwrap();
        let mut lock = PathLock::new(temp.path().join("free.lock"));
        lock.lock_with_default_timeout().await.unwrap();
        assert!(lock.is_held());
    }

    #[tokio::test]
    async fn relock_without_unlock_is_held() {
        let temp = tempfile::tempdir().unwrap();
        let mut lock = PathLock::new(temp.path().join("a.lock"));
        lock.lock(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(
            lock.lock(Duration::from_secs(1)).await,
            Err(LockError::Held)
        ));
    }

    #[tokio::test]
    async fn second_holder_times_out() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("busy.lock");

        let mut first = PathLock::new(&path);
        first.lock(Duration::from_secs(1)).await.unwrap();

        let mut second = PathLock::new(&path);
        let result = second.lock(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(LockError::Timeout { .. })));
    }

    #[tokio::test]
    async fn waiter_acquires_after_release() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("handoff.lock");

        let mut first = PathLock::new(&path);
        first.lock(Duration::from_secs(1)).await.unwrap();

        let waiter_path = path.clone();
        let waiter = tokio::spawn(async move {
            let mut lock = PathLock::new(waiter_path);
            lock.lock(Duration::from_secs(5)).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        first.unlock().unwrap();

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn with_lock_releases_on_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("guard.lock");

        let result: Result<(), LockError> =
            with_lock(path.clone(), Duration::from_secs(1), || async {
                Err(LockError::Held)
            })
            .await;
        assert!(matches!(result, Err(LockError::Held)));

        // the path is free again
        let mut lock = PathLock::new(&path);
        lock.lock(Duration::from_millis(100)).await.unwrap();
    }

    #[tokio::test]
    async fn parent_directories_are_created() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("deep/nested/dir/x.lock");

        let mut lock = PathLock::new(&path);
        lock.lock(Duration::from_secs(1)).await.unwrap();
        assert!(path.exists());
    }
}
