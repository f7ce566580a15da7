// src/digest/lock.rs
//! Inter-process advisory lock around the shared writer model setting.
//!
//! The lock file is created if absent and held with an OS exclusive lock.
//! Acquisition polls with a fixed backoff until the timeout elapses. The
//! guard unlocks and removes the file on drop.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited_ms}ms waiting for lock {path}")]
    Timeout { path: String, waited_ms: u128 },

    #[error("lock file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct LockSettings {
    pub path: PathBuf,
    pub timeout: Duration,
    pub poll: Duration,
}

#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        // Remove first so a waiter that wins the unlocked inode re-checks the path.
        let _ = fs::remove_file(&self.path);
        if let Err(e) = self.file.unlock() {
            tracing::warn!(target: "digest", path = %self.path.display(), error = %e, "unlock failed");
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> LockError {
    LockError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// The path still names the inode we locked (it may have been removed and
/// recreated by a previous holder in between).
#[cfg(unix)]
fn still_current(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), fs::metadata(path)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_current(_file: &File, path: &Path) -> bool {
    path.exists()
}

fn try_acquire(path: &Path) -> Result<Option<FileLockGuard>, LockError> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    match file.try_lock() {
        Ok(()) => {}
        Err(TryLockError::WouldBlock) => return Ok(None),
        Err(TryLockError::Error(e)) => return Err(io_err(path, e)),
    }
    if !still_current(&file, path) {
        let _ = file.unlock();
        return Ok(None);
    }
    let mut guard = FileLockGuard {
        file,
        path: path.to_path_buf(),
    };
    // Holder pid, for whoever inspects a stuck lock.
    let _ = guard.file.set_len(0);
    let _ = writeln!(guard.file, "{}", std::process::id());
    Ok(Some(guard))
}

pub async fn acquire(settings: &LockSettings) -> Result<FileLockGuard, LockError> {
    if let Some(parent) = settings.path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }
    let started = Instant::now();
    loop {
        if let Some(guard) = try_acquire(&settings.path)? {
            tracing::debug!(target: "digest", path = %settings.path.display(), "writer lock acquired");
            return Ok(guard);
        }
        if started.elapsed() >= settings.timeout {
            return Err(LockError::Timeout {
                path: settings.path.display().to_string(),
                waited_ms: started.elapsed().as_millis(),
            });
        }
        tokio::time::sleep(settings.poll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &Path, timeout_ms: u64) -> LockSettings {
        LockSettings {
            path: dir.join("locks").join("writer.lock"),
            timeout: Duration::from_millis(timeout_ms),
            poll: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn second_holder_times_out_then_succeeds_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), 60);

        let first = acquire(&s).await.unwrap();
        assert!(first.path().exists());

        let err = acquire(&s).await.unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));

        drop(first);
        assert!(!s.path.exists());
        let again = acquire(&s).await.unwrap();
        drop(again);
    }
}
