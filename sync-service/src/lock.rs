use feedsync_core::{CoreError, StorageError};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Exclusive marker file for a sync run. Removed when dropped.
#[derive(Debug)]
pub struct SyncLock {
    path: PathBuf,
}

impl SyncLock {
    /// Create the lock file, replacing it if it is older than `stale_after`.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Self, CoreError> {
        match Self::create(path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if !Self::is_stale(path, stale_after) {
                    return Err(StorageError::Locked {
                        path: path.display().to_string(),
                    }
                    .into());
                }

                warn!(
                    "Replacing stale sync lock at {} (older than {}s)",
                    path.display(),
                    stale_after.as_secs()
                );
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(source) => {
                        return Err(StorageError::Write {
                            path: path.display().to_string(),
                            source,
                        }
                        .into())
                    }
                }

                // Another process may have won the race after the removal
                Self::create(path).map_err(|e| match e.kind() {
                    std::io::ErrorKind::AlreadyExists => StorageError::Locked {
                        path: path.display().to_string(),
                    }
                    .into(),
                    _ => CoreError::from(StorageError::Write {
                        path: path.display().to_string(),
                        source: e,
                    }),
                })
            }
            Err(source) => Err(StorageError::Write {
                path: path.display().to_string(),
                source,
            }
            .into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        Self::create_with(path, |file| {
            writeln!(
                file,
                "pid={} started_at={}",
                std::process::id(),
                chrono::Utc::now().to_rfc3339()
            )?;
            file.flush()
        })
    }

    fn create_with<F>(path: &Path, write_owner: F) -> std::io::Result<Self>
    where
        F: FnOnce(&mut File) -> std::io::Result<()>,
    {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        // The guard owns the file from here on; an early return removes it
        let lock = Self {
            path: path.to_path_buf(),
        };
        write_owner(&mut file)?;
        debug!("Acquired sync lock {}", path.display());
        Ok(lock)
    }

    fn is_stale(path: &Path, stale_after: Duration) -> bool {
        let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            // Vanished between attempts; let the retry decide
            Err(_) => return true,
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age >= stale_after)
            .unwrap_or(false)
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release sync lock {}: {}", self.path.display(), e);
        }
    }
}
