use feedsync_core::{CoreError, ErrorExt, Snapshot, StorageError};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Replace `path` with `bytes` so readers see either the old or the new file, never a mix.
///
/// The data goes to a temp file in the same directory, is flushed to disk, and is renamed
/// over the destination. If anything fails the temp file is removed on drop.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    let shown = path.display().to_string();
    let write_err = |source: std::io::Error| StorageError::Write {
        path: shown.clone(),
        source,
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::Builder::new()
        .prefix(".feedsync-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;

    // Temp files are created 0600; the web server needs to read what we publish.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .map_err(write_err)?;
    }

    tmp.persist(path).map_err(|e| StorageError::Persist {
        path: shown.clone(),
        source: e.error,
    })?;
    debug!("Atomically replaced {}", shown);
    Ok(())
}

/// Serialize the posts array the front end reads. Output is stable for identical posts.
pub fn render_posts(snapshot: &Snapshot) -> Result<Vec<u8>, CoreError> {
    let mut bytes = serde_json::to_vec_pretty(&snapshot.posts)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Owns the snapshot file and its metadata sidecar.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    snapshot_path: PathBuf,
    meta_path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(snapshot_path: PathBuf, meta_path: PathBuf) -> Self {
        Self {
            snapshot_path,
            meta_path,
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    /// Write the posts array, then the sidecar. Both are serialized before anything touches disk.
    ///
    /// Once the posts array is in place the run has succeeded; a sidecar failure only warns.
    pub fn write(&self, snapshot: &Snapshot, provider: &str) -> Result<(), CoreError> {
        let posts = render_posts(snapshot)?;
        let mut meta = serde_json::to_vec_pretty(&snapshot.meta(provider))?;
        meta.push(b'\n');

        write_atomic(&self.snapshot_path, &posts)?;
        if let Err(e) = write_atomic(&self.meta_path, &meta) {
            e.log_warn();
        }

        info!(
            "Snapshot written: {} posts to {}",
            snapshot.posts.len(),
            self.snapshot_path.display()
        );
        Ok(())
    }
}
