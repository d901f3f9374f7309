use crate::snapshot::write_atomic;
use feedsync_core::{CoreError, StorageError};
use instagram_client::MediaPayload;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Extensions the cache writes. Anything else in the directory is left alone.
pub const MEDIA_EXTENSIONS: &[&str] = &["jpg", "png", "webp", "gif", "heic", "mp4"];

const FALLBACK_EXTENSION: &str = "jpg";

/// Keep identifiers safe to use as file names.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File stem for the `slot`-th media item of a post: `Cabc` for the first, `Cabc.1` after.
/// Sanitized ids never contain `.`, so stems of different posts cannot collide.
pub fn media_stem(post_id: &str, slot: usize) -> String {
    let id = sanitize_id(post_id);
    if slot == 0 {
        id
    } else {
        format!("{}.{}", id, slot)
    }
}

fn normalize_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.to_ascii_lowercase();
    let ext = if ext == "jpeg" { "jpg".to_string() } else { ext };
    MEDIA_EXTENSIONS.iter().find(|known| **known == ext).copied()
}

/// Pick a file extension from the response content type, then the URL path.
pub fn extension_for(content_type: Option<&str>, url: &str) -> &'static str {
    let from_type = match content_type {
        Some("image/jpeg") | Some("image/jpg") | Some("image/pjpeg") => Some("jpg"),
        Some("image/png") => Some("png"),
        Some("image/webp") => Some("webp"),
        Some("image/gif") => Some("gif"),
        Some("image/heic") => Some("heic"),
        Some("video/mp4") => Some("mp4"),
        _ => None,
    };

    from_type
        .or_else(|| {
            let parsed = url::Url::parse(url).ok()?;
            let file_name = parsed.path_segments()?.last()?.to_string();
            let (_, ext) = file_name.rsplit_once('.')?;
            normalize_extension(ext)
        })
        .unwrap_or(FALLBACK_EXTENSION)
}

/// Split `Cabc.1.jpg` into (`Cabc.1`, `jpg`) when the extension is one we write.
fn split_media_file_name(name: &str) -> Option<(&str, &str)> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || !MEDIA_EXTENSIONS.contains(&ext) {
        return None;
    }
    Some((stem, ext))
}

/// Directory of downloaded media, named deterministically from post ids.
#[derive(Debug, Clone)]
pub struct MediaCache {
    dir: PathBuf,
    public_prefix: String,
}

impl MediaCache {
    pub fn new(dir: PathBuf, public_prefix: &str) -> Self {
        Self {
            dir,
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<(), CoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| StorageError::CreateDir {
            path: self.dir.display().to_string(),
            source,
        })?;
        Ok(())
    }

    /// Map of stem -> file name for every media file currently cached.
    pub fn index(&self) -> Result<HashMap<String, String>, CoreError> {
        let mut index = HashMap::new();
        for name in self.media_file_names()? {
            if let Some((stem, _)) = split_media_file_name(&name) {
                index.insert(stem.to_string(), name.clone());
            }
        }
        debug!("Media cache holds {} files", index.len());
        Ok(index)
    }

    /// Write a downloaded file under `<stem>.<ext>` and return the file name.
    pub fn store(
        &self,
        stem: &str,
        payload: &MediaPayload,
        url: &str,
    ) -> Result<String, CoreError> {
        let ext = extension_for(payload.content_type.as_deref(), url);
        let file_name = format!("{}.{}", stem, ext);
        write_atomic(&self.dir.join(&file_name), &payload.bytes)?;
        info!("Media downloaded: {}", file_name);
        Ok(file_name)
    }

    /// Path the front end uses to load a cached file.
    pub fn public_path(&self, file_name: &str) -> String {
        if self.public_prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{}", self.public_prefix, file_name)
        }
    }

    /// Delete media files not listed in `keep`. Failures to delete a single file are logged.
    pub fn prune(&self, keep: &HashSet<String>) -> Result<Vec<String>, CoreError> {
        let mut removed = Vec::new();
        for name in self.media_file_names()? {
            if split_media_file_name(&name).is_none() || keep.contains(&name) {
                continue;
            }
            match std::fs::remove_file(self.dir.join(&name)) {
                Ok(()) => {
                    info!("Orphaned media removed: {}", name);
                    removed.push(name);
                }
                Err(e) => warn!("Could not remove orphaned media {}: {}", name, e),
            }
        }
        Ok(removed)
    }

    fn media_file_names(&self) -> Result<Vec<String>, CoreError> {
        let read_err = |source: std::io::Error| StorageError::ReadCache {
            path: self.dir.display().to_string(),
            source,
        };

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(read_err(e).into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(read_err)?;
            if !entry.file_type().map_err(read_err)?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
