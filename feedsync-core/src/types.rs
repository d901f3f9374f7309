use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A post as returned by the feed provider, still pointing at remote media.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePost {
    pub id: String,
    pub caption: Option<String>,
    pub media_urls: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub permalink: String,
}

/// A post as persisted in the snapshot file, with local media paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub caption: Option<String>,
    pub media: Vec<String>,
    /// First entry of `media`, kept for front-end scripts that render a single image.
    pub media_url: String,
    pub timestamp: DateTime<Utc>,
    pub permalink: String,
}

impl Post {
    pub fn from_remote(remote: RemotePost, media: Vec<String>) -> Self {
        let media_url = media.first().cloned().unwrap_or_default();
        Self {
            id: remote.id,
            caption: remote.caption,
            media,
            media_url,
            timestamp: remote.timestamp,
            permalink: remote.permalink,
        }
    }
}

/// Ordered posts (most recent first) plus the time the snapshot was assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub posts: Vec<Post>,
    pub generated_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(posts: Vec<Post>) -> Self {
        Self {
            posts,
            generated_at: Utc::now(),
        }
    }

    pub fn meta(&self, provider: &str) -> SnapshotMeta {
        SnapshotMeta {
            generated_at: self.generated_at,
            post_count: self.posts.len(),
            provider: provider.to_string(),
        }
    }
}

/// Contents of the metadata sidecar written next to the snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub generated_at: DateTime<Utc>,
    pub post_count: usize,
    pub provider: String,
}
