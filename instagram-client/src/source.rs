use async_trait::async_trait;
use crate::retry::RetryMetrics;
use feedsync_core::{CoreError, RemotePost};

/// Raw media bytes plus the content type the server reported.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPayload {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// A provider of recent posts and their media.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Short provider name recorded in the snapshot metadata.
    fn name(&self) -> &'static str;

    /// Fetch up to `limit` posts in the provider's native (newest first) order.
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<RemotePost>, CoreError>;

    /// Download one media file referenced by a post.
    async fn fetch_media(&self, url: &str) -> Result<MediaPayload, CoreError>;

    /// Retries spent so far by this source's requests.
    fn retry_metrics(&self) -> RetryMetrics {
        RetryMetrics::default()
    }
}
