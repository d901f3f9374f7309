pub mod lock;
pub mod media_cache;
pub mod pipeline;
pub mod snapshot;

pub use lock::SyncLock;
pub use media_cache::MediaCache;
pub use snapshot::SnapshotWriter;

use feedsync_core::{CoreError, ErrorExt, FeedApiError, Snapshot, StorageError, SyncConfig};
use instagram_client::{build_source, FeedSource};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// What a successful run changed.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub posts_written: usize,
    pub media_downloaded: usize,
    pub media_reused: usize,
    pub posts_skipped: Vec<String>,
    pub orphans_pruned: usize,
    /// Requests that had to be retried before succeeding or giving up.
    pub retries: u64,
    pub elapsed: Duration,
    pub snapshot_path: PathBuf,
}

/// Runs one fetch-and-cache pass against a feed source.
pub struct FeedSyncer {
    config: SyncConfig,
    source: Box<dyn FeedSource>,
    cache: MediaCache,
    writer: SnapshotWriter,
}

impl FeedSyncer {
    pub fn new(config: SyncConfig, source: Box<dyn FeedSource>) -> Self {
        let cache = MediaCache::new(config.media_dir(), &config.public_media_prefix);
        let writer = SnapshotWriter::new(config.snapshot_path(), config.meta_path());
        Self {
            config,
            source,
            cache,
            writer,
        }
    }

    /// Validate the configuration and build the provider it selects.
    pub fn from_config(config: SyncConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let source = build_source(&config)?;
        Ok(Self::new(config, source))
    }

    /// Fetch the latest posts, download missing media and replace the snapshot.
    ///
    /// Nothing on disk is modified until every post has its media; a failure
    /// before that point leaves the previous snapshot in place.
    pub async fn sync(&self) -> Result<SyncReport, CoreError> {
        let started = Instant::now();
        let limit = self.config.post_count;

        std::fs::create_dir_all(&self.config.data_dir).map_err(|source| {
            StorageError::CreateDir {
                path: self.config.data_dir.display().to_string(),
                source,
            }
        })?;
        self.cache.ensure_dir()?;
        let _lock = SyncLock::acquire(&self.config.lock_path(), self.config.lock_stale_after)?;

        info!(
            "Fetching up to {} posts from the {} provider",
            limit,
            self.source.name()
        );
        let remote = self.source.fetch_recent(limit).await?;
        let posts = pipeline::validate(remote, limit)?;
        self.ensure_not_empty(posts.len())?;

        let cached = self.cache.index()?;
        let tasks = pipeline::plan(&posts, &cached);
        info!(
            "{} posts fetched, {} media files needed",
            posts.len(),
            tasks.len()
        );

        let outcomes = pipeline::download(
            self.source.as_ref(),
            &self.cache,
            tasks,
            self.config.download_concurrency,
            self.config.on_media_error,
        )
        .await?;
        let assembled =
            pipeline::assemble(posts, outcomes, self.config.on_media_error, &self.cache)?;
        self.ensure_not_empty(assembled.posts.len())?;

        let snapshot = Snapshot::new(assembled.posts);
        self.writer.write(&snapshot, self.source.name())?;

        let orphans_pruned = if self.config.prune_orphans {
            match self.cache.prune(&assembled.referenced) {
                Ok(removed) => removed.len(),
                Err(e) => {
                    e.log_warn();
                    0
                }
            }
        } else {
            0
        };

        let report = SyncReport {
            posts_written: snapshot.posts.len(),
            media_downloaded: assembled.downloaded,
            media_reused: assembled.reused,
            posts_skipped: assembled.skipped,
            orphans_pruned,
            retries: self.source.retry_metrics().total_retries,
            elapsed: started.elapsed(),
            snapshot_path: self.writer.snapshot_path().to_path_buf(),
        };
        if !report.posts_skipped.is_empty() {
            warn!("Posts skipped: {}", report.posts_skipped.join(", "));
        }
        Ok(report)
    }

    fn ensure_not_empty(&self, count: usize) -> Result<(), CoreError> {
        if count == 0 && !self.config.allow_empty_feed {
            return Err(FeedApiError::EmptyFeed.into());
        }
        Ok(())
    }
}
