//! Stages between fetching the feed and writing the snapshot.
//!
//! Each stage is a plain function over owned data so the syncer reads as
//! fetch, validate, plan, download, assemble.

use crate::media_cache::{media_stem, MediaCache};
use feedsync_core::{CoreError, ErrorExt, FeedApiError, MediaErrorPolicy, Post, RemotePost};
use futures::stream::{self, StreamExt};
use instagram_client::FeedSource;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Check provider output and cut it down to `limit` posts.
///
/// Duplicate ids keep their first occurrence. Order is preserved as returned;
/// pinned posts can legitimately break chronological order, so that only warns.
pub fn validate(posts: Vec<RemotePost>, limit: usize) -> Result<Vec<RemotePost>, CoreError> {
    let mut seen = HashSet::new();
    let mut valid = Vec::with_capacity(limit.min(posts.len()));

    for post in posts {
        if valid.len() == limit {
            break;
        }
        if post.id.trim().is_empty() {
            return Err(FeedApiError::MissingField {
                post: post.permalink.clone(),
                field: "id".to_string(),
            }
            .into());
        }
        if post.media_urls.is_empty() {
            return Err(FeedApiError::MissingField {
                post: post.id.clone(),
                field: "media_url".to_string(),
            }
            .into());
        }
        if !seen.insert(post.id.clone()) {
            warn!("Dropping duplicate post {}", post.id);
            continue;
        }
        valid.push(post);
    }

    if valid.windows(2).any(|w| w[0].timestamp < w[1].timestamp) {
        warn!("Feed is not in reverse chronological order; keeping provider order");
    }

    Ok(valid)
}

/// One media file a post needs, and the cached file that already satisfies it.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaTask {
    pub post_index: usize,
    pub slot: usize,
    pub stem: String,
    pub url: String,
    pub cached: Option<String>,
}

pub fn plan(posts: &[RemotePost], cached: &HashMap<String, String>) -> Vec<MediaTask> {
    posts
        .iter()
        .enumerate()
        .flat_map(|(post_index, post)| {
            post.media_urls.iter().enumerate().map(move |(slot, url)| {
                let stem = media_stem(&post.id, slot);
                let cached = cached.get(&stem).cloned();
                MediaTask {
                    post_index,
                    slot,
                    stem,
                    url: url.clone(),
                    cached,
                }
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    pub file_name: String,
    pub downloaded: bool,
}

#[derive(Debug)]
pub struct MediaOutcome {
    pub task: MediaTask,
    pub result: Result<ResolvedMedia, CoreError>,
}

/// Fetch every uncached file, at most `concurrency` at a time. Outcomes come back in task order.
///
/// Under [`MediaErrorPolicy::Abort`] the first failure is returned as soon as it arrives and
/// no further downloads are started; in-flight ones are dropped.
pub async fn download(
    source: &dyn FeedSource,
    cache: &MediaCache,
    tasks: Vec<MediaTask>,
    concurrency: usize,
    policy: MediaErrorPolicy,
) -> Result<Vec<MediaOutcome>, CoreError> {
    let total = tasks.len();
    let outcomes = stream::iter(tasks)
        .map(|task| async move {
            let result = match &task.cached {
                Some(file_name) => {
                    debug!("Media cached: {}", file_name);
                    Ok(ResolvedMedia {
                        file_name: file_name.clone(),
                        downloaded: false,
                    })
                }
                None => fetch_one(source, cache, &task).await,
            };
            MediaOutcome { task, result }
        })
        .buffered(concurrency.max(1));
    futures::pin_mut!(outcomes);

    let mut resolved = Vec::with_capacity(total);
    while let Some(outcome) = outcomes.next().await {
        match outcome.result {
            Err(e) if policy == MediaErrorPolicy::Abort => {
                warn!(
                    "Media download for {} failed, stopping after {} of {} files",
                    outcome.task.stem,
                    resolved.len(),
                    total
                );
                return Err(e);
            }
            result => resolved.push(MediaOutcome {
                task: outcome.task,
                result,
            }),
        }
    }
    Ok(resolved)
}

async fn fetch_one(
    source: &dyn FeedSource,
    cache: &MediaCache,
    task: &MediaTask,
) -> Result<ResolvedMedia, CoreError> {
    let payload = source.fetch_media(&task.url).await?;
    let file_name = cache.store(&task.stem, &payload, &task.url)?;
    Ok(ResolvedMedia {
        file_name,
        downloaded: true,
    })
}

/// Posts with local media paths, plus what the run did to get there.
#[derive(Debug, Default)]
pub struct Assembled {
    pub posts: Vec<Post>,
    pub skipped: Vec<String>,
    /// Media file names referenced by `posts`.
    pub referenced: HashSet<String>,
    pub downloaded: usize,
    pub reused: usize,
}

pub fn assemble(
    posts: Vec<RemotePost>,
    outcomes: Vec<MediaOutcome>,
    policy: MediaErrorPolicy,
    cache: &MediaCache,
) -> Result<Assembled, CoreError> {
    let mut per_post: Vec<Vec<Result<ResolvedMedia, CoreError>>> =
        posts.iter().map(|_| Vec::new()).collect();
    for outcome in outcomes {
        if let Some(slots) = per_post.get_mut(outcome.task.post_index) {
            slots.push(outcome.result);
        }
    }

    let mut assembled = Assembled::default();
    for (post, slots) in posts.into_iter().zip(per_post) {
        let mut files = Vec::with_capacity(slots.len());
        let mut failure = None;
        for slot in slots {
            match slot {
                Ok(resolved) => files.push(resolved),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            match policy {
                MediaErrorPolicy::Abort => return Err(e),
                MediaErrorPolicy::Skip => {
                    e.log_warn();
                    warn!("Skipping post {} after media failure", post.id);
                    assembled.skipped.push(post.id);
                    continue;
                }
            }
        }

        let mut media = Vec::with_capacity(files.len());
        for resolved in files {
            if resolved.downloaded {
                assembled.downloaded += 1;
            } else {
                assembled.reused += 1;
            }
            media.push(cache.public_path(&resolved.file_name));
            assembled.referenced.insert(resolved.file_name);
        }
        assembled.posts.push(Post::from_remote(post, media));
    }

    Ok(assembled)
}
