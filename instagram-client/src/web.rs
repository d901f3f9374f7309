//! Instagram web profile provider.
//!
//! Reads the public profile endpoint the instagram.com frontend uses, authenticated with a
//! `sessionid` cookie. Profile data embeds the most recent posts; when it carries fewer than
//! requested, the user feed endpoint is tried as a second source.

use crate::api::{ApiAuth, ApiClient};
use crate::retry::RetryMetrics;
use crate::source::{FeedSource, MediaPayload};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use feedsync_core::{
    CoreError, ErrorCategory, ErrorExt, FeedApiError, RemotePost, RetryConfig, Secret,
};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER, USER_AGENT,
};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

pub const WEB_API_BASE: &str = "https://www.instagram.com";

/// App id the instagram.com web client sends with its API calls.
const WEB_APP_ID: &str = "936619743392459";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Deserialize)]
pub struct Edges<T> {
    #[serde(default = "Vec::new")]
    pub edges: Vec<Edge<T>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Edge<T> {
    pub node: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileResponse {
    pub data: Option<ProfileData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileData {
    pub user: Option<ProfileUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUser {
    pub id: Option<String>,
    pub edge_owner_to_timeline_media: Option<Edges<TimelineNode>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelineNode {
    pub shortcode: Option<String>,
    pub display_url: Option<String>,
    pub taken_at_timestamp: Option<i64>,
    pub edge_media_to_caption: Option<Edges<CaptionNode>>,
    pub edge_sidecar_to_children: Option<Edges<SidecarNode>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptionNode {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SidecarNode {
    pub display_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserFeedResponse {
    #[serde(default)]
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedItem {
    pub code: Option<String>,
    pub taken_at: Option<i64>,
    pub caption: Option<FeedCaption>,
    pub image_versions2: Option<ImageVersions>,
    pub carousel_media: Option<Vec<CarouselItem>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedCaption {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageVersions {
    #[serde(default)]
    pub candidates: Vec<ImageCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageCandidate {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CarouselItem {
    pub image_versions2: Option<ImageVersions>,
}

impl ImageVersions {
    /// Candidates are ordered largest first.
    fn best_url(&self) -> Option<String> {
        self.candidates
            .first()
            .and_then(|c| c.url.clone())
            .filter(|u| !u.is_empty())
    }
}

pub fn permalink_for(shortcode: &str) -> String {
    format!("https://www.instagram.com/p/{}/", shortcode)
}

fn missing(post: String, field: &str) -> CoreError {
    CoreError::FeedApi(FeedApiError::MissingField {
        post,
        field: field.to_string(),
    })
}

fn unix_timestamp(
    post: &str,
    seconds: Option<i64>,
    field: &str,
) -> Result<DateTime<Utc>, CoreError> {
    let seconds = seconds.ok_or_else(|| missing(post.to_string(), field))?;
    Utc.timestamp_opt(seconds, 0).single().ok_or_else(|| {
        CoreError::FeedApi(FeedApiError::InvalidResponse {
            details: format!("post {} has out-of-range {} {}", post, field, seconds),
        })
    })
}

impl TimelineNode {
    pub fn into_remote(self, index: usize) -> Result<RemotePost, CoreError> {
        let shortcode = self
            .shortcode
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing(format!("#{}", index), "shortcode"))?;

        let mut media_urls: Vec<String> = self
            .edge_sidecar_to_children
            .map(|children| {
                children
                    .edges
                    .into_iter()
                    .filter_map(|edge| edge.node.display_url)
                    .filter(|u| !u.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if media_urls.is_empty() {
            match self.display_url.filter(|u| !u.is_empty()) {
                Some(url) => media_urls.push(url),
                None => return Err(missing(shortcode, "display_url")),
            }
        }

        let timestamp = unix_timestamp(&shortcode, self.taken_at_timestamp, "taken_at_timestamp")?;
        let caption = self
            .edge_media_to_caption
            .and_then(|captions| captions.edges.into_iter().next())
            .and_then(|edge| edge.node.text)
            .filter(|c| !c.is_empty());

        Ok(RemotePost {
            permalink: permalink_for(&shortcode),
            id: shortcode,
            caption,
            media_urls,
            timestamp,
        })
    }
}

impl FeedItem {
    pub fn into_remote(self, index: usize) -> Result<RemotePost, CoreError> {
        let code = self
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| missing(format!("#{}", index), "code"))?;

        let mut media_urls: Vec<String> = self
            .carousel_media
            .unwrap_or_default()
            .iter()
            .filter_map(|item| item.image_versions2.as_ref().and_then(ImageVersions::best_url))
            .collect();
        if media_urls.is_empty() {
            match self.image_versions2.as_ref().and_then(ImageVersions::best_url) {
                Some(url) => media_urls.push(url),
                None => return Err(missing(code, "image_versions2")),
            }
        }

        let timestamp = unix_timestamp(&code, self.taken_at, "taken_at")?;
        let caption = self
            .caption
            .and_then(|c| c.text)
            .filter(|c| !c.is_empty());

        Ok(RemotePost {
            permalink: permalink_for(&code),
            id: code,
            caption,
            media_urls,
            timestamp,
        })
    }
}

/// Pull the user id and embedded posts out of a profile response.
pub fn parse_profile(
    response: ProfileResponse,
    username: &str,
    limit: usize,
) -> Result<(String, Vec<RemotePost>), CoreError> {
    let user = response
        .data
        .and_then(|data| data.user)
        .ok_or_else(|| {
            CoreError::FeedApi(FeedApiError::ProfileNotFound {
                username: username.to_string(),
            })
        })?;
    let user_id = user.id.filter(|id| !id.is_empty()).ok_or_else(|| {
        CoreError::FeedApi(FeedApiError::InvalidResponse {
            details: format!("profile {} has no user id", username),
        })
    })?;

    let posts = user
        .edge_owner_to_timeline_media
        .map(|media| media.edges)
        .unwrap_or_default()
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(index, edge)| edge.node.into_remote(index))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((user_id, posts))
}

pub fn parse_user_feed(
    response: UserFeedResponse,
    limit: usize,
) -> Result<Vec<RemotePost>, CoreError> {
    response
        .items
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(index, item)| item.into_remote(index))
        .collect()
}

#[derive(Debug)]
pub struct WebProfileSource {
    api: ApiClient,
    username: String,
}

impl WebProfileSource {
    pub fn new(
        base_url: Option<&str>,
        username: &str,
        session_id: Secret,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self, CoreError> {
        let api = ApiClient::new(
            base_url.unwrap_or(WEB_API_BASE),
            ApiAuth::SessionCookie(session_id),
            browser_headers(),
            timeout,
            retry,
        )?;
        Ok(Self {
            api,
            username: username.to_string(),
        })
    }

    async fn fetch_profile(&self, limit: usize) -> Result<(String, Vec<RemotePost>), CoreError> {
        let query = [("username", self.username.clone())];
        let response: ProfileResponse = self
            .api
            .get_json("/api/v1/users/web_profile_info/", &query)
            .await
            .map_err(|e| match e {
                CoreError::FeedApi(FeedApiError::RequestFailed {
                    status_code: 404, ..
                }) => CoreError::FeedApi(FeedApiError::ProfileNotFound {
                    username: self.username.clone(),
                }),
                other => other,
            })?;
        parse_profile(response, &self.username, limit)
    }

    async fn fetch_user_feed(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<RemotePost>, CoreError> {
        let endpoint = format!("/api/v1/feed/user/{}/", user_id);
        let query = [("count", limit.to_string())];
        let response: UserFeedResponse = self.api.get_json(&endpoint, &query).await?;
        parse_user_feed(response, limit)
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(
        HeaderName::from_static("x-ig-app-id"),
        HeaderValue::from_static(WEB_APP_ID),
    );
    headers.insert(
        HeaderName::from_static("x-requested-with"),
        HeaderValue::from_static("XMLHttpRequest"),
    );
    headers.insert(REFERER, HeaderValue::from_static("https://www.instagram.com/"));
    headers.insert(ORIGIN, HeaderValue::from_static("https://www.instagram.com"));
    headers
}

#[async_trait]
impl FeedSource for WebProfileSource {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn fetch_recent(&self, limit: usize) -> Result<Vec<RemotePost>, CoreError> {
        info!("Fetching profile of @{}", self.username);
        let (user_id, profile_posts) = self.fetch_profile(limit).await?;
        info!("Profile {} embeds {} posts", user_id, profile_posts.len());

        if profile_posts.len() >= limit {
            return Ok(profile_posts);
        }

        info!("Trying the user feed endpoint for more posts");
        match self.fetch_user_feed(&user_id, limit).await {
            Ok(feed_posts) if !feed_posts.is_empty() => Ok(feed_posts),
            Ok(_) => Ok(profile_posts),
            Err(e) if e.category() == ErrorCategory::Auth || profile_posts.is_empty() => Err(e),
            Err(e) => {
                warn!(
                    "User feed endpoint failed, keeping {} profile posts: {}",
                    profile_posts.len(),
                    e
                );
                Ok(profile_posts)
            }
        }
    }

    async fn fetch_media(&self, url: &str) -> Result<MediaPayload, CoreError> {
        self.api.get_media(url).await
    }

    fn retry_metrics(&self) -> RetryMetrics {
        self.api.retry_metrics()
    }
}
