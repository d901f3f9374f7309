//! Instagram Graph API provider (`/me/media`, bearer access token).

use crate::api::{ApiAuth, ApiClient};
use crate::retry::RetryMetrics;
use crate::source::{FeedSource, MediaPayload};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feedsync_core::{CoreError, FeedApiError, RemotePost, RetryConfig, Secret};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

pub const GRAPH_API_BASE: &str = "https://graph.instagram.com";

const MEDIA_FIELDS: &str = "id,caption,media_type,media_url,thumbnail_url,timestamp,permalink,\
children{media_type,media_url,thumbnail_url}";

#[derive(Debug, Clone, Deserialize)]
pub struct GraphMediaPage {
    #[serde(default)]
    pub data: Vec<GraphMedia>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphMedia {
    pub id: Option<String>,
    pub caption: Option<String>,
    pub media_type: Option<String>,
    pub media_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub timestamp: Option<String>,
    pub permalink: Option<String>,
    pub children: Option<GraphChildren>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphChildren {
    #[serde(default)]
    pub data: Vec<GraphChild>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphChild {
    pub media_type: Option<String>,
    pub media_url: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// Videos render as their thumbnail image, falling back to the video itself.
fn display_url(
    media_type: Option<&str>,
    media_url: Option<&String>,
    thumbnail_url: Option<&String>,
) -> Option<String> {
    let preferred = if media_type == Some("VIDEO") {
        thumbnail_url.or(media_url)
    } else {
        media_url.or(thumbnail_url)
    };
    preferred.filter(|u| !u.is_empty()).cloned()
}

/// Graph timestamps look like `2024-05-01T18:30:00+0000`.
pub fn parse_graph_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl GraphMedia {
    pub fn into_remote(self, index: usize) -> Result<RemotePost, CoreError> {
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| missing(format!("#{}", index), "id"))?;

        let mut media_urls: Vec<String> = self
            .children
            .map(|children| {
                children
                    .data
                    .iter()
                    .filter_map(|child| {
                        display_url(
                            child.media_type.as_deref(),
                            child.media_url.as_ref(),
                            child.thumbnail_url.as_ref(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        if media_urls.is_empty() {
            if let Some(url) = display_url(
                self.media_type.as_deref(),
                self.media_url.as_ref(),
                self.thumbnail_url.as_ref(),
            ) {
                media_urls.push(url);
            }
        }
        if media_urls.is_empty() {
            return Err(missing(id, "media_url"));
        }

        let timestamp = match self.timestamp.as_deref() {
            Some(raw) => parse_graph_timestamp(raw).ok_or_else(|| {
                CoreError::FeedApi(FeedApiError::InvalidResponse {
                    details: format!("post {} has unparseable timestamp '{}'", id, raw),
                })
            })?,
            None => return Err(missing(id, "timestamp")),
        };

        let permalink = match self.permalink.filter(|p| !p.is_empty()) {
            Some(permalink) => permalink,
            None => return Err(missing(id, "permalink")),
        };

        Ok(RemotePost {
            id,
            caption: self.caption.filter(|c| !c.is_empty()),
            media_urls,
            timestamp,
            permalink,
        })
    }
}

fn missing(post: String, field: &str) -> CoreError {
    CoreError::FeedApi(FeedApiError::MissingField {
        post,
        field: field.to_string(),
    })
}

/// Convert a page of Graph media objects, keeping at most `limit` in API order.
pub fn parse_graph_page(page: GraphMediaPage, limit: usize) -> Result<Vec<RemotePost>, CoreError> {
    page.data
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(index, media)| media.into_remote(index))
        .collect()
}

#[derive(Debug)]
pub struct GraphApiSource {
    api: ApiClient,
}

impl GraphApiSource {
    pub fn new(
        base_url: Option<&str>,
        access_token: Secret,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self, CoreError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(crate::USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let api = ApiClient::new(
            base_url.unwrap_or(GRAPH_API_BASE),
            ApiAuth::Bearer(access_token),
            headers,
            timeout,
            retry,
        )?;
        Ok(Self { api })
    }
}

#[async_trait]
impl FeedSource for GraphApiSource {
    fn name(&self) -> &'static str {
        "graph"
    }

    async fn fetch_recent(&self, limit: usize) -> Result<Vec<RemotePost>, CoreError> {
        let query = [
            ("fields", MEDIA_FIELDS.to_string()),
            ("limit", limit.to_string()),
        ];
        let page: GraphMediaPage = self.api.get_json("/me/media", &query).await?;
        let posts = parse_graph_page(page, limit)?;
        info!("Retrieved {} posts from the Graph API", posts.len());
        Ok(posts)
    }

    async fn fetch_media(&self, url: &str) -> Result<MediaPayload, CoreError> {
        self.api.get_media(url).await
    }

    fn retry_metrics(&self) -> RetryMetrics {
        self.api.retry_metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn page(value: serde_json::Value) -> GraphMediaPage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_graph_page() {
        let page = page(json!({
            "data": [
                {
                    "id": "1790",
                    "caption": "Nueva colección",
                    "media_type": "IMAGE",
                    "media_url": "https://cdn.example/1790.jpg",
                    "timestamp": "2024-05-02T10:00:00+0000",
                    "permalink": "https://www.instagram.com/p/Cabc/"
                },
                {
                    "id": "1789",
                    "media_type": "CAROUSEL_ALBUM",
                    "media_url": "https://cdn.example/1789.jpg",
                    "timestamp": "2024-05-01T10:00:00+0000",
                    "permalink": "https://www.instagram.com/p/Cabd/",
                    "children": {"data": [
                        {"media_type": "IMAGE", "media_url": "https://cdn.example/c1.jpg"},
                        {"media_type": "VIDEO", "media_url": "https://cdn.example/c2.mp4",
                         "thumbnail_url": "https://cdn.example/c2.jpg"}
                    ]}
                }
            ],
            "paging": {"cursors": {"before": "x", "after": "y"}}
        }));

        let posts = parse_graph_page(page, 9).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].id, "1790");
        assert_eq!(posts[0].caption.as_deref(), Some("Nueva colección"));
        assert_eq!(
            posts[0].timestamp,
            Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap()
        );
        assert_eq!(
            posts[1].media_urls,
            vec!["https://cdn.example/c1.jpg", "https://cdn.example/c2.jpg"]
        );
        assert_eq!(posts[1].caption, None);
    }

    #[test]
    fn test_parse_graph_page_respects_limit() {
        let items: Vec<_> = (0..5)
            .map(|i| {
                json!({
                    "id": format!("id{}", i),
                    "media_url": "https://cdn.example/x.jpg",
                    "timestamp": "2024-05-01T10:00:00+00:00",
                    "permalink": "https://www.instagram.com/p/x/"
                })
            })
            .collect();
        let posts = parse_graph_page(page(json!({ "data": items })), 3).unwrap();
        assert_eq!(
            posts.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["id0", "id1", "id2"]
        );
    }

    #[test]
    fn test_missing_fields_are_parse_errors() {
        let no_media = page(json!({"data": [{
            "id": "1",
            "timestamp": "2024-05-01T10:00:00+0000",
            "permalink": "https://www.instagram.com/p/x/"
        }]}));
        let err = parse_graph_page(no_media, 9).unwrap_err();
        assert!(matches!(
            err,
            CoreError::FeedApi(FeedApiError::MissingField { ref field, .. }) if field == "media_url"
        ));

        let no_permalink = page(json!({"data": [{
            "id": "1",
            "media_url": "https://cdn.example/x.jpg",
            "timestamp": "2024-05-01T10:00:00+0000"
        }]}));
        let err = parse_graph_page(no_permalink, 9).unwrap_err();
        assert!(matches!(
            err,
            CoreError::FeedApi(FeedApiError::MissingField { ref field, .. }) if field == "permalink"
        ));

        let bad_time = page(json!({"data": [{
            "id": "1",
            "media_url": "https://cdn.example/x.jpg",
            "timestamp": "yesterday",
            "permalink": "https://www.instagram.com/p/x/"
        }]}));
        assert!(matches!(
            parse_graph_page(bad_time, 9),
            Err(CoreError::FeedApi(FeedApiError::InvalidResponse { .. }))
        ));
    }

    #[test]
    fn test_video_prefers_thumbnail() {
        let media = GraphMedia {
            id: Some("v1".to_string()),
            caption: None,
            media_type: Some("VIDEO".to_string()),
            media_url: Some("https://cdn.example/v1.mp4".to_string()),
            thumbnail_url: Some("https://cdn.example/v1.jpg".to_string()),
            timestamp: Some("2024-05-01T10:00:00+0000".to_string()),
            permalink: Some("https://www.instagram.com/reel/v1/".to_string()),
            children: None,
        };
        let post = media.into_remote(0).unwrap();
        assert_eq!(post.media_urls, vec!["https://cdn.example/v1.jpg"]);
    }
}
