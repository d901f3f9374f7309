use feedsync_core::{CoreError, ErrorCategory, ErrorExt, FeedApiError, RetryConfig, Secret};
use instagram_client::{FeedSource, GraphApiSource, WebProfileSource};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SESSION: &str = "4242%3Asession";
const TOKEN: &str = "IGQVJ-test-token";

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
        jitter_factor: 0.0,
        ..Default::default()
    }
}

fn web_source(server: &MockServer) -> WebProfileSource {
    WebProfileSource::new(
        Some(&server.uri()),
        "studio",
        Secret::new(SESSION),
        Duration::from_secs(5),
        fast_retry(),
    )
    .unwrap()
}

fn graph_source(server: &MockServer) -> GraphApiSource {
    GraphApiSource::new(
        Some(&server.uri()),
        Secret::new(TOKEN),
        Duration::from_secs(5),
        fast_retry(),
    )
    .unwrap()
}

fn profile_body(shortcodes: &[&str]) -> serde_json::Value {
    let edges: Vec<_> = shortcodes
        .iter()
        .enumerate()
        .map(|(n, code)| {
            json!({"node": {
                "shortcode": code,
                "display_url": format!("https://cdn.example/{}.jpg", code),
                "taken_at_timestamp": 1714600000 - n as i64 * 3600,
            }})
        })
        .collect();
    json!({"data": {"user": {
        "id": "4242",
        "edge_owner_to_timeline_media": {"edges": edges}
    }}})
}

fn feed_body(codes: &[&str]) -> serde_json::Value {
    let items: Vec<_> = codes
        .iter()
        .enumerate()
        .map(|(n, code)| {
            json!({
                "code": code,
                "taken_at": 1714600000 - n as i64 * 3600,
                "caption": {"text": format!("caption {}", code)},
                "image_versions2": {"candidates": [
                    {"url": format!("https://cdn.example/{}_1080.jpg", code)}
                ]}
            })
        })
        .collect();
    json!({"items": items})
}

async fn mount_profile(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/api/v1/users/web_profile_info/"))
        .and(query_param("username", "studio"))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn mount_user_feed(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/api/v1/feed/user/4242/"))
        .respond_with(response)
        .mount(server)
        .await;
}

fn ids(posts: &[feedsync_core::RemotePost]) -> Vec<&str> {
    posts.iter().map(|p| p.id.as_str()).collect()
}

#[tokio::test]
async fn test_web_profile_sends_session_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/users/web_profile_info/"))
        .and(header("cookie", format!("sessionid={}", SESSION).as_str()))
        .and(header("x-ig-app-id", "936619743392459"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_body(&["Ca", "Cb"])))
        .expect(1)
        .mount(&server)
        .await;

    let posts = web_source(&server).fetch_recent(2).await.unwrap();
    assert_eq!(ids(&posts), vec!["Ca", "Cb"]);
    assert_eq!(posts[0].permalink, "https://www.instagram.com/p/Ca/");
}

#[tokio::test]
async fn test_web_missing_profile_is_not_found() {
    let server = MockServer::start().await;
    mount_profile(&server, ResponseTemplate::new(404)).await;

    let err = web_source(&server).fetch_recent(3).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::FeedApi(FeedApiError::ProfileNotFound { ref username }) if username == "studio"
    ));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_web_rejected_session_is_auth_error() {
    let server = MockServer::start().await;
    mount_profile(&server, ResponseTemplate::new(401)).await;

    let err = web_source(&server).fetch_recent(3).await.unwrap_err();
    assert!(matches!(err, CoreError::FeedApi(FeedApiError::InvalidToken)));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_web_login_redirect_is_auth_error() {
    let server = MockServer::start().await;
    mount_profile(
        &server,
        ResponseTemplate::new(302).insert_header("location", "/accounts/login/"),
    )
    .await;

    let err = web_source(&server).fetch_recent(3).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Auth);
    // The redirect target is never requested
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), "/api/v1/users/web_profile_info/");
}

#[tokio::test]
async fn test_web_short_profile_falls_back_to_user_feed() {
    let server = MockServer::start().await;
    mount_profile(
        &server,
        ResponseTemplate::new(200).set_body_json(profile_body(&["Ca"])),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/feed/user/4242/"))
        .and(query_param("count", "3"))
        .and(header("cookie", format!("sessionid={}", SESSION).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(feed_body(&["Ca", "Cb", "Cc"])))
        .expect(1)
        .mount(&server)
        .await;

    let posts = web_source(&server).fetch_recent(3).await.unwrap();
    assert_eq!(ids(&posts), vec!["Ca", "Cb", "Cc"]);
    assert_eq!(posts[1].caption.as_deref(), Some("caption Cb"));
    assert_eq!(posts[2].media_urls, vec!["https://cdn.example/Cc_1080.jpg"]);
}

#[tokio::test]
async fn test_web_full_profile_skips_user_feed() {
    let server = MockServer::start().await;
    mount_profile(
        &server,
        ResponseTemplate::new(200).set_body_json(profile_body(&["Ca", "Cb", "Cc"])),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/feed/user/4242/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feed_body(&["Cx"])))
        .expect(0)
        .mount(&server)
        .await;

    let posts = web_source(&server).fetch_recent(2).await.unwrap();
    assert_eq!(ids(&posts), vec!["Ca", "Cb"]);
}

#[tokio::test]
async fn test_web_user_feed_auth_failure_propagates() {
    let server = MockServer::start().await;
    mount_profile(
        &server,
        ResponseTemplate::new(200).set_body_json(profile_body(&["Ca"])),
    )
    .await;
    mount_user_feed(&server, ResponseTemplate::new(401)).await;

    let err = web_source(&server).fetch_recent(3).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Auth);
}

#[tokio::test]
async fn test_web_user_feed_server_error_keeps_profile_posts() {
    let server = MockServer::start().await;
    mount_profile(
        &server,
        ResponseTemplate::new(200).set_body_json(profile_body(&["Ca", "Cb"])),
    )
    .await;
    mount_user_feed(&server, ResponseTemplate::new(500)).await;

    let source = web_source(&server);
    let posts = source.fetch_recent(3).await.unwrap();
    assert_eq!(ids(&posts), vec!["Ca", "Cb"]);

    // Every attempt is spent on the feed endpoint before giving up on it
    let feed_requests = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/api/v1/feed/user/4242/")
        .count();
    assert_eq!(feed_requests, 3);
    assert_eq!(source.retry_metrics().failed_operations, 1);
}

#[tokio::test]
async fn test_web_user_feed_failure_with_empty_profile_propagates() {
    let server = MockServer::start().await;
    mount_profile(
        &server,
        ResponseTemplate::new(200).set_body_json(profile_body(&[])),
    )
    .await;
    mount_user_feed(&server, ResponseTemplate::new(500)).await;

    let err = web_source(&server).fetch_recent(3).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::FeedApi(FeedApiError::ServerError { status_code: 500 })
    ));
}

fn graph_page() -> serde_json::Value {
    json!({"data": [{
        "id": "1790",
        "caption": "Nueva colección",
        "media_type": "IMAGE",
        "media_url": "https://cdn.example/1790.jpg",
        "timestamp": "2024-05-02T10:00:00+0000",
        "permalink": "https://www.instagram.com/p/Cabc/"
    }]})
}

#[tokio::test]
async fn test_graph_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me/media"))
        .and(query_param("limit", "6"))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(graph_page()))
        .expect(1)
        .mount(&server)
        .await;

    let source = graph_source(&server);
    let posts = source.fetch_recent(6).await.unwrap();
    assert_eq!(ids(&posts), vec!["1790"]);
    assert_eq!(source.retry_metrics().total_retries, 0);
}

#[tokio::test]
async fn test_graph_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me/media"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(graph_page()))
        .mount(&server)
        .await;

    let source = graph_source(&server);
    let posts = source.fetch_recent(6).await.unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    let metrics = source.retry_metrics();
    assert_eq!(metrics.total_retries, 1);
    assert_eq!(metrics.successful_retries, 1);
}

#[tokio::test]
async fn test_graph_expired_token_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me/media"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": {
            "message": "Error validating access token: Session has expired",
            "type": "OAuthException",
            "code": 190,
            "fbtrace_id": "AbC"
        }})))
        .mount(&server)
        .await;

    let err = graph_source(&server).fetch_recent(6).await.unwrap_err();
    assert!(matches!(err, CoreError::FeedApi(FeedApiError::InvalidToken)));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_media_download_carries_no_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v/t51/1790_n.jpg"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/jpeg")
                .set_body_bytes(vec![0xFF, 0xD8, 0xFF]),
        )
        .mount(&server)
        .await;
    let url = format!("{}/v/t51/1790_n.jpg?oh=signed", server.uri());

    let graph = graph_source(&server).fetch_media(&url).await.unwrap();
    let web = web_source(&server).fetch_media(&url).await.unwrap();
    assert_eq!(graph.bytes, vec![0xFF, 0xD8, 0xFF]);
    assert_eq!(web.content_type.as_deref(), Some("image/jpeg"));

    for request in server.received_requests().await.unwrap() {
        assert!(request.headers.get("authorization").is_none());
        assert!(request.headers.get("cookie").is_none());
    }
}
