use crate::retry::{RetryExecutor, RetryMetrics};
use crate::source::MediaPayload;
use feedsync_core::{ConfigError, CoreError, FeedApiError, RetryConfig, Secret};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE, RETRY_AFTER};
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Backoff used for a 429 that carries no usable `Retry-After` header.
const DEFAULT_RATE_LIMIT_BACKOFF_SECS: u64 = 10;

/// How requests to the provider API are authenticated.
#[derive(Debug, Clone)]
pub enum ApiAuth {
    /// `Authorization: Bearer <token>`
    Bearer(Secret),
    /// `Cookie: sessionid=<id>`
    SessionCookie(Secret),
}

/// API calls carry credentials and treat 401/403/3xx as auth failures.
/// Media calls go to CDN hosts, never carry credentials and follow redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Api,
    Media,
}

#[derive(Debug)]
pub struct ApiClient {
    http_client: Client,
    media_client: Client,
    base_url: String,
    auth: ApiAuth,
    retry: RetryExecutor,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        auth: ApiAuth,
        headers: HeaderMap,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self, CoreError> {
        let invalid_base = |reason: String| ConfigError::InvalidValue {
            field: "api_base_url".to_string(),
            value: format!("{} ({})", base_url, reason),
        };
        let parsed = url::Url::parse(base_url).map_err(|e| invalid_base(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid_base("unsupported scheme".to_string()).into());
        }

        let http_client = Client::builder()
            .default_headers(headers.clone())
            .timeout(timeout)
            .redirect(Policy::none())
            .build()?;
        let media_client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            media_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            retry: RetryExecutor::new(retry),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `{base_url}{endpoint}` and decode the JSON body, retrying transient failures.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, CoreError> {
        let url = format!("{}{}", self.base_url, endpoint);
        self.retry
            .execute(endpoint, || self.get_json_once(&url, endpoint, query))
            .await
    }

    async fn get_json_once<T: DeserializeOwned>(
        &self,
        url: &str,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, CoreError> {
        let start_time = Instant::now();
        let request = self.authorize(self.http_client.get(url).query(query));

        debug!("Making feed API request: GET {}", endpoint);
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, endpoint))?;

        let status = response.status();
        if !status.is_success() {
            error!("Request failed with status: {} for {}", status, endpoint);
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(parse_retry_after);
            let body = response.bytes().await.unwrap_or_default();
            return Err(classify_api_failure(status, retry_after, &body, endpoint));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, endpoint))?;
        debug!(
            endpoint,
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Request successful"
        );

        decode_json(&body, endpoint)
    }

    /// Download a media file without credentials, retrying transient failures.
    pub async fn get_media(&self, url: &str) -> Result<MediaPayload, CoreError> {
        let resource = media_resource_name(url);
        self.retry
            .execute(&resource, || self.get_media_once(url, &resource))
            .await
    }

    async fn get_media_once(&self, url: &str, resource: &str) -> Result<MediaPayload, CoreError> {
        let response = self
            .media_client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(e, resource))?;

        let status = response.status();
        if !status.is_success() {
            error!("Media download failed with status: {} for {}", status, resource);
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(parse_retry_after);
            return Err(classify_status(status, retry_after, resource, RequestKind::Media));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(normalize_content_type);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, resource))?;
        if bytes.is_empty() {
            return Err(FeedApiError::Transport {
                resource: resource.to_string(),
                reason: "empty response body".to_string(),
            }
            .into());
        }

        debug!("Downloaded {} bytes from {}", bytes.len(), resource);
        Ok(MediaPayload {
            bytes: bytes.to_vec(),
            content_type,
        })
    }

    pub fn retry_metrics(&self) -> RetryMetrics {
        self.retry.get_metrics()
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            ApiAuth::Bearer(token) => request.bearer_auth(token.expose()),
            ApiAuth::SessionCookie(session_id) => {
                request.header(COOKIE, format!("sessionid={}", session_id.expose()))
            }
        }
    }
}

/// Map a non-success status to the error taxonomy.
pub fn classify_status(
    status: StatusCode,
    retry_after: Option<u64>,
    resource: &str,
    kind: RequestKind,
) -> CoreError {
    let code = status.as_u16();
    let error = match (code, kind) {
        (401, RequestKind::Api) => FeedApiError::InvalidToken,
        (403, RequestKind::Api) => FeedApiError::AuthenticationFailed {
            reason: format!("access to {} forbidden", resource),
        },
        (300..=399, RequestKind::Api) => FeedApiError::AuthenticationFailed {
            reason: format!("{} redirected, session likely logged out", resource),
        },
        (429, _) => FeedApiError::RateLimitExceeded {
            retry_after: retry_after.unwrap_or(DEFAULT_RATE_LIMIT_BACKOFF_SECS),
        },
        (500..=599, _) => FeedApiError::ServerError { status_code: code },
        _ => FeedApiError::RequestFailed {
            resource: resource.to_string(),
            status_code: code,
        },
    };
    CoreError::FeedApi(error)
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<i64>,
}

/// Graph API code for an invalid or expired access token.
const OAUTH_INVALID_TOKEN_CODE: i64 = 190;

/// Graph reports a rejected token as 400 with an `OAuthException` body.
fn is_oauth_rejection(body: &[u8]) -> bool {
    serde_json::from_slice::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .map(|e| {
            e.kind.as_deref() == Some("OAuthException") || e.code == Some(OAUTH_INVALID_TOKEN_CODE)
        })
        .unwrap_or(false)
}

/// Classify a failed API call, looking at the error body where the status alone is ambiguous.
pub fn classify_api_failure(
    status: StatusCode,
    retry_after: Option<u64>,
    body: &[u8],
    resource: &str,
) -> CoreError {
    if status == StatusCode::BAD_REQUEST && is_oauth_rejection(body) {
        return CoreError::FeedApi(FeedApiError::InvalidToken);
    }
    classify_status(status, retry_after, resource, RequestKind::Api)
}

pub fn parse_retry_after(value: &HeaderValue) -> Option<u64> {
    value.to_str().ok()?.trim().parse().ok()
}

pub fn decode_json<T: DeserializeOwned>(body: &[u8], endpoint: &str) -> Result<T, CoreError> {
    serde_json::from_slice(body).map_err(|e| {
        error!("Failed to parse response from {}: {}", endpoint, e);
        CoreError::FeedApi(FeedApiError::InvalidResponse {
            details: format!("{}: {}", endpoint, e),
        })
    })
}

fn transport_error(error: reqwest::Error, resource: &str) -> CoreError {
    let api_error = if error.is_timeout() {
        FeedApiError::RequestTimeout {
            resource: resource.to_string(),
        }
    } else {
        FeedApiError::Transport {
            resource: resource.to_string(),
            reason: error.without_url().to_string(),
        }
    };
    CoreError::FeedApi(api_error)
}

/// `image/jpeg; charset=binary` -> `image/jpeg`
fn normalize_content_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Host and path of a media URL. CDN query strings are long signed tokens and stay out of logs.
pub fn media_resource_name(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => format!("{}{}", parsed.host_str().unwrap_or_default(), parsed.path()),
        Err(_) => "media".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_classify_api_statuses() {
        let err = classify_status(StatusCode::UNAUTHORIZED, None, "/me/media", RequestKind::Api);
        assert!(matches!(err, CoreError::FeedApi(FeedApiError::InvalidToken)));

        let err = classify_status(StatusCode::FORBIDDEN, None, "/me/media", RequestKind::Api);
        assert!(matches!(
            err,
            CoreError::FeedApi(FeedApiError::AuthenticationFailed { .. })
        ));

        let err = classify_status(StatusCode::FOUND, None, "/api/v1/users", RequestKind::Api);
        assert!(matches!(
            err,
            CoreError::FeedApi(FeedApiError::AuthenticationFailed { .. })
        ));

        let err = classify_status(StatusCode::BAD_GATEWAY, None, "/me/media", RequestKind::Api);
        assert!(matches!(
            err,
            CoreError::FeedApi(FeedApiError::ServerError { status_code: 502 })
        ));
    }

    #[test]
    fn test_classify_media_statuses() {
        // Expired CDN signatures come back as 403 and are not credential problems
        let err = classify_status(StatusCode::FORBIDDEN, None, "cdn/x.jpg", RequestKind::Media);
        assert!(matches!(
            err,
            CoreError::FeedApi(FeedApiError::RequestFailed {
                status_code: 403,
                ..
            })
        ));

        let err = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(7),
            "cdn/x.jpg",
            RequestKind::Media,
        );
        assert!(matches!(
            err,
            CoreError::FeedApi(FeedApiError::RateLimitExceeded { retry_after: 7 })
        ));

        let err = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            None,
            "cdn/x.jpg",
            RequestKind::Media,
        );
        assert!(matches!(
            err,
            CoreError::FeedApi(FeedApiError::RateLimitExceeded { retry_after: 10 })
        ));
    }

    #[test]
    fn test_expired_graph_token_is_auth_error() {
        use feedsync_core::{ErrorCategory, ErrorExt};

        let body = br#"{"error": {
            "message": "Error validating access token: Session has expired",
            "type": "OAuthException",
            "code": 190,
            "error_subcode": 463
        }}"#;
        let err = classify_api_failure(StatusCode::BAD_REQUEST, None, body, "/me/media");
        assert!(matches!(err, CoreError::FeedApi(FeedApiError::InvalidToken)));
        assert_eq!(err.category(), ErrorCategory::Auth);
        assert_eq!(err.exit_code(), 2);

        let code_only = br#"{"error":{"code":190}}"#;
        let err = classify_api_failure(StatusCode::BAD_REQUEST, None, code_only, "/me/media");
        assert!(matches!(err, CoreError::FeedApi(FeedApiError::InvalidToken)));

        let other = br#"{"error":{"type":"GraphMethodException","code":100}}"#;
        let err = classify_api_failure(StatusCode::BAD_REQUEST, None, other, "/me/media");
        assert!(matches!(
            err,
            CoreError::FeedApi(FeedApiError::RequestFailed {
                status_code: 400,
                ..
            })
        ));

        let err = classify_api_failure(StatusCode::BAD_REQUEST, None, b"", "/me/media");
        assert_eq!(err.category(), ErrorCategory::Fetch);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(&HeaderValue::from_static("30")), Some(30));
        assert_eq!(parse_retry_after(&HeaderValue::from_static(" 5 ")), Some(5));
        assert_eq!(
            parse_retry_after(&HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT")),
            None
        );
    }

    #[test]
    fn test_decode_json_failure_is_parse_error() {
        #[derive(Debug, Deserialize)]
        struct Body {
            #[allow(dead_code)]
            data: Vec<String>,
        }

        let ok: Body = decode_json(br#"{"data": ["a"]}"#, "/me/media").unwrap();
        assert_eq!(ok.data.len(), 1);

        let err = decode_json::<Body>(b"<html>login</html>", "/me/media").unwrap_err();
        assert!(matches!(
            err,
            CoreError::FeedApi(FeedApiError::InvalidResponse { ref details })
                if details.starts_with("/me/media")
        ));
    }

    #[test]
    fn test_media_resource_name_drops_query() {
        let name = media_resource_name(
            "https://scontent.cdninstagram.com/v/t51/123_n.jpg?stp=dst&_nc_ht=abc&oh=secret",
        );
        assert_eq!(name, "scontent.cdninstagram.com/v/t51/123_n.jpg");
        assert_eq!(media_resource_name("not a url"), "media");
    }

    #[test]
    fn test_normalize_content_type() {
        assert_eq!(normalize_content_type("Image/JPEG; charset=binary"), "image/jpeg");
        assert_eq!(normalize_content_type("video/mp4"), "video/mp4");
    }

    #[test]
    fn test_client_rejects_bad_base_url() {
        let result = ApiClient::new(
            "ftp://graph.instagram.com",
            ApiAuth::Bearer(Secret::new("token")),
            HeaderMap::new(),
            Duration::from_secs(5),
            RetryConfig::default(),
        );
        assert!(matches!(
            result,
            Err(CoreError::Config(ConfigError::InvalidValue { .. }))
        ));

        let client = ApiClient::new(
            "https://graph.instagram.com/",
            ApiAuth::Bearer(Secret::new("token")),
            HeaderMap::new(),
            Duration::from_secs(5),
            RetryConfig::default(),
        )
        .unwrap();
        assert_eq!(client.base_url(), "https://graph.instagram.com");
    }

    #[test]
    fn test_auth_debug_is_redacted() {
        let auth = ApiAuth::SessionCookie(Secret::new("1234%3Asecret"));
        assert!(!format!("{:?}", auth).contains("secret"));
    }
}
