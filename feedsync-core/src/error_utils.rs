use crate::error::*;
use std::time::Duration;
use tracing::{error, info, warn};

/// Coarse classification used for retry decisions and process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Credential invalid, expired or missing. Never retried.
    Auth,
    /// Transient network or API failure.
    Fetch,
    /// Response did not have the expected shape.
    Parse,
    Config,
    Storage,
    Internal,
}

impl ErrorCategory {
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCategory::Auth => 2,
            ErrorCategory::Fetch => 3,
            ErrorCategory::Parse => 4,
            ErrorCategory::Config | ErrorCategory::Storage | ErrorCategory::Internal => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Auth => "AuthError",
            ErrorCategory::Fetch => "FetchError",
            ErrorCategory::Parse => "ParseError",
            ErrorCategory::Config => "ConfigError",
            ErrorCategory::Storage => "StorageError",
            ErrorCategory::Internal => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn category(&self) -> ErrorCategory;
    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    fn user_friendly_message(&self) -> String;
    fn error_code(&self) -> String;

    fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError: {}", self);
        match self {
            CoreError::FeedApi(e) => {
                error!("Feed API error details: {:?}", e);
            }
            CoreError::Storage(e) => {
                error!("Storage error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError (warning): {}", self);
        self
    }

    fn category(&self) -> ErrorCategory {
        match self {
            CoreError::FeedApi(e) => e.category(),
            CoreError::Storage(_) | CoreError::Io(_) => ErrorCategory::Storage,
            CoreError::Config(e) => e.category(),
            CoreError::Serialization(_) => ErrorCategory::Parse,
            CoreError::Network(_) | CoreError::Timeout { .. } => ErrorCategory::Fetch,
            CoreError::Internal { .. } => ErrorCategory::Internal,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::FeedApi(e) => e.is_retryable(),
            CoreError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            CoreError::Timeout { .. } => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::FeedApi(e) => e.retry_after(),
            CoreError::Timeout { seconds } => Some(Duration::from_secs(*seconds)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::FeedApi(e) => e.user_friendly_message(),
            CoreError::Storage(e) => e.user_friendly_message(),
            CoreError::Config(e) => e.user_friendly_message(),
            CoreError::Network(_) => {
                "Network connection error. Please check your internet connection.".to_string()
            }
            CoreError::Timeout { .. } => {
                "The operation took too long to complete. Please try again.".to_string()
            }
            CoreError::Serialization(_) => {
                "The feed provider returned data that could not be decoded.".to_string()
            }
            CoreError::Io(e) => format!("File system error: {}", e),
            CoreError::Internal { .. } => {
                "An unexpected error occurred. Please try again later.".to_string()
            }
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::FeedApi(e) => e.error_code(),
            CoreError::Storage(e) => e.error_code(),
            CoreError::Config(e) => e.error_code(),
            CoreError::Io(_) => "IO".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::Timeout { .. } => "TIMEOUT".to_string(),
            CoreError::Internal { .. } => "INTERNAL".to_string(),
        }
    }
}

impl ErrorExt for FeedApiError {
    fn log_error(&self) -> &Self {
        error!("FeedApiError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("FeedApiError (warning): {}", self);
        self
    }

    fn category(&self) -> ErrorCategory {
        match self {
            FeedApiError::AuthenticationFailed { .. } | FeedApiError::InvalidToken => {
                ErrorCategory::Auth
            }
            FeedApiError::RateLimitExceeded { .. }
            | FeedApiError::RequestTimeout { .. }
            | FeedApiError::ServerError { .. }
            | FeedApiError::RequestFailed { .. }
            | FeedApiError::Transport { .. }
            | FeedApiError::EmptyFeed => ErrorCategory::Fetch,
            FeedApiError::InvalidResponse { .. }
            | FeedApiError::MissingField { .. }
            | FeedApiError::ProfileNotFound { .. } => ErrorCategory::Parse,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            FeedApiError::RateLimitExceeded { .. } => true,
            FeedApiError::RequestTimeout { .. } => true,
            FeedApiError::ServerError { status_code } => *status_code >= 500,
            FeedApiError::Transport { .. } => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            FeedApiError::RateLimitExceeded { retry_after } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            FeedApiError::AuthenticationFailed { .. } | FeedApiError::InvalidToken => {
                "Instagram rejected the credential. Refresh the access token or session id."
                    .to_string()
            }
            FeedApiError::RateLimitExceeded { retry_after } => format!(
                "Too many requests. Please wait {} seconds before trying again.",
                retry_after
            ),
            FeedApiError::RequestTimeout { resource } => {
                format!("Request to {} timed out. Please try again.", resource)
            }
            FeedApiError::ProfileNotFound { username } => {
                format!("Instagram profile '{}' not found or is private.", username)
            }
            FeedApiError::MissingField { post, field } => format!(
                "Post '{}' came back without '{}'. \
                 The provider's response format may have changed.",
                post, field
            ),
            FeedApiError::EmptyFeed => {
                "The feed returned no posts. Existing data was left untouched.".to_string()
            }
            _ => "Instagram API error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            FeedApiError::AuthenticationFailed { .. } => "FEED_AUTH_FAILED".to_string(),
            FeedApiError::InvalidToken => "FEED_INVALID_TOKEN".to_string(),
            FeedApiError::RateLimitExceeded { .. } => "FEED_RATE_LIMIT".to_string(),
            FeedApiError::RequestTimeout { .. } => "FEED_TIMEOUT".to_string(),
            FeedApiError::ServerError { .. } => "FEED_SERVER_ERROR".to_string(),
            FeedApiError::RequestFailed { .. } => "FEED_REQUEST_FAILED".to_string(),
            FeedApiError::Transport { .. } => "FEED_TRANSPORT".to_string(),
            FeedApiError::InvalidResponse { .. } => "FEED_INVALID_RESPONSE".to_string(),
            FeedApiError::MissingField { .. } => "FEED_MISSING_FIELD".to_string(),
            FeedApiError::ProfileNotFound { .. } => "FEED_PROFILE_NOT_FOUND".to_string(),
            FeedApiError::EmptyFeed => "FEED_EMPTY".to_string(),
        }
    }
}

impl ErrorExt for StorageError {
    fn log_error(&self) -> &Self {
        error!("StorageError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("StorageError (warning): {}", self);
        self
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }

    fn is_retryable(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            StorageError::Locked { path } => format!(
                "Another sync is already running (lock file {}). Try again once it finishes.",
                path
            ),
            StorageError::CreateDir { path, .. } => {
                format!("Could not create directory {}. Check permissions.", path)
            }
            _ => "Could not write the feed cache. Check disk space and permissions.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            StorageError::CreateDir { .. } => "STORAGE_CREATE_DIR".to_string(),
            StorageError::Write { .. } => "STORAGE_WRITE".to_string(),
            StorageError::Persist { .. } => "STORAGE_PERSIST".to_string(),
            StorageError::ReadCache { .. } => "STORAGE_READ_CACHE".to_string(),
            StorageError::Locked { .. } => "STORAGE_LOCKED".to_string(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn log_error(&self) -> &Self {
        error!("ConfigError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("ConfigError (warning): {}", self);
        self
    }

    fn category(&self) -> ErrorCategory {
        match self {
            ConfigError::MissingCredential { .. } => ErrorCategory::Auth,
            _ => ErrorCategory::Config,
        }
    }

    fn is_retryable(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::FileNotFound { path } => {
                format!("Configuration file '{}' not found.", path)
            }
            ConfigError::MissingCredential { var_name } => format!(
                "No credential configured. Set the '{}' environment variable.",
                var_name
            ),
            ConfigError::InvalidValue { field, .. } => {
                format!("Invalid value for configuration field '{}'.", field)
            }
            _ => "Configuration error occurred. Please check your settings.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND".to_string(),
            ConfigError::InvalidFormat { .. } => "CONFIG_INVALID_FORMAT".to_string(),
            ConfigError::MissingCredential { .. } => "CONFIG_MISSING_CREDENTIAL".to_string(),
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE".to_string(),
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR".to_string(),
        }
    }
}

/// Logs a failure with its category, code and user-facing message.
#[derive(Debug, Default)]
pub struct ErrorReporter;

impl ErrorReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn report_error(&self, error: &CoreError) {
        error.log_error();
        info!("Error category: {}", error.category());
        info!("Error code: {}", error.error_code());
        info!("User message: {}", error.user_friendly_message());
    }
}
