use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "feedsync.toml";
pub const DEFAULT_PROFILE: &str = "mikostudios.co";
pub const DEFAULT_POST_COUNT: usize = 9;
pub const MAX_POST_COUNT: usize = 50;
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_MEDIA_DIR_NAME: &str = "ig_images";
pub const DEFAULT_SNAPSHOT_FILE_NAME: &str = "instagram.json";
pub const DEFAULT_PUBLIC_MEDIA_PREFIX: &str = "./data/ig_images";
pub const LOCK_FILE_NAME: &str = ".feedsync.lock";

pub const ENV_CONFIG_PATH: &str = "FEEDSYNC_CONFIG";
pub const ENV_PROVIDER: &str = "FEEDSYNC_PROVIDER";
pub const ENV_ACCESS_TOKEN: &str = "FEEDSYNC_ACCESS_TOKEN";
pub const ENV_SESSION_ID: &str = "INSTAGRAM_SESSION_ID";
pub const ENV_PROFILE: &str = "FEEDSYNC_PROFILE";
pub const ENV_POST_COUNT: &str = "FEEDSYNC_POST_COUNT";
pub const ENV_DATA_DIR: &str = "FEEDSYNC_DATA_DIR";

/// Which provider API the feed is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Instagram Graph API, bearer access token.
    Graph,
    /// Instagram web profile API, `sessionid` cookie.
    Web,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Graph => "graph",
            Provider::Web => "web",
        }
    }

    fn credential_var(&self) -> &'static str {
        match self {
            Provider::Graph => ENV_ACCESS_TOKEN,
            Provider::Web => ENV_SESSION_ID,
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "graph" => Ok(Provider::Graph),
            "web" => Ok(Provider::Web),
            other => Err(ConfigError::InvalidValue {
                field: "provider".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// What to do when a single post's media cannot be downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaErrorPolicy {
    /// Abort the whole sync and keep the previous snapshot.
    #[default]
    Abort,
    /// Drop the failing post and keep going.
    Skip,
}

/// Credential wrapper that never prints its value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Backoff settings shared by feed and media requests.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay for exponential backoff (in milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Maximum jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 5000,
            max_delay_ms: 60000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Raw contents of the optional TOML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub provider: Option<Provider>,
    pub access_token: Option<String>,
    pub session_id: Option<String>,
    pub profile: Option<String>,
    pub post_count: Option<usize>,
    pub data_dir: Option<PathBuf>,
    pub media_dir_name: Option<String>,
    pub snapshot_file_name: Option<String>,
    pub public_media_prefix: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub download_concurrency: Option<usize>,
    pub on_media_error: Option<MediaErrorPolicy>,
    pub prune_orphans: Option<bool>,
    pub allow_empty_feed: Option<bool>,
    pub lock_stale_after_secs: Option<u64>,
    pub api_base_url: Option<String>,
    pub retry: Option<RetryConfig>,
}

impl FileConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml_str(&contents)
    }
}

/// Everything a sync run needs, resolved from file and environment.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub provider: Provider,
    pub credential: Secret,
    pub profile: String,
    pub post_count: usize,
    pub data_dir: PathBuf,
    pub media_dir_name: String,
    pub snapshot_file_name: String,
    pub public_media_prefix: String,
    pub request_timeout: Duration,
    pub download_concurrency: usize,
    pub on_media_error: MediaErrorPolicy,
    pub prune_orphans: bool,
    pub allow_empty_feed: bool,
    pub lock_stale_after: Duration,
    pub api_base_url: Option<String>,
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Build a config with defaults for everything but the credential.
    pub fn new(provider: Provider, credential: Secret) -> Self {
        Self {
            provider,
            credential,
            profile: DEFAULT_PROFILE.to_string(),
            post_count: DEFAULT_POST_COUNT,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            media_dir_name: DEFAULT_MEDIA_DIR_NAME.to_string(),
            snapshot_file_name: DEFAULT_SNAPSHOT_FILE_NAME.to_string(),
            public_media_prefix: DEFAULT_PUBLIC_MEDIA_PREFIX.to_string(),
            request_timeout: Duration::from_secs(30),
            download_concurrency: 1,
            on_media_error: MediaErrorPolicy::Abort,
            prune_orphans: true,
            allow_empty_feed: false,
            lock_stale_after: Duration::from_secs(3600),
            api_base_url: None,
            retry: RetryConfig::default(),
        }
    }

    /// Load from the process environment and the optional config file.
    pub fn load() -> Result<Self, ConfigError> {
        let env: HashMap<String, String> = std::env::vars().collect();
        let file = match env.get(ENV_CONFIG_PATH).filter(|p| !p.trim().is_empty()) {
            Some(path) => Some(FileConfig::load(Path::new(path))?),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Some(FileConfig::load(default_path)?)
                } else {
                    None
                }
            }
        };
        Self::from_sources(file.unwrap_or_default(), &env)
    }

    /// Merge file values with environment overrides. Environment wins.
    pub fn from_sources(
        file: FileConfig,
        env: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let env_value = |key: &str| {
            env.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let non_empty = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let access_token = env_value(ENV_ACCESS_TOKEN).or(non_empty(file.access_token));
        let session_id = env_value(ENV_SESSION_ID).or(non_empty(file.session_id));

        let provider = match env_value(ENV_PROVIDER) {
            Some(raw) => raw.parse()?,
            None => match file.provider {
                Some(provider) => provider,
                None if access_token.is_some() => Provider::Graph,
                None => Provider::Web,
            },
        };

        let credential = match provider {
            Provider::Graph => access_token,
            Provider::Web => session_id,
        }
        .map(Secret::new)
        .ok_or_else(|| ConfigError::MissingCredential {
            var_name: provider.credential_var().to_string(),
        })?;

        let mut config = Self::new(provider, credential);

        if let Some(profile) = env_value(ENV_PROFILE).or(non_empty(file.profile)) {
            config.profile = profile;
        }
        config.post_count = match env_value(ENV_POST_COUNT) {
            Some(raw) => raw.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                field: "post_count".to_string(),
                value: raw.clone(),
            })?,
            None => file.post_count.unwrap_or(DEFAULT_POST_COUNT),
        };
        if let Some(data_dir) = env_value(ENV_DATA_DIR).map(PathBuf::from).or(file.data_dir) {
            config.data_dir = data_dir;
        }
        if let Some(name) = file.media_dir_name {
            config.media_dir_name = name;
        }
        if let Some(name) = file.snapshot_file_name {
            config.snapshot_file_name = name;
        }
        if let Some(prefix) = file.public_media_prefix {
            config.public_media_prefix = prefix.trim_end_matches('/').to_string();
        }
        if let Some(secs) = file.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = file.download_concurrency {
            config.download_concurrency = n;
        }
        if let Some(policy) = file.on_media_error {
            config.on_media_error = policy;
        }
        if let Some(prune) = file.prune_orphans {
            config.prune_orphans = prune;
        }
        if let Some(allow) = file.allow_empty_feed {
            config.allow_empty_feed = allow;
        }
        if let Some(secs) = file.lock_stale_after_secs {
            config.lock_stale_after = Duration::from_secs(secs);
        }
        config.api_base_url = non_empty(file.api_base_url);
        if let Some(retry) = file.retry {
            config.retry = retry;
        }

        config.validate()?;
        debug!(
            provider = config.provider.as_str(),
            post_count = config.post_count,
            data_dir = %config.data_dir.display(),
            "Configuration resolved"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, value: String| ConfigError::InvalidValue {
            field: field.to_string(),
            value,
        };

        if self.post_count == 0 || self.post_count > MAX_POST_COUNT {
            return Err(invalid("post_count", self.post_count.to_string()));
        }
        if self.download_concurrency == 0 || self.download_concurrency > 16 {
            return Err(invalid(
                "download_concurrency",
                self.download_concurrency.to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout_secs", "0".to_string()));
        }
        if self.profile.is_empty() || self.profile.contains(['/', '?', '&', '#']) {
            return Err(invalid("profile", self.profile.clone()));
        }
        if !is_plain_file_name(&self.media_dir_name) {
            return Err(invalid("media_dir_name", self.media_dir_name.clone()));
        }
        if !is_plain_file_name(&self.snapshot_file_name)
            || !self.snapshot_file_name.ends_with(".json")
        {
            return Err(invalid(
                "snapshot_file_name",
                self.snapshot_file_name.clone(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(invalid(
                "retry.jitter_factor",
                self.retry.jitter_factor.to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(invalid(
                "retry.backoff_multiplier",
                self.retry.backoff_multiplier.to_string(),
            ));
        }
        Ok(())
    }

    pub fn media_dir(&self) -> PathBuf {
        self.data_dir.join(&self.media_dir_name)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file_name)
    }

    /// `instagram.json` -> `instagram.meta.json`
    pub fn meta_path(&self) -> PathBuf {
        let stem = self
            .snapshot_file_name
            .strip_suffix(".json")
            .unwrap_or(&self.snapshot_file_name);
        self.data_dir.join(format!("{}.meta.json", stem))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(LOCK_FILE_NAME)
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}
