pub mod api;
pub mod graph;
pub mod retry;
pub mod source;
pub mod web;


pub use api::{ApiAuth, ApiClient, RequestKind};
pub use graph::GraphApiSource;
pub use retry::{RetryExecutor, RetryMetrics, RetryStrategy};
pub use source::{FeedSource, MediaPayload};
pub use web::WebProfileSource;

use feedsync_core::{CoreError, Provider, SyncConfig};
use tracing::debug;

pub const USER_AGENT: &str = concat!("feedsync/", env!("CARGO_PKG_VERSION"));

/// Build the provider selected by the configuration.
pub fn build_source(config: &SyncConfig) -> Result<Box<dyn FeedSource>, CoreError> {
    let base_url = config.api_base_url.as_deref();
    debug!(
        "Building {} feed source{}",
        config.provider.as_str(),
        base_url.map(|u| format!(" against {}", u)).unwrap_or_default()
    );

    let source: Box<dyn FeedSource> = match config.provider {
        Provider::Graph => Box::new(GraphApiSource::new(
            base_url,
            config.credential.clone(),
            config.request_timeout,
            config.retry.clone(),
        )?),
        Provider::Web => Box::new(WebProfileSource::new(
            base_url,
            &config.profile,
            config.credential.clone(),
            config.request_timeout,
            config.retry.clone(),
        )?),
    };
    Ok(source)
}
