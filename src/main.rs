use feedsync_core::{CoreError, ErrorExt, ErrorReporter, SyncConfig};
use sync_service::FeedSyncer;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "feedsync=info,sync_service=info,instagram_client=info";

#[tokio::main]
async fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting feedsync {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run().await {
        ErrorReporter::new().report_error(&e);
        eprintln!("feedsync: {}", e.user_friendly_message());
        std::process::exit(e.exit_code());
    }
}

async fn run() -> Result<(), CoreError> {
    let config = SyncConfig::load()?;
    tracing::info!(
        "Syncing {} posts via the {} provider into {}",
        config.post_count,
        config.provider.as_str(),
        config.data_dir.display()
    );

    let syncer = FeedSyncer::from_config(config)?;
    let report = syncer.sync().await?;

    tracing::info!(
        "Sync complete: {} posts written, {} media downloaded, {} reused, \
         {} orphans pruned in {:.1}s",
        report.posts_written,
        report.media_downloaded,
        report.media_reused,
        report.orphans_pruned,
        report.elapsed.as_secs_f64()
    );
    if report.retries > 0 {
        tracing::info!("{} requests were retried", report.retries);
    }
    if !report.posts_skipped.is_empty() {
        tracing::warn!("{} posts skipped", report.posts_skipped.len());
    }
    tracing::info!("Snapshot: {}", report.snapshot_path.display());
    Ok(())
}
