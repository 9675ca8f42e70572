use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::Instant;
use tracing::{info, warn};

use photodump_common::{AppConfig, CrawlTarget};
use twitter_client::{Credentials, TwitterClient, User};

use crate::crawl::{CrawlScheduler, Crawler};
use crate::dedup::DedupCache;
use crate::download::MediaDownloader;
use crate::download_queue::{DownloadLimits, DownloadScheduler};
use crate::error_log::ErrorLog;
use crate::harvester::Harvester;
use crate::like_folder::LikeFolderReconciler;
use crate::stream_listener::StreamListener;
use crate::traits::{ExifTool, MediaFetcher, MetadataTagger, PlatformApi, RedirectResolver};

/// Remote and side-effecting collaborators the harvester is wired with.
pub struct Services {
    pub api: Arc<dyn PlatformApi>,
    pub resolver: Arc<dyn RedirectResolver>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub tagger: Arc<dyn MetadataTagger>,
}

/// Startup: folders, client, following list (fatal on failure), snapshot, wiring.
pub async fn bootstrap(config: &AppConfig) -> Result<Harvester> {
    prepare_folders(config).await?;

    let client = Arc::new(TwitterClient::new(Credentials {
        consumer_key: config.consumer_key.clone(),
        consumer_secret: config.consumer_secret.clone(),
        access_token: config.access_token.clone(),
        access_secret: config.access_secret.clone(),
    })?);

    info!(screen_name = %config.from_screen_name, "Fetching following list...");
    let following = client
        .following(&config.from_screen_name)
        .await
        .with_context(|| format!("fetching accounts followed by {}", config.from_screen_name))?;
    info!(count = following.len(), "Following list loaded");
    write_snapshot(&config.following_snapshot_path, &following).await;

    let services = Services {
        api: client.clone(),
        resolver: client.clone(),
        fetcher: client,
        tagger: Arc::new(ExifTool),
    };
    assemble(config, services, crawl_targets(&following)).await
}

pub async fn prepare_folders(config: &AppConfig) -> Result<()> {
    for dir in [
        &config.dump_folder,
        &config.focus_folder,
        &config.like_folder,
        &config.postlike_folder,
    ] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    Ok(())
}

/// Best effort: a snapshot that cannot be written is only a warning.
pub async fn write_snapshot(path: &Path, users: &[User]) {
    let body = match serde_json::to_vec_pretty(users) {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "could not serialize following list");
            return;
        }
    };
    match tokio::fs::write(path, body).await {
        Ok(()) => info!(path = %path.display(), "Following list snapshot written"),
        Err(e) => warn!(path = %path.display(), error = %e, "could not write following snapshot"),
    }
}

pub fn crawl_targets(users: &[User]) -> Arc<[CrawlTarget]> {
    users
        .iter()
        .map(|u| CrawlTarget {
            handle: u.screen_name.clone(),
            account_id: u.id_str.clone(),
        })
        .collect()
}

/// Wire every component around `services`. Loads the archive listing.
pub async fn assemble(
    config: &AppConfig,
    services: Services,
    targets: Arc<[CrawlTarget]>,
) -> Result<Harvester> {
    let cache = Arc::new(DedupCache::load(&config.dump_folder).await?);
    let errors = Arc::new(ErrorLog::new(&config.error_log_path));

    let downloader = MediaDownloader::new(
        Arc::clone(&cache),
        services.fetcher,
        services.tagger,
        errors.clone(),
        &config.focus_folder,
        config.mark_as_new,
    );
    let downloads = DownloadScheduler::new(
        cache,
        Arc::new(downloader),
        DownloadLimits {
            max_in_flight: config.max_parallel_downloads,
            ..DownloadLimits::default()
        },
    );

    let crawl = CrawlScheduler::new(
        Arc::clone(&targets),
        &CrawlScheduler::default_budgets(),
        Instant::now(),
    );
    let crawler = Crawler::new(services.api.clone(), downloads.clone(), errors.clone());
    let likes = LikeFolderReconciler::new(
        services.api.clone(),
        services.resolver,
        errors.clone(),
        &config.like_folder,
        &config.postlike_folder,
    );
    let follow_ids = targets.iter().map(|t| t.account_id.clone()).collect();
    let stream = StreamListener::new(services.api, downloads.clone(), errors, follow_ids);

    info!(targets = targets.len(), "Harvester assembled");
    Ok(Harvester::new(crawl, crawler, downloads, likes, Some(stream)))
}
