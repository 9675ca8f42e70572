// Trait abstractions for the harvester's remote and side-effecting dependencies.
//
// PlatformApi: timeline reads, the live filter stream, and the two like-folder writes.
// RedirectResolver: short link -> canonical URL without following the redirect.
// MediaFetcher: raw media transfer.
// MetadataTagger: author tagging of written files.
//
// TwitterClient implements the first three; ExifTool implements the last.
// The `testing` module provides in-memory versions of all four.

use std::path::Path;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use tokio::process::Command;
use tracing::debug;

use photodump_common::CrawlTarget;
use twitter_client::{Tweet, TwitterClient};

use crate::crawl::Endpoint;

// ---------------------------------------------------------------------------
// PlatformApi
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Read one page of an endpoint. `target` is `None` only for endpoints that
    /// do not iterate accounts.
    async fn timeline(
        &self,
        endpoint: Endpoint,
        target: Option<&CrawlTarget>,
        count: u32,
    ) -> Result<Vec<Tweet>>;

    /// Subscribe to live posts from the given account ids.
    async fn subscribe(&self, follow: &[String]) -> Result<BoxStream<'static, Result<Tweet>>>;

    /// Mark a post as a favorite.
    async fn favorite(&self, post_id: &str) -> Result<()>;

    /// Follow an account by handle.
    async fn follow(&self, handle: &str) -> Result<()>;
}

#[async_trait]
impl PlatformApi for TwitterClient {
    async fn timeline(
        &self,
        endpoint: Endpoint,
        target: Option<&CrawlTarget>,
        count: u32,
    ) -> Result<Vec<Tweet>> {
        let tweets = match (endpoint, target) {
            (Endpoint::Favorites, Some(t)) => self.favorites_list(&t.handle, count).await?,
            (Endpoint::UserTimeline, Some(t)) => self.user_timeline(&t.handle, count).await?,
            (Endpoint::HomeTimeline, _) => self.home_timeline(count).await?,
            (endpoint, None) => bail!("{endpoint} requires a crawl target"),
        };
        Ok(tweets)
    }

    async fn subscribe(&self, follow: &[String]) -> Result<BoxStream<'static, Result<Tweet>>> {
        let stream = self.filter_stream(follow).await?;
        Ok(stream.map(|item| item.map_err(anyhow::Error::from)).boxed())
    }

    async fn favorite(&self, post_id: &str) -> Result<()> {
        Ok(self.create_favorite(post_id).await?)
    }

    async fn follow(&self, handle: &str) -> Result<()> {
        Ok(self.create_friendship(handle).await?)
    }
}

// ---------------------------------------------------------------------------
// RedirectResolver
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RedirectResolver: Send + Sync {
    async fn resolve(&self, short_url: &str) -> Result<String>;
}

#[async_trait]
impl RedirectResolver for TwitterClient {
    async fn resolve(&self, short_url: &str) -> Result<String> {
        Ok(self.resolve_redirect(short_url).await?)
    }
}

// ---------------------------------------------------------------------------
// MediaFetcher
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

#[async_trait]
impl MediaFetcher for TwitterClient {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        Ok(self.fetch_media(url).await?)
    }
}

// ---------------------------------------------------------------------------
// MetadataTagger
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MetadataTagger: Send + Sync {
    /// Record `author` as the file's artist.
    async fn tag_author(&self, path: &Path, author: &str) -> Result<()>;
}

/// Shells out to `exiftool`, rewriting the file in place.
pub struct ExifTool;

#[async_trait]
impl MetadataTagger for ExifTool {
    async fn tag_author(&self, path: &Path, author: &str) -> Result<()> {
        let status = Command::new("exiftool")
            .arg("-overwrite_original")
            .args(["-charset", "exif=utf8"])
            .arg(format!("-Artist={author}"))
            .arg(path)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| anyhow!("failed to run exiftool: {e}"))?;

        if !status.success() {
            bail!("exiftool exited with {status} for {}", path.display());
        }
        debug!(path = %path.display(), author, "tagged artist");
        Ok(())
    }
}
