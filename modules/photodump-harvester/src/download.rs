use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use tracing::{info, warn};

use photodump_common::{DownloadTask, MediaItem};

use crate::dedup::DedupCache;
use crate::download_queue::TaskRunner;
use crate::error_log::ErrorLog;
use crate::traits::{MediaFetcher, MetadataTagger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Found in the cache (or on disk) right before transfer.
    AlreadyCaptured,
    Saved { fresh: bool },
}

/// Performs a single download: transfer, write, tag, timestamp, freshness copy.
pub struct MediaDownloader {
    cache: Arc<DedupCache>,
    fetcher: Arc<dyn MediaFetcher>,
    tagger: Arc<dyn MetadataTagger>,
    errors: Arc<ErrorLog>,
    focus_dir: PathBuf,
    mark_as_new: Duration,
}

impl MediaDownloader {
    pub fn new(
        cache: Arc<DedupCache>,
        fetcher: Arc<dyn MediaFetcher>,
        tagger: Arc<dyn MetadataTagger>,
        errors: Arc<ErrorLog>,
        focus_dir: impl Into<PathBuf>,
        mark_as_new: Duration,
    ) -> Self {
        Self {
            cache,
            fetcher,
            tagger,
            errors,
            focus_dir: focus_dir.into(),
            mark_as_new,
        }
    }

    pub async fn download(&self, item: &MediaItem) -> Result<DownloadOutcome> {
        if self.cache.has(&item.file_name).await {
            return Ok(DownloadOutcome::AlreadyCaptured);
        }

        info!(created = %item.created_at.date_naive(), url = %item.remote_url, "Downloading");
        let bytes = self.fetcher.fetch(&item.remote_url).await?;
        let now = Utc::now();

        let path = self.cache.root().join(&item.file_name);
        write_atomic(&path, &bytes).await?;

        if item.extension == "jpg" {
            if let Err(e) = self.tagger.tag_author(&path, &item.author_handle).await {
                warn!(file = %item.file_name, error = %e, "author tagging failed");
            }
        }

        set_times(&path, now, item.created_at).await?;

        let fresh = is_fresh(now, item.created_at, self.mark_as_new);
        if fresh {
            let focus_path = self.focus_dir.join(&item.file_name);
            match tokio::fs::write(&focus_path, &bytes).await {
                Ok(()) => info!(
                    author = %item.author_handle,
                    caption = %item.caption_text,
                    url = %item.source_post_url,
                    "New media copied to focus folder"
                ),
                Err(e) => warn!(path = %focus_path.display(), error = %e, "focus copy failed"),
            }
        }

        self.cache.mark_seen(&item.file_name);
        Ok(DownloadOutcome::Saved { fresh })
    }
}

#[async_trait]
impl TaskRunner for MediaDownloader {
    async fn run(&self, task: DownloadTask) {
        if let Err(e) = self.download(&task.item).await {
            let message = format!("{e:#}");
            self.errors
                .record(&format!("Error getting {}", task.item.remote_url), &message)
                .await;
        }
    }
}

/// Posts created less than `window` before `now` count as fresh.
pub fn is_fresh(now: DateTime<Utc>, created_at: DateTime<Utc>, window: Duration) -> bool {
    match now.signed_duration_since(created_at).to_std() {
        Ok(age) => age < window,
        // Negative age: post timestamp is ahead of our clock.
        Err(_) => true,
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    tokio::fs::write(&partial, bytes)
        .await
        .with_context(|| format!("writing {}", partial.display()))?;
    tokio::fs::rename(&partial, path)
        .await
        .with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

async fn set_times(path: &Path, accessed: DateTime<Utc>, modified: DateTime<Utc>) -> Result<()> {
    let path = path.to_path_buf();
    let atime = FileTime::from_unix_time(accessed.timestamp(), accessed.timestamp_subsec_nanos());
    let mtime = FileTime::from_unix_time(modified.timestamp(), modified.timestamp_subsec_nanos());
    tokio::task::spawn_blocking(move || {
        filetime::set_file_times(&path, atime, mtime)
            .with_context(|| format!("setting times on {}", path.display()))
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{media_item_at, MockFetcher, RecordingTagger};
    use chrono::TimeZone;

    struct Fixture {
        _dir: tempfile::TempDir,
        archive: PathBuf,
        focus: PathBuf,
        errors: PathBuf,
        cache: Arc<DedupCache>,
        tagger: Arc<RecordingTagger>,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("dump");
        let focus = dir.path().join("focus");
        std::fs::create_dir_all(&archive).unwrap();
        std::fs::create_dir_all(&focus).unwrap();
        let cache = Arc::new(DedupCache::load(&archive).await.unwrap());
        Fixture {
            errors: dir.path().join("error.log"),
            _dir: dir,
            archive,
            focus,
            cache,
            tagger: Arc::new(RecordingTagger::default()),
        }
    }

    fn downloader(f: &Fixture, fetcher: MockFetcher) -> MediaDownloader {
        MediaDownloader::new(
            Arc::clone(&f.cache),
            Arc::new(fetcher),
            f.tagger.clone(),
            Arc::new(ErrorLog::new(&f.errors)),
            &f.focus,
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn saves_old_media_with_post_mtime() {
        let f = fixture().await;
        let created = Utc.with_ymd_and_hms(2020, 5, 1, 12, 0, 0).unwrap();
        let item = media_item_at("old.jpg", created);
        let d = downloader(&f, MockFetcher::new().on_media(&item.remote_url, b"jpegdata"));

        let outcome = d.download(&item).await.unwrap();

        assert_eq!(outcome, DownloadOutcome::Saved { fresh: false });
        let path = f.archive.join("old.jpg");
        assert_eq!(std::fs::read(&path).unwrap(), b"jpegdata");
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(
            FileTime::from_last_modification_time(&meta).unix_seconds(),
            created.timestamp()
        );
        assert!(!f.focus.join("old.jpg").exists());
        assert!(!f.archive.join("old.jpg.part").exists());
        assert!(f.cache.contains_cached("old.jpg"));
        assert_eq!(f.tagger.tagged(), vec![("old.jpg".to_string(), "alice".to_string())]);
    }

    #[tokio::test]
    async fn fresh_media_is_duplicated_into_focus() {
        let f = fixture().await;
        let item = media_item_at("new.jpg", Utc::now() - chrono::Duration::minutes(5));
        let d = downloader(&f, MockFetcher::new().on_media(&item.remote_url, b"x"));

        assert_eq!(
            d.download(&item).await.unwrap(),
            DownloadOutcome::Saved { fresh: true }
        );
        assert_eq!(std::fs::read(f.focus.join("new.jpg")).unwrap(), b"x");
    }

    #[tokio::test]
    async fn png_is_not_tagged() {
        let f = fixture().await;
        let mut item = media_item_at("pic.png", Utc::now());
        item.extension = "png".into();
        let d = downloader(&f, MockFetcher::new().on_media(&item.remote_url, b"x"));

        d.download(&item).await.unwrap();
        assert!(f.tagger.tagged().is_empty());
    }

    #[tokio::test]
    async fn already_on_disk_skips_transfer() {
        let f = fixture().await;
        std::fs::write(f.archive.join("dup.jpg"), b"existing").unwrap();
        let item = media_item_at("dup.jpg", Utc::now());
        let fetcher = MockFetcher::new();
        let d = downloader(&f, fetcher);

        assert_eq!(d.download(&item).await.unwrap(), DownloadOutcome::AlreadyCaptured);
        assert_eq!(std::fs::read(f.archive.join("dup.jpg")).unwrap(), b"existing");
    }

    #[tokio::test]
    async fn failed_transfer_writes_nothing_and_is_logged() {
        let f = fixture().await;
        let item = media_item_at("missing.jpg", Utc::now());
        let d = Arc::new(downloader(&f, MockFetcher::new()));

        let task = DownloadTask::low(item.clone());
        tokio::spawn(async move { d.run(task).await })
            .await
            .unwrap();

        assert!(!f.archive.join("missing.jpg").exists());
        assert!(!f.cache.contains_cached("missing.jpg"));
        let log = std::fs::read_to_string(&f.errors).unwrap();
        assert!(log.contains(&format!("Error getting {}", item.remote_url)));
    }

    #[test]
    fn freshness_window() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let hour = Duration::from_secs(3600);
        assert!(is_fresh(now, now - chrono::Duration::minutes(59), hour));
        assert!(!is_fresh(now, now - chrono::Duration::minutes(61), hour));
        assert!(is_fresh(now, now + chrono::Duration::minutes(1), hour));
    }
}
