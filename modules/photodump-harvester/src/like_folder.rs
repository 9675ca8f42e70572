use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result};
use filetime::FileTime;
use regex::Regex;
use tracing::{debug, info};

use photodump_common::{HarvestError, LikeFileName};

use crate::error_log::ErrorLog;
use crate::traits::{PlatformApi, RedirectResolver};

static RE_STATUS_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/status/(\d+)").unwrap());

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub moved: usize,
    /// Files left in place because their name is not a like record.
    pub ignored: usize,
    pub favorited: usize,
    pub followed: usize,
}

/// Replays files dropped into the like folder as a favorite plus a follow.
///
/// Each file is moved out of the watch folder before any remote call, so a
/// record is acted on at most once even if the remote calls fail.
pub struct LikeFolderReconciler {
    api: Arc<dyn PlatformApi>,
    resolver: Arc<dyn RedirectResolver>,
    errors: Arc<ErrorLog>,
    watch_dir: PathBuf,
    archive_dir: PathBuf,
}

impl LikeFolderReconciler {
    pub fn new(
        api: Arc<dyn PlatformApi>,
        resolver: Arc<dyn RedirectResolver>,
        errors: Arc<ErrorLog>,
        watch_dir: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api,
            resolver,
            errors,
            watch_dir: watch_dir.into(),
            archive_dir: archive_dir.into(),
        }
    }

    /// One reconciliation pass. Only a failure to list the watch folder is an error;
    /// per-file failures are recorded and the pass continues.
    pub async fn tick(&self) -> Result<ReconcileReport, HarvestError> {
        let mut report = ReconcileReport::default();

        for name in self.list_files().await? {
            let parsed = LikeFileName::parse(&name);
            let (LikeFileName::Matched { author_handle, .. }, Some(short_url)) =
                (&parsed, parsed.short_url())
            else {
                report.ignored += 1;
                continue;
            };

            let from = self.watch_dir.join(&name);
            let to = self.archive_dir.join(&name);
            if let Err(e) = move_file(&from, &to).await {
                let message = format!("{e:#}");
                self.errors.record(&format!("moving {name}"), &message).await;
                continue;
            }
            report.moved += 1;
            info!(file = %name, author = %author_handle, "Like file archived");

            let (favorited, followed) = tokio::join!(
                self.favorite_post(&short_url),
                self.follow_author(author_handle)
            );
            report.favorited += usize::from(favorited);
            report.followed += usize::from(followed);
        }

        if report.moved > 0 {
            info!(?report, "Like folder reconciled");
        }
        Ok(report)
    }

    async fn list_files(&self) -> Result<Vec<String>, HarvestError> {
        let dir = &self.watch_dir;
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| HarvestError::fs(dir, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HarvestError::fs(dir, e))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => debug!(name = ?raw, "skipping non UTF-8 file name"),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn favorite_post(&self, short_url: &str) -> bool {
        let canonical = match self.resolver.resolve(short_url).await {
            Ok(url) => url,
            Err(e) => {
                let message = format!("{e:#}");
                self.errors
                    .record(&format!("resolving {short_url}"), &message)
                    .await;
                return false;
            }
        };

        let Some(post_id) = status_id(&canonical) else {
            let message = format!("no status id in {canonical}");
            self.errors
                .record(&format!("resolving {short_url}"), &message)
                .await;
            return false;
        };

        match self.api.favorite(post_id).await {
            Ok(()) => {
                info!(post_id, "Favorited");
                true
            }
            Err(e) => {
                let message = format!("{e:#}");
                self.errors
                    .record(&format!("favorites/create id={post_id}"), &message)
                    .await;
                false
            }
        }
    }

    async fn follow_author(&self, handle: &str) -> bool {
        match self.api.follow(handle).await {
            Ok(()) => {
                info!(screen_name = handle, "Followed");
                true
            }
            Err(e) => {
                let message = format!("{e:#}");
                self.errors
                    .record(&format!("friendships/create screen_name={handle}"), &message)
                    .await;
                false
            }
        }
    }
}

/// Post id from a canonical status URL.
pub fn status_id(url: &str) -> Option<&str> {
    RE_STATUS_ID
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Copy with access and modification times preserved, then remove the source.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    tokio::fs::copy(from, to)
        .await
        .with_context(|| format!("copying {} to {}", from.display(), to.display()))?;

    let meta = tokio::fs::metadata(from)
        .await
        .with_context(|| format!("reading metadata of {}", from.display()))?;
    let atime = FileTime::from_last_access_time(&meta);
    let mtime = FileTime::from_last_modification_time(&meta);
    let target = to.to_path_buf();
    tokio::task::spawn_blocking(move || filetime::set_file_times(&target, atime, mtime))
        .await?
        .with_context(|| format!("setting times on {}", to.display()))?;

    tokio::fs::remove_file(from)
        .await
        .with_context(|| format!("removing {}", from.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPlatform, MockResolver};

    const LIKED: &str = "1700000000.alice.t.co_abc123.0.800x600.999.jpg";

    struct Fixture {
        dir: tempfile::TempDir,
        watch: PathBuf,
        archive: PathBuf,
        api: Arc<MockPlatform>,
        resolver: Arc<MockResolver>,
        reconciler: LikeFolderReconciler,
    }

    fn fixture(api: MockPlatform, resolver: MockResolver) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().join("like");
        let archive = dir.path().join("postlike");
        std::fs::create_dir_all(&watch).unwrap();
        std::fs::create_dir_all(&archive).unwrap();

        let api = Arc::new(api);
        let resolver = Arc::new(resolver);
        let reconciler = LikeFolderReconciler::new(
            api.clone(),
            resolver.clone(),
            Arc::new(ErrorLog::new(dir.path().join("error.log"))),
            &watch,
            &archive,
        );
        Fixture {
            dir,
            watch,
            archive,
            api,
            resolver,
            reconciler,
        }
    }

    fn resolving() -> MockResolver {
        MockResolver::new().on_resolve(
            "https://t.co/abc123",
            "https://twitter.com/alice/status/1234567890/photo/1",
        )
    }

    #[tokio::test]
    async fn liked_file_is_moved_then_favorited_and_followed() {
        let f = fixture(MockPlatform::new(), resolving());
        let source = f.watch.join(LIKED);
        std::fs::write(&source, b"img").unwrap();
        let mtime = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&source, mtime).unwrap();

        let report = f.reconciler.tick().await.unwrap();

        assert_eq!(
            report,
            ReconcileReport {
                moved: 1,
                ignored: 0,
                favorited: 1,
                followed: 1
            }
        );
        assert!(!source.exists());
        let archived = f.archive.join(LIKED);
        assert_eq!(std::fs::read(&archived).unwrap(), b"img");
        let meta = std::fs::metadata(&archived).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), mtime);
        assert_eq!(f.api.favorited(), vec!["1234567890"]);
        assert_eq!(f.api.followed(), vec!["alice"]);
    }

    #[tokio::test]
    async fn remote_failures_are_logged_once_and_never_retried() {
        let f = fixture(MockPlatform::new().failing_writes(), resolving());
        std::fs::write(f.watch.join(LIKED), b"img").unwrap();

        let first = f.reconciler.tick().await.unwrap();
        assert_eq!(first.moved, 1);
        assert_eq!(first.favorited, 0);
        assert_eq!(first.followed, 0);

        let second = f.reconciler.tick().await.unwrap();
        assert_eq!(second, ReconcileReport::default());

        assert_eq!(f.api.favorited().len(), 1);
        assert_eq!(f.api.followed().len(), 1);
        assert!(f.archive.join(LIKED).exists());

        let log = std::fs::read_to_string(f.dir.path().join("error.log")).unwrap();
        assert!(log.contains("favorites/create id=1234567890"));
        assert!(log.contains("friendships/create screen_name=alice"));
    }

    #[tokio::test]
    async fn non_matching_files_and_directories_are_untouched() {
        let f = fixture(MockPlatform::new(), resolving());
        std::fs::write(f.watch.join("holiday.jpg"), b"x").unwrap();
        std::fs::create_dir(f.watch.join(".alice.t.co_abc123.dir")).unwrap();

        let report = f.reconciler.tick().await.unwrap();

        assert_eq!(report.ignored, 1);
        assert_eq!(report.moved, 0);
        assert!(f.watch.join("holiday.jpg").exists());
        assert!(f.watch.join(".alice.t.co_abc123.dir").is_dir());
        assert!(f.resolver.calls().is_empty());
        assert!(f.api.followed().is_empty());
    }

    #[tokio::test]
    async fn unresolvable_link_still_follows() {
        let f = fixture(MockPlatform::new(), MockResolver::new());
        std::fs::write(f.watch.join(LIKED), b"img").unwrap();

        let report = f.reconciler.tick().await.unwrap();

        assert_eq!(report.moved, 1);
        assert_eq!(report.favorited, 0);
        assert_eq!(report.followed, 1);
        assert!(f.api.favorited().is_empty());
        assert_eq!(f.resolver.calls(), vec!["https://t.co/abc123"]);
        let log = std::fs::read_to_string(f.dir.path().join("error.log")).unwrap();
        assert!(log.contains("resolving https://t.co/abc123"));
    }

    #[tokio::test]
    async fn missing_watch_folder_is_an_error() {
        let f = fixture(MockPlatform::new(), resolving());
        std::fs::remove_dir(&f.watch).unwrap();
        assert!(f.reconciler.tick().await.is_err());
    }

    #[test]
    fn status_id_from_canonical_url() {
        assert_eq!(
            status_id("https://twitter.com/alice/status/1234567890/photo/1"),
            Some("1234567890")
        );
        assert_eq!(status_id("https://twitter.com/alice"), None);
    }
}
