use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::crawl::{CrawlScheduler, Crawler};
use crate::download_queue::DownloadScheduler;
use crate::like_folder::{self, LikeFolderReconciler};
use crate::stream_listener::StreamListener;

/// How often the driver wakes to fire timers and start queued downloads.
pub const DRAIN_INTERVAL: Duration = Duration::from_millis(5);
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// The single driver loop. Owns the clock; every other component is ticked from here.
pub struct Harvester {
    crawl: CrawlScheduler,
    crawler: Arc<Crawler>,
    downloads: DownloadScheduler,
    likes: Arc<LikeFolderReconciler>,
    like_interval: Duration,
    stream: Option<Arc<StreamListener>>,
}

impl Harvester {
    pub fn new(
        crawl: CrawlScheduler,
        crawler: Crawler,
        downloads: DownloadScheduler,
        likes: LikeFolderReconciler,
        stream: Option<StreamListener>,
    ) -> Self {
        Self {
            crawl,
            crawler: Arc::new(crawler),
            downloads,
            likes: Arc::new(likes),
            like_interval: like_folder::DEFAULT_INTERVAL,
            stream: stream.map(Arc::new),
        }
    }

    pub fn with_like_interval(mut self, interval: Duration) -> Self {
        self.like_interval = interval;
        self
    }

    /// Run until `shutdown` flips to true (or its sender is dropped), then stop the
    /// timers and the stream, drain the download queue, and wait for every
    /// in-flight task.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let stream_task = self.stream.take().map(|listener| {
            let rx = shutdown.clone();
            tokio::spawn(async move { listener.run(rx).await })
        });

        let mut crawls: JoinSet<usize> = JoinSet::new();
        let mut like_task: Option<JoinHandle<()>> = None;
        let start = Instant::now();
        let mut next_like = start;
        let mut next_status = start + STATUS_INTERVAL;

        let mut ticker = tokio::time::interval(DRAIN_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stopping = *shutdown.borrow_and_update();
        if stopping {
            self.downloads.begin_shutdown();
        }

        loop {
            if stopping {
                ticker.tick().await;
            } else {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        info!("Shutdown requested, draining downloads");
                        stopping = true;
                        self.downloads.begin_shutdown();
                    }
                }
            }
            let now = Instant::now();

            while let Some(finished) = crawls.try_join_next() {
                if let Err(e) = finished {
                    warn!(error = %e, "crawl task failed");
                }
            }

            if !stopping {
                for job in self.crawl.poll(now) {
                    let crawler = Arc::clone(&self.crawler);
                    crawls.spawn(async move { crawler.run(job).await });
                }

                let like_running = like_task.as_ref().is_some_and(|t| !t.is_finished());
                if now >= next_like && !like_running {
                    next_like = now + self.like_interval;
                    let likes = Arc::clone(&self.likes);
                    like_task = Some(tokio::spawn(async move {
                        if let Err(e) = likes.tick().await {
                            warn!(error = %e, "like folder pass failed");
                        }
                    }));
                }
            }

            self.downloads.tick();

            if now >= next_status {
                next_status = now + STATUS_INTERVAL;
                let status = self.downloads.status();
                debug!(
                    queued = status.queued,
                    in_flight = status.in_flight,
                    max_in_flight = status.max_in_flight,
                    priority_in_flight = status.priority_in_flight,
                    crawls = crawls.len(),
                    "Queue status"
                );
            }

            if stopping && crawls.is_empty() && self.downloads.is_idle() {
                break;
            }
        }

        if let Some(task) = like_task {
            if let Err(e) = task.await {
                warn!(error = %e, "like folder task failed");
            }
        }
        if let Some(task) = stream_task {
            if let Err(e) = task.await {
                warn!(error = %e, "stream task failed");
            }
        }
        info!("Harvester stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::crawl::{Endpoint, RateBudget};
    use crate::dedup::DedupCache;
    use crate::download::MediaDownloader;
    use crate::download_queue::DownloadLimits;
    use crate::error_log::ErrorLog;
    use crate::testing::{
        photo, targets, tweet_with_media, MockFetcher, MockPlatform, MockResolver,
        RecordingTagger,
    };

    struct Dirs {
        _root: tempfile::TempDir,
        dump: PathBuf,
        focus: PathBuf,
        like: PathBuf,
        postlike: PathBuf,
        error_log: PathBuf,
    }

    fn dirs() -> Dirs {
        let root = tempfile::tempdir().unwrap();
        let make = |name: &str| {
            let path = root.path().join(name);
            std::fs::create_dir_all(&path).unwrap();
            path
        };
        Dirs {
            dump: make("dump"),
            focus: make("focus"),
            like: make("like"),
            postlike: make("postlike"),
            error_log: root.path().join("error.log"),
            _root: root,
        }
    }

    async fn harvester(d: &Dirs, api: MockPlatform, fetcher: MockFetcher) -> Harvester {
        let api = Arc::new(api);
        let errors = Arc::new(ErrorLog::new(&d.error_log));
        let cache = Arc::new(DedupCache::load(&d.dump).await.unwrap());
        let downloader = MediaDownloader::new(
            Arc::clone(&cache),
            Arc::new(fetcher),
            Arc::new(RecordingTagger::default()),
            errors.clone(),
            &d.focus,
            Duration::from_secs(3600),
        );
        let downloads =
            DownloadScheduler::new(cache, Arc::new(downloader), DownloadLimits::default());

        let budgets = [(
            Endpoint::Favorites,
            RateBudget {
                window: Duration::from_millis(50),
                quota: 2,
            },
        )];
        let crawl = CrawlScheduler::with_cursors(targets(1), &budgets, &[0], Instant::now());
        let crawler = Crawler::new(api.clone(), downloads.clone(), errors.clone());
        let likes = LikeFolderReconciler::new(
            api,
            Arc::new(MockResolver::new()),
            errors,
            &d.like,
            &d.postlike,
        );

        Harvester::new(crawl, crawler, downloads, likes, None)
            .with_like_interval(Duration::from_millis(20))
    }

    async fn wait_for(path: &std::path::Path) {
        for _ in 0..200 {
            if path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} never appeared", path.display());
    }

    #[tokio::test]
    async fn crawled_media_lands_in_the_archive_and_shutdown_completes() {
        let d = dirs();
        let tweet = tweet_with_media(
            "Tue Nov 14 22:13:20 +0000 2023",
            vec![photo("user0", "abc", "777", Some((4, 3)))],
        );
        let api = MockPlatform::new().on_timeline("favorites/list:user0", vec![tweet]);
        let fetcher =
            MockFetcher::new().on_media("https://pbs.twimg.com/media/777.jpg:large", b"jpg");
        let h = harvester(&d, api, fetcher).await;

        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(h.run(rx));

        let expected = d.dump.join("1700000000.user0.t.co_abc.0.4x3.777.jpg");
        wait_for(&expected).await;
        assert_eq!(std::fs::read(&expected).unwrap(), b"jpg");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("harvester did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn like_folder_is_reconciled_by_the_driver() {
        let d = dirs();
        let name = "1700000000.bob.t.co_zz.0.1x1.5.jpg";
        std::fs::write(d.like.join(name), b"x").unwrap();
        let h = harvester(&d, MockPlatform::new(), MockFetcher::new()).await;

        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(h.run(rx));

        wait_for(&d.postlike.join(name)).await;
        assert!(!d.like.join(name).exists());

        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("harvester did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn already_signalled_shutdown_returns_promptly() {
        let d = dirs();
        let h = harvester(&d, MockPlatform::new(), MockFetcher::new()).await;
        let (_tx, rx) = watch::channel(true);

        tokio::time::timeout(Duration::from_secs(1), h.run(rx))
            .await
            .expect("harvester did not stop");
    }
}
