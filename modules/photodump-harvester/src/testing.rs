// Test mocks for the harvester.
//
// One mock per trait boundary:
// - MockPlatform (PlatformApi): keyed timelines, scripted streams, recorded writes
// - MockResolver (RedirectResolver): HashMap-based short→canonical URL
// - MockFetcher (MediaFetcher): HashMap-based URL→bytes
// - RecordingTagger (MetadataTagger): remembers what it tagged
// - GatedRunner (TaskRunner): holds every task until released
//
// Plus helpers for building posts, media entities and MediaItems.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::Semaphore;

use photodump_common::{CrawlTarget, DownloadTask, MediaItem};
use twitter_client::{Entities, Media, Size, Sizes, Tweet};

use crate::crawl::Endpoint;
use crate::download_queue::TaskRunner;
use crate::traits::{MediaFetcher, MetadataTagger, PlatformApi, RedirectResolver};

// ---------------------------------------------------------------------------
// MockPlatform
// ---------------------------------------------------------------------------

type ScriptedStream = Vec<std::result::Result<Tweet, String>>;

/// What a scripted connection does after its last item.
enum StreamEnding {
    Close,
    Hang,
    CloseAfter(Duration),
}

/// In-memory platform. Timelines are keyed `"{path}:{handle}"` for endpoints that
/// iterate targets and `"{path}"` otherwise; unregistered keys return `Err`.
/// Each scripted stream serves one subscription, in order. Once they run out,
/// subscriptions fail.
pub struct MockPlatform {
    timelines: HashMap<String, Vec<Tweet>>,
    streams: Mutex<VecDeque<(ScriptedStream, StreamEnding)>>,
    fail_writes: bool,
    timeline_calls: Mutex<Vec<String>>,
    subscribe_calls: Mutex<usize>,
    favorited: Mutex<Vec<String>>,
    followed: Mutex<Vec<String>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            timelines: HashMap::new(),
            streams: Mutex::new(VecDeque::new()),
            fail_writes: false,
            timeline_calls: Mutex::new(Vec::new()),
            subscribe_calls: Mutex::new(0),
            favorited: Mutex::new(Vec::new()),
            followed: Mutex::new(Vec::new()),
        }
    }

    pub fn on_timeline(mut self, key: &str, tweets: Vec<Tweet>) -> Self {
        self.timelines.insert(key.to_string(), tweets);
        self
    }

    /// Script the next live connection. With `hang` it stays open after the
    /// last item instead of ending.
    pub fn with_stream(self, items: ScriptedStream, hang: bool) -> Self {
        let ending = if hang {
            StreamEnding::Hang
        } else {
            StreamEnding::Close
        };
        self.streams.lock().unwrap().push_back((items, ending));
        self
    }

    /// Script the next live connection to stay open for `hold` after its last item.
    pub fn with_held_stream(self, items: ScriptedStream, hold: Duration) -> Self {
        self.streams
            .lock()
            .unwrap()
            .push_back((items, StreamEnding::CloseAfter(hold)));
        self
    }

    /// Favorite and follow still record the call, then fail.
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn timeline_calls(&self) -> Vec<String> {
        self.timeline_calls.lock().unwrap().clone()
    }

    pub fn subscribe_calls(&self) -> usize {
        *self.subscribe_calls.lock().unwrap()
    }

    pub fn favorited(&self) -> Vec<String> {
        self.favorited.lock().unwrap().clone()
    }

    pub fn followed(&self) -> Vec<String> {
        self.followed.lock().unwrap().clone()
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformApi for MockPlatform {
    async fn timeline(
        &self,
        endpoint: Endpoint,
        target: Option<&CrawlTarget>,
        _count: u32,
    ) -> Result<Vec<Tweet>> {
        let key = match target {
            Some(t) => format!("{}:{}", endpoint.path(), t.handle),
            None => endpoint.path().to_string(),
        };
        self.timeline_calls.lock().unwrap().push(key.clone());
        self.timelines
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow!("MockPlatform: no timeline registered for {key}"))
    }

    async fn subscribe(&self, _follow: &[String]) -> Result<BoxStream<'static, Result<Tweet>>> {
        *self.subscribe_calls.lock().unwrap() += 1;
        let Some((items, ending)) = self.streams.lock().unwrap().pop_front() else {
            bail!("MockPlatform: no stream available");
        };

        let items = stream::iter(items.into_iter().map(|item| item.map_err(|e| anyhow!(e))));
        Ok(match ending {
            StreamEnding::Close => items.boxed(),
            StreamEnding::Hang => items.chain(stream::pending()).boxed(),
            StreamEnding::CloseAfter(hold) => items
                .chain(
                    stream::once(tokio::time::sleep(hold))
                        .filter_map(|()| futures::future::ready(None)),
                )
                .boxed(),
        })
    }

    async fn favorite(&self, post_id: &str) -> Result<()> {
        self.favorited.lock().unwrap().push(post_id.to_string());
        if self.fail_writes {
            bail!("MockPlatform: favorite rejected");
        }
        Ok(())
    }

    async fn follow(&self, handle: &str) -> Result<()> {
        self.followed.lock().unwrap().push(handle.to_string());
        if self.fail_writes {
            bail!("MockPlatform: follow rejected");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockResolver
// ---------------------------------------------------------------------------

/// Returns `Err` for unregistered short links.
#[derive(Default)]
pub struct MockResolver {
    targets: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_resolve(mut self, short_url: &str, canonical: &str) -> Self {
        self.targets
            .insert(short_url.to_string(), canonical.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RedirectResolver for MockResolver {
    async fn resolve(&self, short_url: &str) -> Result<String> {
        self.calls.lock().unwrap().push(short_url.to_string());
        self.targets
            .get(short_url)
            .cloned()
            .ok_or_else(|| anyhow!("MockResolver: no redirect registered for {short_url}"))
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// HashMap-based media fetcher. Returns `Err` for unregistered URLs.
#[derive(Default)]
pub struct MockFetcher {
    media: HashMap<String, Bytes>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_media(mut self, url: &str, body: &[u8]) -> Self {
        self.media
            .insert(url.to_string(), Bytes::copy_from_slice(body));
        self
    }
}

#[async_trait]
impl MediaFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        self.media
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("MockFetcher: no media registered for {url}"))
    }
}

// ---------------------------------------------------------------------------
// RecordingTagger
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingTagger {
    tagged: Mutex<Vec<(String, String)>>,
}

impl RecordingTagger {
    /// `(file name, author)` pairs in tagging order.
    pub fn tagged(&self) -> Vec<(String, String)> {
        self.tagged.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataTagger for RecordingTagger {
    async fn tag_author(&self, path: &Path, author: &str) -> Result<()> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.tagged.lock().unwrap().push((name, author.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GatedRunner
// ---------------------------------------------------------------------------

/// Records each task as it starts, then parks it until `release` lets it finish.
pub struct GatedRunner {
    gate: Arc<Semaphore>,
    started: Mutex<Vec<String>>,
}

impl GatedRunner {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            started: Mutex::new(Vec::new()),
        }
    }

    /// File names in start order.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Let `n` parked tasks complete.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

impl Default for GatedRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRunner for GatedRunner {
    async fn run(&self, task: DownloadTask) {
        self.started
            .lock()
            .unwrap()
            .push(task.file_name().to_string());
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// A photo entity posted by `author`, short-linked as `https://t.co/{token}`.
pub fn photo(author: &str, token: &str, media_id: &str, size: Option<(u32, u32)>) -> Media {
    Media {
        id_str: Some(media_id.to_string()),
        media_type: Some("photo".to_string()),
        media_url_https: Some(format!("https://pbs.twimg.com/media/{media_id}.jpg")),
        expanded_url: Some(format!("https://twitter.com/{author}/status/42/photo/1")),
        url: Some(format!("https://t.co/{token}")),
        sizes: size.map(|(w, h)| Sizes {
            large: Some(Size { w, h }),
        }),
    }
}

/// A post created at `created_at` (platform format) carrying `media` in `entities`.
pub fn tweet_with_media(created_at: &str, media: Vec<Media>) -> Tweet {
    Tweet {
        id_str: Some("42".to_string()),
        created_at: Some(created_at.to_string()),
        text: Some("a post".to_string()),
        entities: Some(Entities { media: Some(media) }),
        ..Default::default()
    }
}

pub fn media_item(file_name: &str) -> MediaItem {
    media_item_at(file_name, Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap())
}

/// A jpg by `alice` whose remote URL is derived from `file_name`.
pub fn media_item_at(file_name: &str, created_at: DateTime<Utc>) -> MediaItem {
    MediaItem {
        file_name: file_name.to_string(),
        remote_url: format!("https://pbs.twimg.com/media/{file_name}:large"),
        created_at,
        author_handle: "alice".to_string(),
        caption_text: "a post".to_string(),
        extension: "jpg".to_string(),
        source_post_url: "https://twitter.com/alice/status/42/photo/1".to_string(),
    }
}

/// `n` targets named `user0..user{n-1}` with matching numeric ids.
pub fn targets(n: usize) -> Arc<[CrawlTarget]> {
    (0..n)
        .map(|i| CrawlTarget {
            handle: format!("user{i}"),
            account_id: i.to_string(),
        })
        .collect()
}
