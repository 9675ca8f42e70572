use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use photodump_common::DownloadTask;
use twitter_client::Tweet;

use crate::download_queue::{DownloadScheduler, SubmitOutcome};
use crate::error_log::ErrorLog;
use crate::extractor::extract_media;
use crate::traits::PlatformApi;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);
/// A connection that lived this long resets the backoff.
const HEALTHY_CONNECTION: Duration = Duration::from_secs(60);

/// Reconnect delay. Doubles per disconnect up to five minutes and starts over
/// after a connection that stayed up for a minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    next: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            next: INITIAL_BACKOFF,
        }
    }

    /// Delay before reconnecting after a connection that lasted `connected_for`.
    pub fn after_disconnect(&mut self, connected_for: Duration) -> Duration {
        if connected_for >= HEALTHY_CONNECTION {
            self.next = INITIAL_BACKOFF;
        }
        let delay = self.next;
        self.next = (self.next * 2).min(MAX_BACKOFF);
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Shutdown,
    Disconnected,
}

/// Feeds live posts into the download scheduler's priority lane.
pub struct StreamListener {
    api: Arc<dyn PlatformApi>,
    downloads: DownloadScheduler,
    errors: Arc<ErrorLog>,
    follow: Vec<String>,
}

impl StreamListener {
    pub fn new(
        api: Arc<dyn PlatformApi>,
        downloads: DownloadScheduler,
        errors: Arc<ErrorLog>,
        follow: Vec<String>,
    ) -> Self {
        Self {
            api,
            downloads,
            errors,
            follow,
        }
    }

    /// Keep a stream connected until shutdown, reconnecting with exponential backoff.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new();
        loop {
            let connected_at = Instant::now();
            if self.listen(shutdown.clone()).await == StreamEnd::Shutdown {
                return;
            }
            let delay = backoff.after_disconnect(connected_at.elapsed());

            warn!(retry_in_secs = delay.as_secs(), "Stream disconnected");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    /// Hold one connection. Returns as soon as shutdown is signalled, without
    /// draining anything still buffered on the connection.
    pub async fn listen(&self, mut shutdown: watch::Receiver<bool>) -> StreamEnd {
        if *shutdown.borrow_and_update() {
            return StreamEnd::Shutdown;
        }

        let mut stream = match self.api.subscribe(&self.follow).await {
            Ok(stream) => stream,
            Err(e) => {
                let message = format!("{e:#}");
                self.errors.record("statuses/filter", &message).await;
                return StreamEnd::Disconnected;
            }
        };
        info!(following = self.follow.len(), "Start listening on stream...");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Stream stopped");
                    return StreamEnd::Shutdown;
                }
                item = stream.next() => match item {
                    Some(Ok(tweet)) => {
                        self.dispatch(&tweet);
                    }
                    Some(Err(e)) => {
                        let message = format!("{e:#}");
                        self.errors.record("statuses/filter", &message).await;
                    }
                    None => return StreamEnd::Disconnected,
                },
            }
        }
    }

    /// Submit every photo in `tweet` at high priority. Returns how many were dispatched.
    pub fn dispatch(&self, tweet: &Tweet) -> usize {
        extract_media(tweet)
            .into_iter()
            .map(|item| self.downloads.submit(DownloadTask::high(item)))
            .filter(|outcome| *outcome == SubmitOutcome::Dispatched)
            .count()
    }
}
