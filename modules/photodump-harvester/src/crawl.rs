use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::info;

use photodump_common::{CrawlTarget, DownloadTask};
use twitter_client::MAX_PAGE_SIZE;

use crate::download_queue::{DownloadScheduler, SubmitOutcome};
use crate::error_log::ErrorLog;
use crate::extractor::extract_media;
use crate::traits::PlatformApi;

/// Polled endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Favorites,
    UserTimeline,
    HomeTimeline,
}

impl Endpoint {
    pub const ALL: [Endpoint; 3] = [
        Endpoint::Favorites,
        Endpoint::UserTimeline,
        Endpoint::HomeTimeline,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Favorites => "favorites/list",
            Endpoint::UserTimeline => "statuses/user_timeline",
            Endpoint::HomeTimeline => "statuses/home_timeline",
        }
    }

    /// Whether each request is made on behalf of one crawl target.
    pub fn iterates_targets(&self) -> bool {
        !matches!(self, Endpoint::HomeTimeline)
    }

    /// Platform limits for a 15 minute window.
    pub fn default_budget(&self) -> RateBudget {
        let window = Duration::from_secs(15 * 60);
        let quota = match self {
            Endpoint::Favorites => 75,
            Endpoint::UserTimeline => 900,
            Endpoint::HomeTimeline => 15,
        };
        RateBudget { window, quota }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Requests allowed per window for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub window: Duration,
    pub quota: u32,
}

impl RateBudget {
    /// `window / (quota - 1)`, rounded up to a whole millisecond. One request of
    /// the quota is held back to absorb timer jitter.
    pub fn interval(&self) -> Duration {
        let slots = u128::from(self.quota.saturating_sub(1).max(1));
        let millis = self.window.as_millis().div_ceil(slots);
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

/// One request the scheduler decided to issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlJob {
    pub endpoint: Endpoint,
    pub target: Option<CrawlTarget>,
}

struct EndpointTimer {
    endpoint: Endpoint,
    interval: Duration,
    cursor: usize,
    next_due: Instant,
}

/// Independent round-robin timers over a shared, fixed target list.
pub struct CrawlScheduler {
    targets: Arc<[CrawlTarget]>,
    timers: Vec<EndpointTimer>,
}

impl CrawlScheduler {
    /// Each iterating endpoint starts at its own random offset into `targets`.
    pub fn new(
        targets: Arc<[CrawlTarget]>,
        budgets: &[(Endpoint, RateBudget)],
        start: Instant,
    ) -> Self {
        let mut rng = rand::rng();
        let len = targets.len();
        let cursors: Vec<usize> = budgets
            .iter()
            .map(|_| if len == 0 { 0 } else { rng.random_range(0..len) })
            .collect();
        Self::with_cursors(targets, budgets, &cursors, start)
    }

    /// Like `new` with explicit starting cursors, one per budget.
    pub fn with_cursors(
        targets: Arc<[CrawlTarget]>,
        budgets: &[(Endpoint, RateBudget)],
        cursors: &[usize],
        start: Instant,
    ) -> Self {
        let len = targets.len().max(1);
        let timers = budgets
            .iter()
            .zip(cursors.iter().copied().chain(std::iter::repeat(0)))
            .map(|((endpoint, budget), cursor)| {
                let interval = budget.interval();
                info!(
                    endpoint = %endpoint,
                    interval_ms = interval.as_millis() as u64,
                    cursor,
                    "Crawl timer armed"
                );
                EndpointTimer {
                    endpoint: *endpoint,
                    interval,
                    cursor: cursor % len,
                    next_due: start + interval,
                }
            })
            .collect();

        Self { targets, timers }
    }

    /// All endpoints with their default budgets.
    pub fn default_budgets() -> Vec<(Endpoint, RateBudget)> {
        Endpoint::ALL
            .iter()
            .map(|e| (*e, e.default_budget()))
            .collect()
    }

    /// Fire every timer that is due at `now`. A timer fires at most once per
    /// call; if it fell behind it re-arms one interval after `now` instead of
    /// catching up.
    pub fn poll(&mut self, now: Instant) -> Vec<CrawlJob> {
        let mut jobs = Vec::new();
        for i in 0..self.timers.len() {
            let timer = &mut self.timers[i];
            if timer.next_due > now {
                continue;
            }
            let next = timer.next_due + timer.interval;
            timer.next_due = if next > now { next } else { now + timer.interval };

            if let Some(job) = self.next_job(i) {
                jobs.push(job);
            }
        }
        jobs
    }

    /// Select the timer's current target and advance its cursor.
    fn next_job(&mut self, timer: usize) -> Option<CrawlJob> {
        let timer = &mut self.timers[timer];
        if !timer.endpoint.iterates_targets() {
            return Some(CrawlJob {
                endpoint: timer.endpoint,
                target: None,
            });
        }
        if self.targets.is_empty() {
            return None;
        }

        let target = self.targets[timer.cursor].clone();
        timer.cursor += 1;
        if timer.cursor >= self.targets.len() {
            timer.cursor = 0;
        }
        Some(CrawlJob {
            endpoint: timer.endpoint,
            target: Some(target),
        })
    }

    pub fn cursor(&self, endpoint: Endpoint) -> Option<usize> {
        self.timers
            .iter()
            .find(|t| t.endpoint == endpoint)
            .map(|t| t.cursor)
    }
}

/// Executes crawl jobs: one request, extraction, low-priority submission.
pub struct Crawler {
    api: Arc<dyn PlatformApi>,
    downloads: DownloadScheduler,
    errors: Arc<ErrorLog>,
}

impl Crawler {
    pub fn new(
        api: Arc<dyn PlatformApi>,
        downloads: DownloadScheduler,
        errors: Arc<ErrorLog>,
    ) -> Self {
        Self {
            api,
            downloads,
            errors,
        }
    }

    /// Returns the number of tasks queued.
    pub async fn run(&self, job: CrawlJob) -> usize {
        let handle = job.target.as_ref().map(|t| t.handle.as_str());
        info!(endpoint = %job.endpoint, screen_name = ?handle, "Crawling");

        let tweets = match self
            .api
            .timeline(job.endpoint, job.target.as_ref(), MAX_PAGE_SIZE)
            .await
        {
            Ok(tweets) => tweets,
            Err(e) => {
                let context = match handle {
                    Some(h) => format!("{} screen_name={h}", job.endpoint),
                    None => job.endpoint.to_string(),
                };
                let message = format!("{e:#}");
                self.errors.record(&context, &message).await;
                return 0;
            }
        };

        tweets
            .iter()
            .flat_map(extract_media)
            .map(|item| self.downloads.submit(DownloadTask::low(item)))
            .filter(|outcome| *outcome == SubmitOutcome::Queued)
            .count()
    }
}
