use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info};

use photodump_common::{DownloadTask, Priority};

use crate::dedup::DedupCache;

/// Executes one download. Implementations swallow their own failures: a
/// returned future always means "slot can be released".
#[async_trait]
pub trait TaskRunner: Send + Sync + 'static {
    async fn run(&self, task: DownloadTask);
}

#[derive(Debug, Clone, Copy)]
pub struct DownloadLimits {
    /// Maximum concurrently executing low-priority tasks.
    pub max_in_flight: usize,
    /// Maximum tasks started by a single `tick`.
    pub batch_per_tick: usize,
}

impl Default for DownloadLimits {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            batch_per_tick: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Already known to the cache.
    Dropped,
    /// Started immediately on the priority lane.
    Dispatched,
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub queued: usize,
    pub in_flight: usize,
    pub max_in_flight: usize,
    pub priority_in_flight: usize,
    pub shutting_down: bool,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<DownloadTask>,
    in_flight: usize,
    priority_in_flight: usize,
    shutting_down: bool,
}

struct Inner {
    cache: Arc<DedupCache>,
    runner: Arc<dyn TaskRunner>,
    limits: DownloadLimits,
    state: Mutex<QueueState>,
}

/// Bounded-concurrency download executor with an unbounded FIFO and a
/// high-priority lane that ignores both the queue and the ceiling.
///
/// Cloning shares the same queue.
#[derive(Clone)]
pub struct DownloadScheduler {
    inner: Arc<Inner>,
}

impl DownloadScheduler {
    pub fn new(
        cache: Arc<DedupCache>,
        runner: Arc<dyn TaskRunner>,
        limits: DownloadLimits,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                runner,
                limits,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn submit(&self, task: DownloadTask) -> SubmitOutcome {
        if self.inner.cache.contains_cached(task.file_name()) {
            return SubmitOutcome::Dropped;
        }

        match task.priority {
            Priority::High => {
                info!(file = task.file_name(), "Dispatching high priority download");
                self.lock().priority_in_flight += 1;
                self.spawn(task, Lane::Priority);
                SubmitOutcome::Dispatched
            }
            Priority::Low => {
                self.lock().queue.push_back(task);
                SubmitOutcome::Queued
            }
        }
    }

    /// Start as many queued tasks as free capacity and the per-tick batch cap allow.
    /// Returns the number started.
    pub fn tick(&self) -> usize {
        let batch: Vec<DownloadTask> = {
            let mut state = self.lock();
            let free = self.inner.limits.max_in_flight.saturating_sub(state.in_flight);
            let n = free
                .min(self.inner.limits.batch_per_tick)
                .min(state.queue.len());
            state.in_flight += n;
            state.queue.drain(..n).collect()
        };

        let started = batch.len();
        for task in batch {
            self.spawn(task, Lane::Queued);
        }
        started
    }

    /// Stop accepting the idea of new work: the queue still drains.
    pub fn begin_shutdown(&self) {
        let mut state = self.lock();
        state.shutting_down = true;
        info!(queued = state.queue.len(), in_flight = state.in_flight, "Download queue draining");
    }

    /// Shutdown was requested and the queue has emptied.
    pub fn is_drained(&self) -> bool {
        let state = self.lock();
        state.shutting_down && state.queue.is_empty()
    }

    /// Drained and nothing is executing on either lane.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.shutting_down
            && state.queue.is_empty()
            && state.in_flight == 0
            && state.priority_in_flight == 0
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.lock();
        QueueStatus {
            queued: state.queue.len(),
            in_flight: state.in_flight,
            max_in_flight: self.inner.limits.max_in_flight,
            priority_in_flight: state.priority_in_flight,
            shutting_down: state.shutting_down,
        }
    }

    fn spawn(&self, task: DownloadTask, lane: Lane) {
        let guard = SlotGuard {
            inner: Arc::clone(&self.inner),
            lane,
        };
        let runner = Arc::clone(&self.inner.runner);
        tokio::spawn(async move {
            let _guard = guard;
            runner.run(task).await;
        });
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.lock()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy)]
enum Lane {
    Queued,
    Priority,
}

/// Releases the task's slot when the task finishes, including by panic.
struct SlotGuard {
    inner: Arc<Inner>,
    lane: Lane,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        match self.lane {
            Lane::Queued => state.in_flight = state.in_flight.saturating_sub(1),
            Lane::Priority => {
                state.priority_in_flight = state.priority_in_flight.saturating_sub(1)
            }
        }
        debug!(in_flight = state.in_flight, "download slot released");
    }
}
