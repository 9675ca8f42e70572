use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A downloadable photo discovered in a post. `file_name` is its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub file_name: String,
    pub remote_url: String,
    pub created_at: DateTime<Utc>,
    pub author_handle: String,
    pub caption_text: String,
    pub extension: String,
    pub source_post_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Live stream discoveries: skip the queue and the concurrency ceiling.
    High,
    /// Crawl discoveries: queued FIFO.
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub item: MediaItem,
    pub priority: Priority,
}

impl DownloadTask {
    pub fn high(item: MediaItem) -> Self {
        Self {
            item,
            priority: Priority::High,
        }
    }

    pub fn low(item: MediaItem) -> Self {
        Self {
            item,
            priority: Priority::Low,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.item.file_name
    }
}

/// A followed account that the crawler polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlTarget {
    pub handle: String,
    pub account_id: String,
}
