pub mod config;
pub mod error;
pub mod filename;
pub mod types;

pub use config::AppConfig;
pub use error::HarvestError;
pub use filename::{transform_short_link, LikeFileName, MediaFileName};
pub use types::{CrawlTarget, DownloadTask, MediaItem, Priority};
