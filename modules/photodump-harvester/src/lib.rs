pub mod bootstrap;
pub mod crawl;
pub mod dedup;
pub mod download;
pub mod download_queue;
pub mod error_log;
pub mod extractor;
pub mod harvester;
pub mod like_folder;
pub mod stream_listener;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
