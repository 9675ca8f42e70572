use std::path::PathBuf;
use std::time::Duration;

use crate::error::HarvestError;

type Result<T> = std::result::Result<T, HarvestError>;

/// Application configuration loaded from environment variables (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Twitter credentials
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,
    /// Account whose following list defines the crawl targets.
    pub from_screen_name: String,

    // Folders
    pub dump_folder: PathBuf,
    pub focus_folder: PathBuf,
    pub like_folder: PathBuf,
    pub postlike_folder: PathBuf,

    // Downloads
    /// Posts younger than this at download time are also copied to the focus folder.
    pub mark_as_new: Duration,
    pub max_parallel_downloads: usize,

    // Bookkeeping files
    pub error_log_path: PathBuf,
    pub following_snapshot_path: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.log_keys();
        Ok(config)
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key).filter(|v| !v.is_empty()).ok_or_else(|| {
                HarvestError::Config(format!("{key} environment variable is required"))
            })
        };

        let mark_as_new_secs: u64 = match lookup("TWITTER_IMAGE_MARK_AS_NEW_IN_SECONDS") {
            Some(v) => v.parse().map_err(|e| {
                HarvestError::Config(format!(
                    "TWITTER_IMAGE_MARK_AS_NEW_IN_SECONDS must be a number of seconds: {e}"
                ))
            })?,
            None => 24 * 60 * 60,
        };

        let max_parallel_downloads: usize = match lookup("MAX_PARALLEL_DOWNLOADS") {
            Some(v) => v.parse().map_err(|e| {
                HarvestError::Config(format!("MAX_PARALLEL_DOWNLOADS must be a number: {e}"))
            })?,
            None => 64,
        };
        if max_parallel_downloads == 0 {
            return Err(HarvestError::Config(
                "MAX_PARALLEL_DOWNLOADS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            consumer_key: required("TWITTER_CONSUMER_KEY")?,
            consumer_secret: required("TWITTER_CONSUMER_SECRET")?,
            access_token: required("TWITTER_ACCESS_TOKEN")?,
            access_secret: required("TWITTER_ACCESS_SECRET")?,
            from_screen_name: required("TWITTER_FROM")?,
            dump_folder: required("TWITTER_IMAGE_DUMP_FOLDER")?.into(),
            focus_folder: required("TWITTER_IMAGE_FOCUS_FOLDER")?.into(),
            like_folder: required("TWITTER_IMAGE_LIKE_FOLDER")?.into(),
            postlike_folder: required("TWITTER_IMAGE_POSTLIKE_FOLDER")?.into(),
            mark_as_new: Duration::from_secs(mark_as_new_secs),
            max_parallel_downloads,
            error_log_path: lookup("ERROR_LOG_PATH")
                .unwrap_or_else(|| "error.log".to_string())
                .into(),
            following_snapshot_path: lookup("FOLLOWING_SNAPSHOT_PATH")
                .unwrap_or_else(|| "followingUsers.json".to_string())
                .into(),
        })
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let head: String = val.chars().take(5).collect();
            format!("{head}...({} chars)", val.len())
        }

        tracing::info!("Config loaded:");
        tracing::info!("  TWITTER_CONSUMER_KEY: {}", preview(&self.consumer_key));
        tracing::info!("  TWITTER_ACCESS_TOKEN: {}", preview(&self.access_token));
        tracing::info!("  TWITTER_FROM: {}", self.from_screen_name);
        tracing::info!("  dump folder: {}", self.dump_folder.display());
        tracing::info!("  focus folder: {}", self.focus_folder.display());
        tracing::info!("  like folder: {}", self.like_folder.display());
        tracing::info!("  postlike folder: {}", self.postlike_folder.display());
        tracing::info!(
            "  mark as new: {}s, parallel downloads: {}",
            self.mark_as_new.as_secs(),
            self.max_parallel_downloads
        );
    }
}
