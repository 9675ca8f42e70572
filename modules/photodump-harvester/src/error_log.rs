use std::path::PathBuf;

use chrono::Local;
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};

/// Durable append-only record of swallowed remote failures.
///
/// Every entry is also emitted through `tracing` at error level.
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn record(&self, context: &str, err: &str) {
        error!(context, error = %err, "operation failed");

        let now = Local::now();
        let line = format!(
            "{}|{} > {} {}\n",
            now.format("%Y-%m-%d"),
            now.format("%H:%M:%S"),
            context,
            err
        );
        if let Err(e) = self.append(&line).await {
            warn!(path = %self.path.display(), error = %e, "could not append to error log");
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
