use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use photodump_common::AppConfig;
use photodump_harvester::bootstrap::bootstrap;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("photodump=info".parse()?)
                .add_directive("photodump_harvester=info".parse()?)
                .add_directive("twitter_client=info".parse()?),
        )
        .init();

    info!("photodump starting...");

    let config = AppConfig::from_env()?;
    let harvester = bootstrap(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down..."),
            Err(e) => warn!(error = %e, "could not listen for interrupt, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    harvester.run(shutdown_rx).await;
    Ok(())
}
