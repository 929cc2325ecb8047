use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::local_bookmarks::BookmarkSource;
use crate::mirror::MirrorEngine;
use crate::settings::SharedSettings;

pub struct SchedulerConfig {
    pub cron_expression: String,
    pub daemon: bool,
}

impl SchedulerConfig {
    pub fn new(cron: String, daemon: bool) -> Self {
        Self {
            cron_expression: cron,
            daemon,
        }
    }
}

/// Run mirror passes on a cron schedule until interrupted
pub async fn start_scheduler(
    config: SchedulerConfig,
    settings: SharedSettings,
    source: BookmarkSource,
) -> Result<()> {
    let mut scheduler = JobScheduler::new().await?;

    info!("⏰ Scheduler initialized with cron: {}", config.cron_expression);

    let cron_expr = config.cron_expression.clone();
    let job = Job::new_async(cron_expr.as_str(), move |_uuid, _l| {
        let settings = settings.clone();
        let source = source.clone();
        Box::pin(async move {
            info!("🔄 Scheduled mirror pass triggered");

            match MirrorEngine::new(settings) {
                Ok(mut engine) => match engine.run_pass(&source, false).await {
                    Ok(stats) => {
                        info!(
                            "✅ Scheduled pass complete: {} saved, {} updated, {} removed",
                            stats.saved, stats.updated, stats.removed
                        );
                    }
                    Err(e) => {
                        error!("❌ Scheduled mirror pass failed: {}", e);
                    }
                },
                Err(e) => {
                    error!("❌ Failed to create mirror engine: {}", e);
                }
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    if config.daemon {
        info!("🔄 Running as daemon. Press Ctrl+C to stop.");
        tokio::signal::ctrl_c().await?;
        info!("🛑 Shutting down scheduler...");
    } else {
        info!("⏰ Scheduler started. Keeping process alive...");
        tokio::signal::ctrl_c().await?;
    }

    scheduler.shutdown().await?;
    Ok(())
}
