use anyhow::{anyhow, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use super::session_tracker::SessionTracker;

/// Periodic sweep removing expired sessions
pub struct CleanupJob {
    scheduler: JobScheduler,
}

impl CleanupJob {
    /// Schedule the sweep with a six-field cron expression and start it
    pub async fn start(sessions: Arc<SessionTracker>, schedule: &str) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| anyhow!("Failed to create job scheduler: {}", e))?;

        let job = Job::new_async(schedule, move |_uuid, _l| {
            let sessions = Arc::clone(&sessions);
            Box::pin(async move {
                match sessions.cleanup_expired(Utc::now()).await {
                    Ok(report) => info!(
                        "Session cleanup: {} removed, {} retained",
                        report.removed.len(),
                        report.retained
                    ),
                    Err(e) => error!("Session cleanup failed: {}", e),
                }
            })
        })
        .map_err(|e| anyhow!("Failed to create session cleanup job: {}", e))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| anyhow!("Failed to add job to scheduler: {}", e))?;
        scheduler
            .start()
            .await
            .map_err(|e| anyhow!("Failed to start job scheduler: {}", e))?;

        info!("Session cleanup scheduled ({})", schedule);
        Ok(Self { scheduler })
    }

    pub async fn stop(mut self) -> Result<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| anyhow!("Failed to stop job scheduler: {}", e))?;
        info!("Session cleanup stopped");
        Ok(())
    }
}
