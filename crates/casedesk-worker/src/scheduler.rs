//! Cron scheduler that triggers registered jobs at a fixed cadence.

use std::sync::Arc;

use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing;

use casedesk_core::config::WorkerConfig;
use casedesk_core::error::AppError;

use crate::executor::JobExecutor;
use crate::jobs::promotion::PROMOTION_JOB;

/// Cron-based scheduler for periodic jobs
pub struct CronScheduler {
    /// The underlying job scheduler
    scheduler: JobScheduler,
    /// Executor the schedules run jobs through
    executor: Arc<JobExecutor>,
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl CronScheduler {
    /// Create a new cron scheduler
    pub async fn new(executor: Arc<JobExecutor>) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create scheduler: {e}")))?;

        Ok(Self {
            scheduler,
            executor,
        })
    }

    /// Register the notification jobs configured in `config`
    pub async fn register_configured(&self, config: &WorkerConfig) -> Result<(), AppError> {
        self.register(PROMOTION_JOB, &config.promotion_cron).await?;
        tracing::info!("All scheduled tasks registered");
        Ok(())
    }

    /// Run `job_type` on the six-field cron `schedule`.
    ///
    /// Overlapping runs are allowed; handlers must tolerate them.
    pub async fn register(&self, job_type: &str, schedule: &str) -> Result<(), AppError> {
        if !self.executor.has_handler(job_type) {
            return Err(AppError::configuration(format!(
                "Cannot schedule '{job_type}': no handler registered"
            )));
        }

        let executor = Arc::clone(&self.executor);
        let name = job_type.to_string();
        let job = CronJob::new_async(schedule, move |_uuid, _lock| {
            let executor = Arc::clone(&executor);
            let name = name.clone();
            Box::pin(async move {
                match executor.run(&name).await {
                    Ok(output) => {
                        tracing::debug!(job_type = %name, output = ?output, "Scheduled job finished")
                    }
                    Err(e) => tracing::error!(job_type = %name, error = %e, "Scheduled job failed"),
                }
            })
        })
        .map_err(|e| {
            AppError::configuration(format!("Invalid schedule '{schedule}' for {job_type}: {e}"))
        })?;

        self.scheduler.add(job).await.map_err(|e| {
            AppError::internal(format!("Failed to add {job_type} schedule: {e}"))
        })?;

        tracing::info!(job_type = %job_type, schedule = %schedule, "Registered scheduled job");
        Ok(())
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<(), AppError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::internal(format!("Failed to start scheduler: {e}")))?;

        tracing::info!("Cron scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&mut self) -> Result<(), AppError> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shutdown scheduler: {e}")))?;

        tracing::info!("Cron scheduler shut down");
        Ok(())
    }
}
