//! Job executor: runs scheduled jobs by type through registered handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing;

use casedesk_core::error::AppError;

/// A unit of scheduled work.
#[async_trait]
pub trait JobHandler: Send + Sync + std::fmt::Debug {
    /// The job type this handler runs.
    fn job_type(&self) -> &str;

    /// Run once; the optional value summarizes the outcome.
    async fn execute(&self) -> Result<Option<Value>, JobExecutionError>;
}

/// Error from job execution
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// Retrying will not help
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// The next scheduled run may succeed
    #[error("Transient job failure: {0}")]
    Transient(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

impl JobExecutionError {
    /// Classify an application error by whether a later run may succeed.
    pub fn from_app(err: AppError) -> Self {
        if err.is_transient() {
            Self::Transient(err.to_string())
        } else {
            Self::Internal(err)
        }
    }
}

/// Dispatches job runs to the handler registered for the job type
#[derive(Debug, Default)]
pub struct JobExecutor {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobExecutor {
    /// Create an executor with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job handler, replacing any previous one for its type
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type().to_string();
        tracing::info!(job_type = %job_type, "Registered job handler");
        self.handlers.insert(job_type, handler);
    }

    /// Run the handler for `job_type` once
    pub async fn run(&self, job_type: &str) -> Result<Option<Value>, JobExecutionError> {
        let handler = self.handlers.get(job_type).ok_or_else(|| {
            JobExecutionError::Permanent(format!("No handler registered for job type '{job_type}'"))
        })?;

        tracing::debug!(job_type = %job_type, "Executing job");
        handler.execute().await
    }

    /// Check if a handler is registered for a job type
    pub fn has_handler(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job types
    pub fn registered_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}
