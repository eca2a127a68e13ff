//! Queue promotion job: releases notifications held for quiet hours once
//! their hold has elapsed.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing;

use casedesk_core::clock::Clock;
use casedesk_core::error::AppError;
use casedesk_core::result::AppResult;
use casedesk_database::store::NotificationStore;

use crate::executor::{JobExecutionError, JobHandler};

/// Job type under which the promoter is registered.
pub const PROMOTION_JOB: &str = "notification_promotion";

/// Outcome of one promotion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    /// Due rows claimed by this run.
    pub selected: usize,
    /// Rows this run moved to `delivered`.
    pub promoted: usize,
    /// Rows whose update failed; retried next run.
    pub failed: usize,
    /// Rows promoted by a concurrent run after selection.
    pub skipped: usize,
}

/// Promotes due `pending` rows to `delivered`.
///
/// Rows are claimed through [`NotificationStore::claim_due`], so
/// overlapping runs split the due rows instead of racing for the same ones.
#[derive(Debug)]
pub struct QueuePromoter {
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl QueuePromoter {
    /// Create a promoter that runs with `batch_size` when scheduled.
    pub fn new(store: Arc<dyn NotificationStore>, clock: Arc<dyn Clock>, batch_size: usize) -> Self {
        Self {
            store,
            clock,
            batch_size,
        }
    }

    /// Promote up to `batch_size` due rows, oldest hold first.
    ///
    /// A failed row update is counted and the batch continues. Only a
    /// failure to read the batch is returned as an error.
    pub async fn promote_queued(&self, batch_size: usize) -> AppResult<PromotionReport> {
        if batch_size == 0 {
            return Err(AppError::validation("Promotion batch size must be positive"));
        }

        let now = self.clock.now();
        let claim = self.store.claim_due(now, batch_size).await?;

        for (id, e) in &claim.failed {
            tracing::warn!(notification_id = %id, error = %e, "Failed to promote notification");
        }
        if claim.skipped > 0 {
            tracing::debug!(skipped = claim.skipped, "Rows already promoted elsewhere");
        }

        let report = PromotionReport {
            selected: claim.selected,
            promoted: claim.promoted.len(),
            failed: claim.failed.len(),
            skipped: claim.skipped,
        };

        if report.selected > 0 {
            tracing::info!(
                selected = report.selected,
                promoted = report.promoted,
                failed = report.failed,
                skipped = report.skipped,
                "Promoted queued notifications"
            );
        } else {
            tracing::debug!("No queued notifications due");
        }
        Ok(report)
    }
}

#[async_trait]
impl JobHandler for QueuePromoter {
    fn job_type(&self) -> &str {
        PROMOTION_JOB
    }

    async fn execute(&self) -> Result<Option<Value>, JobExecutionError> {
        let report = self
            .promote_queued(self.batch_size)
            .await
            .map_err(JobExecutionError::from_app)?;
        Ok(Some(serde_json::to_value(report).map_err(AppError::from)?))
    }
}
