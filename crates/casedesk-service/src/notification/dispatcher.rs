//! Fan-out of one event into per-recipient notification rows.

use std::sync::Arc;

use tracing::{debug, info, warn};

use casedesk_core::error::AppError;
use casedesk_core::result::AppResult;
use casedesk_core::types::id::{NotificationId, UserId};
use casedesk_database::store::{InsertOutcome, NotificationStore};
use casedesk_entity::notification::{NewNotification, NotificationEvent};

use super::quiet_hours::QuietHoursGate;
use super::rules::RecipientResolver;

/// Per-recipient outcome of a dispatch.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Rows written by this call.
    pub created: Vec<NotificationId>,
    /// Recipients that already had a row for this event.
    pub duplicates: Vec<UserId>,
    /// Recipients whose row could not be written.
    pub skipped: Vec<(UserId, AppError)>,
}

impl DispatchReport {
    /// Number of resolved recipients.
    pub fn recipients(&self) -> usize {
        self.created.len() + self.duplicates.len() + self.skipped.len()
    }
}

/// Entry point for business-event producers.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    resolver: RecipientResolver,
    gate: QuietHoursGate,
    store: Arc<dyn NotificationStore>,
}

impl NotificationDispatcher {
    /// Create a dispatcher.
    pub fn new(
        resolver: RecipientResolver,
        gate: QuietHoursGate,
        store: Arc<dyn NotificationStore>,
    ) -> Self {
        Self {
            resolver,
            gate,
            store,
        }
    }

    /// Resolve, gate and persist `event`, returning the ids of rows created
    /// by this call.
    ///
    /// Resolution errors are returned before any row is written. A failure
    /// writing one recipient's row is logged and does not affect the others.
    pub async fn dispatch(&self, event: &NotificationEvent) -> AppResult<Vec<NotificationId>> {
        Ok(self.dispatch_detailed(event).await?.created)
    }

    /// Like [`dispatch`](Self::dispatch) but reports every recipient's outcome.
    pub async fn dispatch_detailed(&self, event: &NotificationEvent) -> AppResult<DispatchReport> {
        let recipients = self.resolver.resolve(event).await?;
        let mut report = DispatchReport::default();

        for recipient in recipients {
            let plan = self.gate.plan(recipient, event.occurred_at).await;
            let row = NewNotification::for_recipient(event, recipient, plan);

            match self.store.insert(row).await {
                Ok(InsertOutcome::Inserted(notification)) => report.created.push(notification.id),
                Ok(InsertOutcome::Duplicate) => {
                    debug!(
                        recipient_id = %recipient,
                        dedup_key = %event.effective_dedup_key(),
                        "Notification already dispatched"
                    );
                    report.duplicates.push(recipient);
                }
                Err(e) => {
                    warn!(
                        recipient_id = %recipient,
                        event_type = %event.event_type,
                        error = %e,
                        "Skipped recipient"
                    );
                    report.skipped.push((recipient, e));
                }
            }
        }

        info!(
            event_type = %event.event_type,
            reference_id = %event.reference_id,
            created = report.created.len(),
            duplicates = report.duplicates.len(),
            skipped = report.skipped.len(),
            "Dispatched notification event"
        );
        Ok(report)
    }
}
