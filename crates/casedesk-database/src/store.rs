//! The notification store contract shared by every delivery component.
//!
//! Rows are owned by the store. Components mutate them only through
//! [`NotificationStore::claim_due`] (promotion) and
//! [`NotificationStore::mark_read`] (user action).

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tracing::warn;

use casedesk_core::error::AppError;
use casedesk_core::result::AppResult;
use casedesk_core::types::id::{NotificationId, UserId};
use casedesk_entity::notification::{ChangeEvent, DeliveryStatus, NewNotification, Notification};

/// Stream of change signals for one recipient. Dropping it releases the
/// underlying subscription.
pub type ChangeStream = BoxStream<'static, ChangeEvent>;

/// Narrow a store-wide change broadcast to the events for `recipient_id`.
///
/// Lagged receivers skip ahead; the stream ends when the sender is dropped.
pub(crate) fn recipient_changes(
    rx: broadcast::Receiver<ChangeEvent>,
    recipient_id: UserId,
) -> ChangeStream {
    futures::stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.recipient_id == recipient_id => return Some((event, rx)),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(recipient_id = %recipient_id, skipped, "Change subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

/// Result of inserting a row.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// A new row was written.
    Inserted(Notification),
    /// A row with the same `(dedup_key, recipient_id)` already exists.
    Duplicate,
}

/// Row ordering for [`NotificationStore::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOrder {
    /// Oldest first; ties broken by id.
    CreatedAtAsc,
    /// Newest first; ties broken by id.
    CreatedAtDesc,
    /// Earliest hold expiry first.
    SnoozedUntilAsc,
}

/// Conjunctive row filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationFilter {
    /// Only rows for this recipient.
    pub recipient_id: Option<UserId>,
    /// Only rows with `created_at` strictly after this instant.
    pub created_after: Option<DateTime<Utc>>,
    /// Only rows with this read flag.
    pub read: Option<bool>,
    /// Only rows in this delivery state.
    pub delivery_status: Option<DeliveryStatus>,
    /// Only rows whose `snoozed_until` is at or before this instant.
    pub snoozed_until_at_or_before: Option<DateTime<Utc>>,
}

impl NotificationFilter {
    /// Rows addressed to `recipient_id`.
    pub fn for_recipient(recipient_id: UserId) -> Self {
        Self {
            recipient_id: Some(recipient_id),
            ..Self::default()
        }
    }

    /// Pending rows whose hold has elapsed at `now`.
    pub fn due_at(now: DateTime<Utc>) -> Self {
        Self {
            delivery_status: Some(DeliveryStatus::Pending),
            snoozed_until_at_or_before: Some(now),
            ..Self::default()
        }
    }

    /// Restrict to rows created strictly after `cursor`.
    pub fn created_after(mut self, cursor: DateTime<Utc>) -> Self {
        self.created_after = Some(cursor);
        self
    }

    /// Restrict to unread, delivered rows.
    pub fn unread_delivered(mut self) -> Self {
        self.read = Some(false);
        self.delivery_status = Some(DeliveryStatus::Delivered);
        self
    }

    /// Evaluate the filter against an in-memory row.
    pub fn matches(&self, row: &Notification) -> bool {
        self.recipient_id.is_none_or(|r| row.recipient_id == r)
            && self.created_after.is_none_or(|t| row.created_at > t)
            && self.read.is_none_or(|r| row.read == r)
            && self.delivery_status.is_none_or(|s| row.delivery_status == s)
            && self
                .snoozed_until_at_or_before
                .is_none_or(|t| row.snoozed_until.is_some_and(|until| until <= t))
    }
}

/// Persistence and change-feed primitives consumed by the pipeline.
#[async_trait]
pub trait NotificationStore: Send + Sync + fmt::Debug {
    /// Insert a row unless `(dedup_key, recipient_id)` already exists.
    async fn insert(&self, row: NewNotification) -> AppResult<InsertOutcome>;

    /// Fetch rows matching `filter`.
    async fn query(
        &self,
        filter: &NotificationFilter,
        order: QueryOrder,
        limit: Option<usize>,
    ) -> AppResult<Vec<Notification>>;

    /// Compare-and-set `pending -> delivered` for one row.
    ///
    /// Returns `false` when the row was not pending (already promoted by a
    /// concurrent caller, or missing).
    async fn mark_delivered(&self, id: NotificationId, at: DateTime<Utc>) -> AppResult<bool>;

    /// Set the read flag on a recipient's row.
    async fn mark_read(&self, id: NotificationId, recipient_id: UserId) -> AppResult<bool>;

    /// Subscribe to inserts/updates of rows addressed to `recipient_id`.
    async fn subscribe(&self, recipient_id: UserId) -> AppResult<ChangeStream>;

    /// Claim up to `limit` due rows, oldest hold first, and promote them
    /// to `delivered` at `now`.
    ///
    /// A row is claimed by at most one caller, so overlapping claims split
    /// the due rows between them. The default reads the batch and promotes
    /// row by row through [`mark_delivered`](Self::mark_delivered); stores
    /// that can lock rows override it with a single atomic claim.
    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> AppResult<PromotionClaim> {
        let due = self
            .query(&NotificationFilter::due_at(now), QueryOrder::SnoozedUntilAsc, Some(limit))
            .await?;
        let mut claim = PromotionClaim {
            selected: due.len(),
            ..PromotionClaim::default()
        };
        for mut row in due {
            match self.mark_delivered(row.id, now).await {
                Ok(true) => {
                    row.mark_delivered(now);
                    claim.promoted.push(row);
                }
                Ok(false) => claim.skipped += 1,
                Err(e) => claim.failed.push((row.id, e)),
            }
        }
        Ok(claim)
    }
}

/// Outcome of one [`NotificationStore::claim_due`] call.
#[derive(Debug, Default)]
pub struct PromotionClaim {
    /// Due rows the claim considered.
    pub selected: usize,
    /// Rows promoted by this claim, as stored afterwards.
    pub promoted: Vec<Notification>,
    /// Rows whose update failed. They stay pending for the next run.
    pub failed: Vec<(NotificationId, AppError)>,
    /// Rows promoted by a concurrent caller after selection.
    pub skipped: usize,
}
