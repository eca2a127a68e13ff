//! Notification entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use casedesk_core::types::id::{CaseId, FirmId, NotificationId, UserId};

use super::event::NotificationEvent;
use super::status::{DeliveryStatus, NotificationPriority};

/// One notification for one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Notification {
    /// Unique notification identifier.
    pub id: NotificationId,
    /// The recipient user.
    pub recipient_id: UserId,
    /// Event type that produced this notification.
    pub notification_type: String,
    /// Notification title.
    pub title: String,
    /// Notification body text.
    pub message: String,
    /// Free-form category label.
    pub category: String,
    /// Priority level.
    pub priority: NotificationPriority,
    /// Whether the user has read this notification.
    pub read: bool,
    /// Delivery lifecycle state.
    pub delivery_status: DeliveryStatus,
    /// Hold-until instant while pending; `None` once delivered.
    pub snoozed_until: Option<DateTime<Utc>>,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
    /// When the row became visible; `None` while pending.
    pub delivered_at: Option<DateTime<Utc>>,
    /// The business entity this notification is about.
    pub reference_id: String,
    /// Related case, if any.
    pub case_id: Option<CaseId>,
    /// Owning firm.
    pub firm_id: FirmId,
    /// Deep link.
    pub action_url: Option<String>,
    /// Opaque key/value bag.
    pub metadata: serde_json::Value,
    /// Idempotency key shared by all rows of one event.
    pub dedup_key: String,
}

impl Notification {
    /// Check if the notification is unread.
    pub fn is_unread(&self) -> bool {
        !self.read
    }

    /// Check if the notification is held by quiet hours.
    pub fn is_pending(&self) -> bool {
        self.delivery_status == DeliveryStatus::Pending
    }

    /// Whether the row is pending and its hold has elapsed at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.snoozed_until.is_some_and(|until| until <= now)
    }

    /// Whether `delivery_status`, `snoozed_until`, and `delivered_at` agree.
    pub fn lifecycle_is_consistent(&self) -> bool {
        match self.delivery_status {
            DeliveryStatus::Pending => self.snoozed_until.is_some() && self.delivered_at.is_none(),
            DeliveryStatus::Delivered => self.snoozed_until.is_none() && self.delivered_at.is_some(),
        }
    }

    /// Move a pending row to delivered.
    ///
    /// Returns `false` and leaves the row untouched if it was not pending.
    pub fn mark_delivered(&mut self, at: DateTime<Utc>) -> bool {
        if !self.delivery_status.can_transition_to(DeliveryStatus::Delivered) {
            return false;
        }
        self.delivery_status = DeliveryStatus::Delivered;
        self.snoozed_until = None;
        self.delivered_at = Some(at);
        true
    }
}

/// How a freshly resolved row should enter the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPlan {
    /// Visible now.
    Immediate {
        /// Delivery instant.
        at: DateTime<Utc>,
    },
    /// Queued until the recipient's quiet hours end.
    HoldUntil {
        /// End of the quiet window.
        until: DateTime<Utc>,
    },
}

/// Insert payload for a notification row; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    /// The recipient user.
    pub recipient_id: UserId,
    /// Event type.
    pub notification_type: String,
    /// Title.
    pub title: String,
    /// Body.
    pub message: String,
    /// Category.
    pub category: String,
    /// Priority.
    pub priority: NotificationPriority,
    /// Initial lifecycle state.
    pub delivery_status: DeliveryStatus,
    /// Hold-until instant when pending.
    pub snoozed_until: Option<DateTime<Utc>>,
    /// Delivery instant when delivered.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Referenced business entity.
    pub reference_id: String,
    /// Related case.
    pub case_id: Option<CaseId>,
    /// Owning firm.
    pub firm_id: FirmId,
    /// Deep link.
    pub action_url: Option<String>,
    /// Opaque key/value bag.
    pub metadata: serde_json::Value,
    /// Idempotency key.
    pub dedup_key: String,
}

impl NewNotification {
    /// Build the row for one resolved recipient of `event`.
    pub fn for_recipient(event: &NotificationEvent, recipient_id: UserId, plan: DeliveryPlan) -> Self {
        let (delivery_status, snoozed_until, delivered_at) = match plan {
            DeliveryPlan::Immediate { at } => (DeliveryStatus::Delivered, None, Some(at)),
            DeliveryPlan::HoldUntil { until } => (DeliveryStatus::Pending, Some(until), None),
        };

        Self {
            recipient_id,
            notification_type: event.event_type.clone(),
            title: event.title.clone(),
            message: event.message.clone(),
            category: event.category.clone(),
            priority: event.priority,
            delivery_status,
            snoozed_until,
            delivered_at,
            reference_id: event.reference_id.clone(),
            case_id: event.case_id,
            firm_id: event.firm_id,
            action_url: event.action_url.clone(),
            metadata: event.metadata.clone(),
            dedup_key: event.effective_dedup_key(),
        }
    }

    /// Materialize the row with store-assigned fields.
    pub fn into_notification(self, id: NotificationId, created_at: DateTime<Utc>) -> Notification {
        Notification {
            id,
            recipient_id: self.recipient_id,
            notification_type: self.notification_type,
            title: self.title,
            message: self.message,
            category: self.category,
            priority: self.priority,
            read: false,
            delivery_status: self.delivery_status,
            snoozed_until: self.snoozed_until,
            created_at,
            delivered_at: self.delivered_at,
            reference_id: self.reference_id,
            case_id: self.case_id,
            firm_id: self.firm_id,
            action_url: self.action_url,
            metadata: self.metadata,
            dedup_key: self.dedup_key,
        }
    }
}
