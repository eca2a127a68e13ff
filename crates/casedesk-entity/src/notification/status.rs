//! Delivery status and priority enumerations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a notification row.
///
/// The only transition is `Pending -> Delivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delivery_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Held back by the recipient's quiet hours.
    Pending,
    /// Visible to the recipient.
    Delivered,
}

impl DeliveryStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        matches!((self, next), (Self::Pending, Self::Delivered))
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Notification priority levels.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "notification_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    /// Background events.
    Low,
    /// Standard events.
    #[default]
    Normal,
    /// Important events.
    High,
    /// Requires immediate attention.
    Urgent,
}

impl NotificationPriority {
    /// Convert to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
