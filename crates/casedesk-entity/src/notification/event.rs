//! Normalized business event handed to the dispatcher.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use casedesk_core::error::AppError;
use casedesk_core::types::id::{CaseId, FirmId, UserId};

use super::status::NotificationPriority;

/// How the recipients of an event are determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStrategy {
    /// One explicitly named user.
    Single,
    /// Every active member of the firm's team.
    Team,
    /// Everyone participating in the referenced case.
    CaseMembers,
    /// The current assignees of the referenced entity.
    AssignedUsers,
    /// An explicit, caller-supplied set of users.
    Custom,
}

impl RecipientStrategy {
    /// Return the strategy as a snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Team => "team",
            Self::CaseMembers => "case_members",
            Self::AssignedUsers => "assigned_users",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for RecipientStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RecipientStrategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Self::Single),
            "team" => Ok(Self::Team),
            "case_members" => Ok(Self::CaseMembers),
            "assigned_users" => Ok(Self::AssignedUsers),
            "custom" => Ok(Self::Custom),
            other => Err(AppError::validation(format!(
                "Unknown recipient strategy '{other}'"
            ))),
        }
    }
}

/// A domain event (case updated, hearing rescheduled, task overdue, ...)
/// in the shape the dispatcher consumes. Consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Event type tag, e.g. `hearing_rescheduled`.
    pub event_type: String,
    /// Recipient resolution strategy.
    pub recipient_strategy: RecipientStrategy,
    /// Explicit recipients; required for `single` and `custom`.
    #[serde(default)]
    pub recipient_ids: Option<Vec<UserId>>,
    /// The business entity this notification is about.
    pub reference_id: String,
    /// Case the entity belongs to, if any.
    #[serde(default)]
    pub case_id: Option<CaseId>,
    /// Owning firm.
    pub firm_id: FirmId,
    /// The user whose action produced the event.
    #[serde(default)]
    pub actor_id: Option<UserId>,
    /// Notification title.
    pub title: String,
    /// Notification body text.
    pub message: String,
    /// Free-form category label.
    pub category: String,
    /// Priority level.
    #[serde(default)]
    pub priority: NotificationPriority,
    /// Deep link opened when the notification is clicked.
    #[serde(default)]
    pub action_url: Option<String>,
    /// Opaque key/value bag.
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
    /// When the event originated.
    pub occurred_at: DateTime<Utc>,
    /// Idempotency key; defaults to `{event_type}:{reference_id}`.
    #[serde(default)]
    pub dedup_key: Option<String>,
}

impl NotificationEvent {
    /// Create an event with the mandatory fields; the rest default.
    pub fn new(
        event_type: impl Into<String>,
        recipient_strategy: RecipientStrategy,
        firm_id: FirmId,
        reference_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let event_type = event_type.into();
        Self {
            category: event_type.split('_').next().unwrap_or_default().to_string(),
            event_type,
            recipient_strategy,
            recipient_ids: None,
            reference_id: reference_id.into(),
            case_id: None,
            firm_id,
            actor_id: None,
            title: title.into(),
            message: message.into(),
            priority: NotificationPriority::Normal,
            action_url: None,
            metadata: empty_metadata(),
            occurred_at: Utc::now(),
            dedup_key: None,
        }
    }

    /// Set explicit recipients.
    pub fn with_recipients(mut self, ids: impl IntoIterator<Item = UserId>) -> Self {
        self.recipient_ids = Some(ids.into_iter().collect());
        self
    }

    /// Set the case.
    pub fn with_case(mut self, case_id: CaseId) -> Self {
        self.case_id = Some(case_id);
        self
    }

    /// Set the actor.
    pub fn with_actor(mut self, actor_id: UserId) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    /// Set the origination instant.
    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the deep link.
    pub fn with_action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }

    /// Set the metadata bag.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Override the idempotency key.
    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    /// Key under which at most one row per recipient may exist.
    pub fn effective_dedup_key(&self) -> String {
        match &self.dedup_key {
            Some(key) => key.clone(),
            None => format!("{}:{}", self.event_type, self.reference_id),
        }
    }
}

fn empty_metadata() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}
