//! Row-level change signals published by the notification store.

use serde::{Deserialize, Serialize};

use casedesk_core::types::id::{NotificationId, UserId};

/// Kind of mutation observed on a notification row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A row was inserted.
    Insert,
    /// A row was updated (promotion, read flag).
    Update,
}

/// A payload-free "something changed" signal for one recipient.
///
/// Consumers re-read the store on receipt; the signal never carries the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Mutation kind.
    #[serde(rename = "op")]
    pub kind: ChangeKind,
    /// Affected row.
    #[serde(rename = "id")]
    pub notification_id: NotificationId,
    /// Recipient of the affected row.
    pub recipient_id: UserId,
}
