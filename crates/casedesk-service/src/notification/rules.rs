//! Recipient resolution: who receives a given event.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use casedesk_core::config::NotificationsConfig;
use casedesk_core::error::AppError;
use casedesk_core::result::AppResult;
use casedesk_core::types::id::{CaseId, FirmId, UserId};
use casedesk_entity::notification::{NotificationEvent, RecipientStrategy};

/// A firm team member as reported by the membership directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// The member's user id.
    pub user_id: UserId,
    /// Whether the membership is currently active.
    pub active: bool,
}

impl Member {
    /// An active member.
    pub fn active(user_id: UserId) -> Self {
        Self {
            user_id,
            active: true,
        }
    }

    /// A deactivated member.
    pub fn inactive(user_id: UserId) -> Self {
        Self {
            user_id,
            active: false,
        }
    }
}

/// Firm, case, and assignment membership owned by the practice-management
/// side of the application.
#[async_trait]
pub trait MembershipDirectory: Send + Sync + fmt::Debug {
    /// Every member of the firm's team, active or not.
    async fn team_members(&self, firm_id: FirmId) -> AppResult<Vec<Member>>;

    /// Users participating in the case.
    async fn case_participants(&self, case_id: CaseId) -> AppResult<Vec<UserId>>;

    /// Current assignees of the referenced entity.
    async fn assignees(&self, reference_id: &str) -> AppResult<Vec<UserId>>;
}

/// Maps an event's recipient strategy to a concrete, duplicate-free list
/// of users.
#[derive(Debug, Clone)]
pub struct RecipientResolver {
    directory: Arc<dyn MembershipDirectory>,
    exclude_actor_from_case_members: bool,
}

impl RecipientResolver {
    /// Create a resolver. The actor is excluded from `case_members` sets.
    pub fn new(directory: Arc<dyn MembershipDirectory>) -> Self {
        Self {
            directory,
            exclude_actor_from_case_members: true,
        }
    }

    /// Create a resolver honoring the configured actor exclusion.
    pub fn from_config(directory: Arc<dyn MembershipDirectory>, config: &NotificationsConfig) -> Self {
        Self::new(directory).exclude_actor_from_case_members(config.exclude_actor_from_case_members)
    }

    /// Whether the actor is removed from `case_members` sets.
    pub fn exclude_actor_from_case_members(mut self, exclude: bool) -> Self {
        self.exclude_actor_from_case_members = exclude;
        self
    }

    /// Resolve the recipients of `event`.
    ///
    /// Validation failures and directory errors are returned to the caller;
    /// nothing has been written at that point.
    pub async fn resolve(&self, event: &NotificationEvent) -> AppResult<Vec<UserId>> {
        let candidates = match event.recipient_strategy {
            RecipientStrategy::Single => {
                let ids = explicit_ids(event)?;
                if ids.len() != 1 {
                    return Err(AppError::validation(format!(
                        "Strategy 'single' takes exactly one recipient, got {}",
                        ids.len()
                    )));
                }
                ids.to_vec()
            }
            RecipientStrategy::Custom => explicit_ids(event)?.to_vec(),
            RecipientStrategy::Team => self
                .directory
                .team_members(event.firm_id)
                .await?
                .into_iter()
                .filter(|m| m.active)
                .map(|m| m.user_id)
                .collect(),
            RecipientStrategy::CaseMembers => {
                let case_id = event.case_id.ok_or_else(|| {
                    AppError::validation(format!(
                        "Strategy 'case_members' requires a case_id (event '{}')",
                        event.event_type
                    ))
                })?;
                let participants = self.directory.case_participants(case_id).await?;
                match event.actor_id {
                    Some(actor) if self.exclude_actor_from_case_members => {
                        participants.into_iter().filter(|u| *u != actor).collect()
                    }
                    _ => participants,
                }
            }
            RecipientStrategy::AssignedUsers => {
                self.directory.assignees(&event.reference_id).await?
            }
        };

        let recipients = dedup_preserving_order(candidates);
        debug!(
            event_type = %event.event_type,
            strategy = %event.recipient_strategy,
            recipients = recipients.len(),
            "Resolved recipients"
        );
        Ok(recipients)
    }
}

fn explicit_ids(event: &NotificationEvent) -> AppResult<&[UserId]> {
    match event.recipient_ids.as_deref() {
        Some(ids) if !ids.is_empty() => Ok(ids),
        _ => Err(AppError::validation(format!(
            "Strategy '{}' requires a non-empty recipient_ids set",
            event.recipient_strategy
        ))),
    }
}

fn dedup_preserving_order(ids: Vec<UserId>) -> Vec<UserId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
