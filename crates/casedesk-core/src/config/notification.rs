//! Notification pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Dispatch, promotion, and fallback-polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Interval between fallback poller checks, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Maximum queued rows examined per promotion run.
    #[serde(default = "default_batch_size")]
    pub promotion_batch_size: usize,
    /// Whether the actor is removed from `case_members` recipient sets.
    #[serde(default = "default_true")]
    pub exclude_actor_from_case_members: bool,
    /// Buffer size of the in-process change broadcast.
    #[serde(default = "default_change_buffer")]
    pub change_buffer_size: usize,
}

impl NotificationsConfig {
    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject settings that would stall the poller or the change feed.
    pub fn validate(&self) -> Result<(), AppError> {
        for (name, value) in [
            ("poll_interval_ms", self.poll_interval_ms as usize),
            ("promotion_batch_size", self.promotion_batch_size),
            ("change_buffer_size", self.change_buffer_size),
        ] {
            if value == 0 {
                return Err(AppError::configuration(format!(
                    "notifications.{name} must be positive"
                )));
            }
        }
        Ok(())
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            promotion_batch_size: default_batch_size(),
            exclude_actor_from_case_members: true,
            change_buffer_size: default_change_buffer(),
        }
    }
}

fn default_poll_interval() -> u64 {
    30_000
}

fn default_batch_size() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_change_buffer() -> usize {
    256
}
