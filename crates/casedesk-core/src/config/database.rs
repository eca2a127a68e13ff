//! Notification store connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Pool settings for the `notifications` table.
///
/// The store keeps one pooled connection parked on `LISTEN` while any
/// realtime subscriber is attached, so the pool needs at least one more
/// for promotion claims and poller reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connections kept warm between promotion runs.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// How long a claim or poll waits for a free connection.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

impl DatabaseConfig {
    /// Acquire timeout as a [`Duration`].
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }

    /// Idle timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Reject pools too small to serve the change listener and queries
    /// at the same time.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_connections < 2 {
            return Err(AppError::configuration(
                "database.max_connections must be at least 2 (one is held by the change listener)",
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(AppError::configuration(format!(
                "database.min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout() -> u64 {
    5
}

fn default_idle_timeout() -> u64 {
    600
}
