//! Background worker configuration.

use serde::{Deserialize, Serialize};

/// Scheduled job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether the scheduler is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Six-field cron expression for queue promotion.
    #[serde(default = "default_promotion_cron")]
    pub promotion_cron: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            promotion_cron: default_promotion_cron(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_promotion_cron() -> String {
    "0 */5 * * * *".to_string()
}
