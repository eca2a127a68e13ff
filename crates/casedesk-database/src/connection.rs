//! PostgreSQL pool setup for the notification pipeline.

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use casedesk_core::config::{DatabaseConfig, NotificationsConfig};
use casedesk_core::error::{AppError, ErrorKind};

use crate::repositories::PgNotificationStore;

/// Shared sqlx pool.
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Open a pool sized from configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        info!(
            url = %redact_url(&config.url),
            max_connections = config.max_connections,
            "Connecting notification store"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .idle_timeout(config.idle_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to connect to database", e)
            })?;

        Ok(Self { pool })
    }

    /// The underlying sqlx pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// A notification store sharing this pool.
    pub fn notification_store(&self, config: &NotificationsConfig) -> PgNotificationStore {
        PgNotificationStore::with_change_buffer(self.pool.clone(), config.change_buffer_size)
    }

    /// Close every pooled connection. Open change listeners end with it.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Notification store pool closed");
    }
}

/// Hide the password in a connection URL before it reaches the logs.
fn redact_url(url: &str) -> String {
    let Some(at) = url.rfind('@') else {
        return url.to_string();
    };
    let scheme_end = url.find("://").map_or(0, |p| p + 3);
    match url[..at].rfind(':') {
        Some(colon) if colon > scheme_end => {
            format!("{}:****@{}", &url[..colon], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url_hides_password() {
        assert_eq!(
            redact_url("postgres://casedesk:hunter2@db:5432/casedesk"),
            "postgres://casedesk:****@db:5432/casedesk"
        );
    }

    #[test]
    fn test_redact_url_without_credentials() {
        assert_eq!(redact_url("postgres://db:5432/casedesk"), "postgres://db:5432/casedesk");
        assert_eq!(redact_url("postgres://casedesk@db/casedesk"), "postgres://casedesk@db/casedesk");
    }
}
