//! PostgreSQL-backed notification store.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgListener, PgPool};
use sqlx::{Postgres, QueryBuilder};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use casedesk_core::error::{AppError, ErrorKind};
use casedesk_core::result::AppResult;
use casedesk_core::types::id::{NotificationId, UserId};
use casedesk_entity::notification::{ChangeEvent, NewNotification, Notification};

use crate::store::{
    ChangeStream, InsertOutcome, NotificationFilter, NotificationStore, PromotionClaim, QueryOrder,
    recipient_changes,
};

/// Channel the `notifications_publish_change` trigger notifies on.
pub const CHANGE_CHANNEL: &str = "notification_changes";

const DEFAULT_CHANGE_BUFFER: usize = 256;

/// Claims due rows in one statement. Rows locked by a concurrent claim are
/// skipped rather than waited on.
const CLAIM_DUE_SQL: &str = "WITH due AS ( \
     SELECT id FROM notifications \
     WHERE delivery_status = 'pending' AND snoozed_until <= $1 \
     ORDER BY snoozed_until ASC, id ASC LIMIT $2 \
     FOR UPDATE SKIP LOCKED) \
     UPDATE notifications n \
     SET delivery_status = 'delivered', snoozed_until = NULL, delivered_at = $1 \
     FROM due WHERE n.id = due.id \
     RETURNING n.*";

/// One LISTEN connection per store, fanned out to every subscriber.
#[derive(Debug)]
struct ChangeFeed {
    sender: Mutex<Option<broadcast::Sender<ChangeEvent>>>,
    buffer_size: usize,
    shutdown: CancellationToken,
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Notification store over the `notifications` table.
///
/// Change subscriptions share a single `LISTEN` connection, opened by the
/// first subscriber and held until the store is dropped or the connection
/// fails. After a failure the next subscriber reconnects.
#[derive(Debug, Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
    feed: Arc<ChangeFeed>,
}

impl PgNotificationStore {
    /// Create a new store.
    pub fn new(pool: PgPool) -> Self {
        Self::with_change_buffer(pool, DEFAULT_CHANGE_BUFFER)
    }

    /// Create a store whose change fan-out buffers `buffer_size` events.
    pub fn with_change_buffer(pool: PgPool, buffer_size: usize) -> Self {
        Self {
            pool,
            feed: Arc::new(ChangeFeed {
                sender: Mutex::new(None),
                buffer_size: buffer_size.max(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    async fn change_receiver(&self) -> AppResult<broadcast::Receiver<ChangeEvent>> {
        let mut slot = self.feed.sender.lock().await;
        if let Some(sender) = slot.as_ref() {
            return Ok(sender.subscribe());
        }

        let mut listener = PgListener::connect_with(&self.pool).await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to open change listener", e)
        })?;
        listener.listen(CHANGE_CHANNEL).await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to LISTEN on change channel", e)
        })?;

        let (sender, rx) = broadcast::channel(self.feed.buffer_size);
        *slot = Some(sender.clone());
        tokio::spawn(run_change_feed(
            listener,
            sender,
            Arc::downgrade(&self.feed),
            self.feed.shutdown.clone(),
        ));
        info!(channel = CHANGE_CHANNEL, "Shared change listener started");
        Ok(rx)
    }
}

async fn run_change_feed(
    mut listener: PgListener,
    sender: broadcast::Sender<ChangeEvent>,
    feed: Weak<ChangeFeed>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            message = listener.recv() => message,
        };
        match message {
            Ok(notification) => match serde_json::from_str::<ChangeEvent>(notification.payload()) {
                // No receivers is not an error.
                Ok(event) => {
                    let _ = sender.send(event);
                }
                Err(e) => warn!(error = %e, "Discarding malformed change payload"),
            },
            Err(e) => {
                warn!(error = %e, "Change listener failed, subscribers fall back to polling");
                break;
            }
        }
    }

    // Dropping the sender ends every subscriber stream.
    if let Some(feed) = feed.upgrade() {
        let mut slot = feed.sender.lock().await;
        if slot.as_ref().is_some_and(|s| s.same_channel(&sender)) {
            *slot = None;
        }
    }
    debug!(channel = CHANGE_CHANNEL, "Shared change listener stopped");
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &NotificationFilter) {
    if let Some(recipient) = filter.recipient_id {
        qb.push(" AND recipient_id = ").push_bind(recipient.into_uuid());
    }
    if let Some(cursor) = filter.created_after {
        qb.push(" AND created_at > ").push_bind(cursor);
    }
    if let Some(read) = filter.read {
        qb.push(" AND read = ").push_bind(read);
    }
    if let Some(status) = filter.delivery_status {
        qb.push(" AND delivery_status = ").push_bind(status);
    }
    if let Some(due) = filter.snoozed_until_at_or_before {
        qb.push(" AND snoozed_until <= ").push_bind(due);
    }
}

fn order_clause(order: QueryOrder) -> &'static str {
    match order {
        QueryOrder::CreatedAtAsc => " ORDER BY created_at ASC, id ASC",
        QueryOrder::CreatedAtDesc => " ORDER BY created_at DESC, id DESC",
        QueryOrder::SnoozedUntilAsc => " ORDER BY snoozed_until ASC, id ASC",
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn insert(&self, row: NewNotification) -> AppResult<InsertOutcome> {
        let inserted = sqlx::query_as::<_, Notification>(
            "INSERT INTO notifications (recipient_id, notification_type, title, message, category, priority, \
             delivery_status, snoozed_until, delivered_at, reference_id, case_id, firm_id, action_url, metadata, dedup_key) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (dedup_key, recipient_id) DO NOTHING RETURNING *",
        )
        .bind(row.recipient_id.into_uuid())
        .bind(&row.notification_type)
        .bind(&row.title)
        .bind(&row.message)
        .bind(&row.category)
        .bind(row.priority)
        .bind(row.delivery_status)
        .bind(row.snoozed_until)
        .bind(row.delivered_at)
        .bind(&row.reference_id)
        .bind(row.case_id.map(|c| c.into_uuid()))
        .bind(row.firm_id.into_uuid())
        .bind(&row.action_url)
        .bind(&row.metadata)
        .bind(&row.dedup_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to insert notification", e))?;

        Ok(match inserted {
            Some(notification) => InsertOutcome::Inserted(notification),
            None => InsertOutcome::Duplicate,
        })
    }

    async fn query(
        &self,
        filter: &NotificationFilter,
        order: QueryOrder,
        limit: Option<usize>,
    ) -> AppResult<Vec<Notification>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM notifications WHERE TRUE");
        push_filter(&mut qb, filter);
        qb.push(order_clause(order));
        if let Some(limit) = limit {
            qb.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        qb.build_query_as::<Notification>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to query notifications", e))
    }

    async fn mark_delivered(&self, id: NotificationId, at: DateTime<Utc>) -> AppResult<bool> {
        let updated: Option<uuid::Uuid> = sqlx::query_scalar(
            "UPDATE notifications SET delivery_status = 'delivered', snoozed_until = NULL, delivered_at = $2 \
             WHERE id = $1 AND delivery_status = 'pending' RETURNING id",
        )
        .bind(id.into_uuid())
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to promote notification", e))?;

        Ok(updated.is_some())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> AppResult<PromotionClaim> {
        let promoted = sqlx::query_as::<_, Notification>(CLAIM_DUE_SQL)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to claim due notifications", e))?;

        Ok(PromotionClaim {
            selected: promoted.len(),
            promoted,
            ..PromotionClaim::default()
        })
    }

    async fn mark_read(&self, id: NotificationId, recipient_id: UserId) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE notifications SET read = TRUE WHERE id = $1 AND recipient_id = $2 AND read = FALSE",
        )
        .bind(id.into_uuid())
        .bind(recipient_id.into_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to mark read", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn subscribe(&self, recipient_id: UserId) -> AppResult<ChangeStream> {
        let rx = self.change_receiver().await?;
        debug!(recipient_id = %recipient_id, channel = CHANGE_CHANNEL, "Change subscriber attached");
        Ok(recipient_changes(rx, recipient_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casedesk_entity::notification::DeliveryStatus;

    #[test]
    fn test_filter_renders_conjunction() {
        let now = Utc::now();
        let filter = NotificationFilter::due_at(now);
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM notifications WHERE TRUE");
        push_filter(&mut qb, &filter);
        qb.push(order_clause(QueryOrder::SnoozedUntilAsc));

        assert_eq!(
            qb.sql(),
            "SELECT * FROM notifications WHERE TRUE AND delivery_status = $1 \
             AND snoozed_until <= $2 ORDER BY snoozed_until ASC, id ASC"
        );
        assert_eq!(filter.delivery_status, Some(DeliveryStatus::Pending));
    }

    #[test]
    fn test_claim_skips_rows_locked_by_other_claims() {
        assert!(CLAIM_DUE_SQL.contains("FOR UPDATE SKIP LOCKED"));
        assert!(CLAIM_DUE_SQL.contains("delivery_status = 'pending'"));
        assert!(CLAIM_DUE_SQL.contains("RETURNING n.*"));
    }

    #[tokio::test]
    async fn test_subscribers_share_one_listener_connection() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy("postgres://casedesk@localhost/casedesk")
            .unwrap();
        let store = PgNotificationStore::new(pool);

        // Seed the feed as if a listener were already running.
        let (sender, _keep) = broadcast::channel(4);
        *store.feed.sender.lock().await = Some(sender.clone());

        let _first = store.subscribe(UserId::new()).await.unwrap();
        let _second = store.subscribe(UserId::new()).await.unwrap();
        assert_eq!(sender.receiver_count(), 3);
    }

    #[test]
    fn test_poller_filter_uses_strict_cursor() {
        let filter = NotificationFilter::for_recipient(UserId::new()).created_after(Utc::now());
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM notifications WHERE TRUE");
        push_filter(&mut qb, &filter);
        assert!(qb.sql().contains("created_at > $2"));
    }
}
