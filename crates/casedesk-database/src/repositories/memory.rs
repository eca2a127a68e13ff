//! In-memory notification store for single-process deployments and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, broadcast};
use tracing::trace;

use casedesk_core::clock::{Clock, SystemClock};
use casedesk_core::config::NotificationsConfig;
#[cfg(any(test, feature = "test-util"))]
use casedesk_core::error::AppError;
use casedesk_core::result::AppResult;
use casedesk_core::types::id::{NotificationId, UserId};
use casedesk_entity::notification::{ChangeEvent, ChangeKind, NewNotification, Notification};

use crate::store::{
    ChangeStream, InsertOutcome, NotificationFilter, NotificationStore, PromotionClaim, QueryOrder,
    recipient_changes,
};

#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default)]
struct Faults {
    failing_queries: usize,
    failing_recipients: std::collections::HashSet<UserId>,
    failing_promotions: std::collections::HashSet<NotificationId>,
}

#[derive(Debug, Default)]
struct State {
    rows: Vec<Notification>,
    keys: HashMap<(String, UserId), NotificationId>,
    last_created_at: Option<DateTime<Utc>>,
    #[cfg(any(test, feature = "test-util"))]
    faults: Faults,
}

#[cfg(any(test, feature = "test-util"))]
impl State {
    fn injected_query_failure(&mut self) -> AppResult<()> {
        if self.faults.failing_queries == 0 {
            return Ok(());
        }
        self.faults.failing_queries -= 1;
        Err(AppError::database("Injected query failure"))
    }

    fn injected_insert_failure(&self, recipient_id: UserId) -> AppResult<()> {
        if self.faults.failing_recipients.contains(&recipient_id) {
            return Err(AppError::database(format!(
                "Injected insert failure for {recipient_id}"
            )));
        }
        Ok(())
    }

    fn injected_promotion_failure(&self, id: NotificationId) -> AppResult<()> {
        if self.faults.failing_promotions.contains(&id) {
            return Err(AppError::database(format!("Injected promotion failure for {id}")));
        }
        Ok(())
    }
}

#[cfg(not(any(test, feature = "test-util")))]
impl State {
    fn injected_query_failure(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn injected_insert_failure(&self, _recipient_id: UserId) -> AppResult<()> {
        Ok(())
    }

    fn injected_promotion_failure(&self, _id: NotificationId) -> AppResult<()> {
        Ok(())
    }
}

/// Notification store held in process memory.
///
/// `created_at` values are strictly increasing across the store so the
/// poller's `created_at > cursor` comparison never collides.
#[derive(Debug)]
pub struct MemoryNotificationStore {
    state: Mutex<State>,
    changes: std::sync::Mutex<broadcast::Sender<ChangeEvent>>,
    #[cfg(any(test, feature = "test-util"))]
    buffer_size: usize,
    clock: Arc<dyn Clock>,
}

impl MemoryNotificationStore {
    /// Create a store stamping rows with the system clock.
    pub fn new(buffer_size: usize) -> Self {
        Self::with_clock(buffer_size, Arc::new(SystemClock))
    }

    /// Create a store sized from the notification settings.
    pub fn from_config(config: &NotificationsConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_clock(config.change_buffer_size, clock)
    }

    /// Create a store stamping rows with `clock`. A zero `buffer_size` is
    /// raised to one.
    pub fn with_clock(buffer_size: usize, clock: Arc<dyn Clock>) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            state: Mutex::new(State::default()),
            changes: std::sync::Mutex::new(broadcast::channel(buffer_size).0),
            #[cfg(any(test, feature = "test-util"))]
            buffer_size,
            clock,
        }
    }

    /// Snapshot of every row, in insertion order.
    pub async fn all(&self) -> Vec<Notification> {
        self.state.lock().await.rows.clone()
    }

    /// Fetch one row.
    pub async fn get(&self, id: NotificationId) -> Option<Notification> {
        self.state
            .lock()
            .await
            .rows
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Make the next `n` reads (`query` or `claim_due`) fail.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn fail_next_queries(&self, n: usize) {
        self.state.lock().await.faults.failing_queries = n;
    }

    /// Make inserts for `recipient` fail.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn fail_inserts_for(&self, recipient: UserId) {
        self.state.lock().await.faults.failing_recipients.insert(recipient);
    }

    /// Make promotion of `id` fail.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn fail_promotion_of(&self, id: NotificationId) {
        self.state.lock().await.faults.failing_promotions.insert(id);
    }

    /// Drop every live subscription, as if the push transport went away.
    #[cfg(any(test, feature = "test-util"))]
    pub fn disconnect_subscribers(&self) {
        let mut sender = self.changes.lock().unwrap_or_else(|e| e.into_inner());
        *sender = broadcast::channel(self.buffer_size).0;
    }

    /// Number of live change subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.changes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .receiver_count()
    }

    fn publish(&self, event: ChangeEvent) {
        let sender = self.changes.lock().unwrap_or_else(|e| e.into_inner());
        // No receivers is not an error.
        let _ = sender.send(event);
    }

    fn next_created_at(&self, state: &mut State) -> DateTime<Utc> {
        let now = self.clock.now();
        let created_at = match state.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        state.last_created_at = Some(created_at);
        created_at
    }
}

impl Default for MemoryNotificationStore {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, row: NewNotification) -> AppResult<InsertOutcome> {
        let mut state = self.state.lock().await;
        state.injected_insert_failure(row.recipient_id)?;

        let key = (row.dedup_key.clone(), row.recipient_id);
        if state.keys.contains_key(&key) {
            trace!(dedup_key = %key.0, recipient_id = %key.1, "Duplicate insert ignored");
            return Ok(InsertOutcome::Duplicate);
        }

        let created_at = self.next_created_at(&mut state);
        let notification = row.into_notification(NotificationId::new(), created_at);
        state.keys.insert(key, notification.id);
        state.rows.push(notification.clone());
        drop(state);

        self.publish(ChangeEvent {
            kind: ChangeKind::Insert,
            notification_id: notification.id,
            recipient_id: notification.recipient_id,
        });

        Ok(InsertOutcome::Inserted(notification))
    }

    async fn query(
        &self,
        filter: &NotificationFilter,
        order: QueryOrder,
        limit: Option<usize>,
    ) -> AppResult<Vec<Notification>> {
        let mut state = self.state.lock().await;
        state.injected_query_failure()?;

        let mut rows: Vec<Notification> = state
            .rows
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        drop(state);

        match order {
            QueryOrder::CreatedAtAsc => rows.sort_by_key(|r| (r.created_at, r.id.into_uuid())),
            QueryOrder::CreatedAtDesc => {
                rows.sort_by_key(|r| std::cmp::Reverse((r.created_at, r.id.into_uuid())))
            }
            QueryOrder::SnoozedUntilAsc => rows.sort_by_key(|r| (r.snoozed_until, r.id.into_uuid())),
        }
        if let Some(limit) = limit {
            rows.truncate(limit);
        }

        Ok(rows)
    }

    async fn mark_delivered(&self, id: NotificationId, at: DateTime<Utc>) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        state.injected_promotion_failure(id)?;

        let Some(row) = state.rows.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        if !row.mark_delivered(at) {
            return Ok(false);
        }
        let recipient_id = row.recipient_id;
        drop(state);

        self.publish(ChangeEvent {
            kind: ChangeKind::Update,
            notification_id: id,
            recipient_id,
        });
        Ok(true)
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> AppResult<PromotionClaim> {
        let mut state = self.state.lock().await;
        state.injected_query_failure()?;

        let mut due: Vec<usize> = (0..state.rows.len())
            .filter(|&i| state.rows[i].is_due(now))
            .collect();
        due.sort_by_key(|&i| (state.rows[i].snoozed_until, state.rows[i].id.into_uuid()));
        due.truncate(limit);

        let mut claim = PromotionClaim {
            selected: due.len(),
            ..PromotionClaim::default()
        };
        for i in due {
            let id = state.rows[i].id;
            if let Err(e) = state.injected_promotion_failure(id) {
                claim.failed.push((id, e));
                continue;
            }
            let row = &mut state.rows[i];
            if row.mark_delivered(now) {
                claim.promoted.push(row.clone());
            } else {
                claim.skipped += 1;
            }
        }
        drop(state);

        for row in &claim.promoted {
            self.publish(ChangeEvent {
                kind: ChangeKind::Update,
                notification_id: row.id,
                recipient_id: row.recipient_id,
            });
        }
        Ok(claim)
    }

    async fn mark_read(&self, id: NotificationId, recipient_id: UserId) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let Some(row) = state
            .rows
            .iter_mut()
            .find(|r| r.id == id && r.recipient_id == recipient_id && !r.read)
        else {
            return Ok(false);
        };
        row.read = true;
        drop(state);

        self.publish(ChangeEvent {
            kind: ChangeKind::Update,
            notification_id: id,
            recipient_id,
        });
        Ok(true)
    }

    async fn subscribe(&self, recipient_id: UserId) -> AppResult<ChangeStream> {
        let rx = self
            .changes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscribe();
        Ok(recipient_changes(rx, recipient_id))
    }
}
