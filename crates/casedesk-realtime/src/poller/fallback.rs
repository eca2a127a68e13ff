//! Interval poller that re-reads a user's rows past a moving cursor.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use casedesk_core::error::AppError;
use casedesk_core::result::AppResult;
use casedesk_core::types::id::UserId;
use casedesk_database::store::{NotificationFilter, NotificationStore, QueryOrder};

/// Default interval between checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(30_000);

/// Receives the outcome of each poll.
///
/// Callbacks are re-sync signals: `count` says how many rows appeared
/// since the last successful check, not which ones.
pub trait PollListener: Send + Sync {
    /// New rows were found for `user_id`.
    fn on_new_notifications(&self, user_id: UserId, count: usize);

    /// A check failed. The timer keeps running.
    fn on_error(&self, user_id: UserId, error: &AppError) {
        warn!(user_id = %user_id, error = %error, "Notification poll failed");
    }
}

/// Construction parameters for a [`NotificationPoller`].
#[derive(Clone)]
pub struct PollerOptions {
    /// The polled user.
    pub user_id: UserId,
    /// Time between checks; `None` uses the manager default.
    pub interval: Option<Duration>,
    /// Initial cursor; `None` starts from the creation instant.
    pub last_check_time: Option<DateTime<Utc>>,
    /// Outcome receiver.
    pub listener: Arc<dyn PollListener>,
}

impl PollerOptions {
    /// Options for `user_id` with default interval and cursor.
    pub fn new(user_id: UserId, listener: Arc<dyn PollListener>) -> Self {
        Self {
            user_id,
            interval: None,
            last_check_time: None,
            listener,
        }
    }

    /// Override the interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Start the cursor at `cursor`.
    pub fn since(mut self, cursor: DateTime<Utc>) -> Self {
        self.last_check_time = Some(cursor);
        self
    }
}

impl std::fmt::Debug for PollerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerOptions")
            .field("user_id", &self.user_id)
            .field("interval", &self.interval)
            .field("last_check_time", &self.last_check_time)
            .finish_non_exhaustive()
    }
}

/// Polling fallback for one user.
///
/// Checks never overlap, and the cursor moves only forward, only after a
/// successful check.
pub struct NotificationPoller {
    user_id: UserId,
    interval: Duration,
    store: Arc<dyn NotificationStore>,
    listeners: Mutex<Vec<Arc<dyn PollListener>>>,
    cursor: Mutex<DateTime<Utc>>,
    checking: tokio::sync::Mutex<()>,
    running: Mutex<Option<CancellationToken>>,
}

impl NotificationPoller {
    /// Create a stopped poller. `interval` must be non-zero.
    pub fn new(
        store: Arc<dyn NotificationStore>,
        user_id: UserId,
        interval: Duration,
        cursor: DateTime<Utc>,
        listener: Arc<dyn PollListener>,
    ) -> AppResult<Self> {
        if interval.is_zero() {
            return Err(AppError::validation(format!(
                "Poll interval for user {user_id} must be positive"
            )));
        }
        Ok(Self {
            user_id,
            interval,
            store,
            listeners: Mutex::new(vec![listener]),
            cursor: Mutex::new(cursor),
            checking: tokio::sync::Mutex::new(()),
            running: Mutex::new(None),
        })
    }

    /// The polled user.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Time between checks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// `created_at` of the newest row reported so far.
    pub fn cursor(&self) -> DateTime<Utc> {
        *self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the interval timer is active.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }

    /// Start checking: once now, then every interval.
    ///
    /// Returns `false` without creating a second timer when already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.as_ref().is_some_and(|t| !t.is_cancelled()) {
            info!(user_id = %self.user_id, "Notification poller already running");
            return false;
        }

        let token = CancellationToken::new();
        *running = Some(token.clone());
        drop(running);

        tokio::spawn(run_timer(Arc::downgrade(self), self.interval, token));
        info!(
            user_id = %self.user_id,
            interval_ms = self.interval.as_millis() as u64,
            "Notification poller started"
        );
        true
    }

    /// Cancel the timer. A check already in flight completes and its
    /// result is discarded. Returns `false` if the poller was not running.
    pub fn stop(&self) -> bool {
        let token = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
        match token {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                info!(user_id = %self.user_id, "Notification poller stopped");
                true
            }
            _ => {
                debug!(user_id = %self.user_id, "Notification poller already stopped");
                false
            }
        }
    }

    /// Run one check immediately, outside the timer.
    pub async fn check_now(&self) -> AppResult<usize> {
        self.check(None).await
    }

    /// Add a receiver of poll outcomes.
    pub fn add_listener(&self, listener: Arc<dyn PollListener>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Remove a receiver; returns how many remain.
    pub fn remove_listener(&self, listener: &Arc<dyn PollListener>) -> usize {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len()
    }

    /// Number of attached receivers.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn listeners(&self) -> Vec<Arc<dyn PollListener>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn check(&self, timer: Option<&CancellationToken>) -> AppResult<usize> {
        let _serial = self.checking.lock().await;

        let since = self.cursor();
        let filter = NotificationFilter::for_recipient(self.user_id).created_after(since);
        let result = self.store.query(&filter, QueryOrder::CreatedAtAsc, None).await;

        if timer.is_some_and(|t| t.is_cancelled()) {
            debug!(user_id = %self.user_id, "Discarding poll result after stop");
            return Ok(0);
        }

        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                for listener in self.listeners() {
                    listener.on_error(self.user_id, &e);
                }
                return Err(e);
            }
        };

        let Some(newest) = rows.iter().map(|r| r.created_at).max() else {
            return Ok(0);
        };

        let count = rows.len();
        for listener in self.listeners() {
            listener.on_new_notifications(self.user_id, count);
        }

        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        if newest > *cursor {
            *cursor = newest;
        }
        debug!(user_id = %self.user_id, count, cursor = %*cursor, "Poll found new notifications");
        Ok(count)
    }
}

impl std::fmt::Debug for NotificationPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationPoller")
            .field("user_id", &self.user_id)
            .field("interval", &self.interval)
            .field("cursor", &self.cursor())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for NotificationPoller {
    fn drop(&mut self) {
        if let Some(token) = self.running.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            token.cancel();
        }
    }
}

async fn run_timer(poller: Weak<NotificationPoller>, period: Duration, token: CancellationToken) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(poller) = poller.upgrade() else {
            break;
        };
        // Failures are reported to listeners; the timer carries on.
        let _ = poller.check(Some(&token)).await;
    }
}
